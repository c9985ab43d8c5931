//! The core module holds the device abstraction, queue management and the context every other module is driven by.

pub mod app_info;
pub mod context;
pub mod device;
pub mod error;
pub mod queue;
pub mod traits;
