//! Various utilities

pub mod cache;
pub mod deferred_delete;
