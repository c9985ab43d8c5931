//! GPU memory backed resources.
//!
//! - [`buffer::Buffer`] is the multi-buffered buffer most code should use.
//! - [`backing::Resource`] is a single native buffer, one per image in flight for multi-buffered types.
//! - [`image::Attachment`] is an image rendered to by a render pass instance.

pub mod backing;
pub mod buffer;
pub mod image;
pub mod memory_type;
