pub use ash::vk;

pub use crate::core::app_info::*;
pub use crate::core::context::Context;
pub use crate::core::device::Device;
pub use crate::core::error::Error;
pub use crate::core::queue::*;
pub use crate::core::traits::*;

pub use crate::sync::fence::*;
pub use crate::sync::semaphore::*;

pub use crate::command_buffer::command_pool::CommandPool;
pub use crate::command_buffer::CommandBuffer;

pub use crate::resource::backing::Resource;
pub use crate::resource::buffer::*;
pub use crate::resource::image::Attachment;
pub use crate::resource::memory_type::MemoryType;

pub use crate::graph::framebuffer::Framebuffer;
pub use crate::graph::instance::*;
pub use crate::graph::render_pass::*;
pub use crate::graph::root::*;
pub use crate::graph::step::*;

pub use crate::pipeline::pipeline_layout::*;
pub use crate::pipeline::shader::*;

pub use crate::util::cache::Cache;
pub use crate::util::deferred_delete::DeletionQueue;

pub use crate::wsi::Swapchain;
