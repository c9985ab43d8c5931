//! Defines the [`GpuDevice`] trait, the narrow set of native device operations the rest of the crate is built on.
//!
//! Everything above this trait (queue selection, command pools, buffers, the render pass graph) only ever talks
//! to the GPU through it. [`Device`](crate::Device) implements it on top of `ash` and `gpu-allocator`. Alternative
//! implementations (for example an in-memory device for headless tests) only need to implement this trait.
//!
//! Handles are exchanged as raw Vulkan handle types. Every `create_*` function hands ownership of the returned
//! handle to the caller, which must eventually pass it back to the matching `destroy_*` function.

use std::fmt::Debug;

use anyhow::Result;
use ash::vk;

use crate::graph::render_pass::RenderPassLayout;
use crate::resource::memory_type::MemoryType;

/// Result of a buffer allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferAllocation {
    /// Native buffer handle, bound to its memory.
    pub handle: vk::Buffer,
    /// Size of the buffer in bytes.
    pub size: vk::DeviceSize,
    /// Whether the memory backing this buffer can be written to directly from the host.
    pub host_visible: bool,
}

/// Settings that describe how a 2D attachment image should be created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Pixel format
    pub format: vk::Format,
    /// Image usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the view created over the whole image
    pub aspect: vk::ImageAspectFlags,
}

/// A device-local image together with a view covering the whole image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageAllocation {
    /// Native image handle
    pub image: vk::Image,
    /// View over the entire image
    pub view: vk::ImageView,
}

/// Describes a single queue submission.
#[derive(Debug, Default, Copy, Clone)]
pub struct SubmitDesc<'a> {
    /// Semaphores to wait on before execution starts.
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Pipeline stage each wait semaphore blocks. Must have the same length as `wait_semaphores`.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Command buffers to execute, in order.
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphores signaled once all command buffers completed.
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Native device operations. See the module level documentation.
pub trait GpuDevice: Debug + Send + Sync + 'static {
    /// Block until all queues on the device are idle.
    fn wait_idle(&self) -> Result<()>;

    /// Get the native queue at `index` in `family`.
    fn get_queue(&self, family: u32, index: u32) -> vk::Queue;
    /// Submit work to a queue, signaling `fence` (may be null) once it completes.
    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc, fence: vk::Fence) -> Result<()>;

    /// Create a buffer and bind memory of the given memory type to it.
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory: MemoryType) -> Result<BufferAllocation>;
    /// Write bytes into a host visible buffer at a byte offset.
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()>;
    /// Destroy a buffer and release its memory.
    /// # Safety
    /// The buffer must have been created by this device and must not be in use by the GPU.
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);

    /// Create a device local image and a view over it.
    fn create_image(&self, desc: &ImageDesc) -> Result<ImageAllocation>;
    /// # Safety
    /// The image must have been created by this device and must not be in use by the GPU.
    unsafe fn destroy_image(&self, image: &ImageAllocation);

    /// Create a render pass from a derived layout.
    fn create_render_pass(&self, layout: &RenderPassLayout) -> Result<vk::RenderPass>;
    /// # Safety
    /// The render pass must not be in use by the GPU or referenced by live framebuffers.
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    /// Create a framebuffer over the given attachments.
    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> Result<vk::Framebuffer>;
    /// # Safety
    /// The framebuffer must not be in use by the GPU.
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Create a descriptor set layout.
    fn create_descriptor_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding]) -> Result<vk::DescriptorSetLayout>;
    /// # Safety
    /// The set layout must not be in use.
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a pipeline layout.
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constants: &[vk::PushConstantRange]) -> Result<vk::PipelineLayout>;
    /// # Safety
    /// The pipeline layout must not be in use.
    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    /// Create a command pool for a queue family.
    fn create_command_pool(&self, family: u32, flags: vk::CommandPoolCreateFlags) -> Result<vk::CommandPool>;
    /// # Safety
    /// No command buffer allocated from this pool may still be executing.
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate a single primary command buffer from a pool.
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    /// # Safety
    /// The command buffer must have been allocated from `pool` and must not be executing.
    /// Access to `pool` must be externally synchronized.
    unsafe fn free_command_buffer(&self, pool: vk::CommandPool, cmd: vk::CommandBuffer);
    /// Begin recording a command buffer.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> Result<()>;
    /// Finish recording a command buffer.
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    /// Record a buffer to buffer copy.
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy);
    /// Record the start of a render pass instance with inline subpass contents.
    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    );
    /// Record the end of the current render pass instance.
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);

    /// Create a fence, possibly in the signaled state.
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    /// Wait until a fence is signaled or the timeout (in nanoseconds) expires.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> Result<()>;
    /// Reset a fence to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    /// Query whether a fence is signaled without blocking.
    fn fence_status(&self, fence: vk::Fence) -> Result<bool>;
    /// # Safety
    /// The fence must not be part of a pending submission.
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    /// Create a binary semaphore.
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    /// # Safety
    /// The semaphore must not be part of a pending submission.
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
}
