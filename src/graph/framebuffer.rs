use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::command_buffer::CommandBuffer;
use crate::core::queue::QueueRole;
use crate::core::traits::GpuDevice;
use crate::graph::render_pass::RenderPassObject;
use crate::{Context, Device, Semaphore};

/// A framebuffer over one swapchain image, with the command buffer the frame is recorded into and the semaphore
/// signaled when rendering to it finished.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Framebuffer<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
    command_buffer: CommandBuffer<D>,
    render_finished: Semaphore<D>,
}

impl<D: GpuDevice> Framebuffer<D> {
    /// Create a framebuffer over `attachments` for a render pass.
    pub fn new(ctx: &Context<D>, render_pass: &RenderPassObject<D>, attachments: &[vk::ImageView], extent: vk::Extent2D) -> Result<Self> {
        let command_buffer = ctx.command_buffer(QueueRole::Graphic)?;
        let render_finished = Semaphore::new(ctx.device().clone())?;
        // SAFETY: The render pass outlives this call.
        let handle = ctx
            .device()
            .create_framebuffer(unsafe { render_pass.handle() }, attachments, extent)?;
        Ok(Framebuffer {
            device: ctx.device().clone(),
            handle,
            extent,
            command_buffer,
            render_finished,
        })
    }

    /// Get unsafe access to the underlying `VkFramebuffer`.
    /// # Safety
    /// The handle must not be destroyed manually, and must not be used after this object is dropped.
    pub unsafe fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    /// Size of the framebuffer.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// The command buffer frames rendering to this framebuffer are recorded into.
    pub fn command_buffer(&self) -> &CommandBuffer<D> {
        &self.command_buffer
    }

    /// Semaphore signaled when the frame rendering to this framebuffer completed on the GPU.
    pub fn render_finished(&self) -> &Semaphore<D> {
        &self.render_finished
    }
}

impl<D: GpuDevice> Drop for Framebuffer<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.handle);
        }
    }
}
