//! Command buffers and the per-thread command pools they are allocated from.
//!
//! A [`CommandBuffer`] is a thin wrapper over a native primary command buffer. It remembers the queue family it was
//! allocated for and the thread that allocated it, so it can be freed into the right pool from any thread.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use anyhow::Result;
use ash::vk;

use crate::core::queue::QueueFamily;
use crate::core::traits::{GpuDevice, SubmitDesc};
use crate::{Device, Fence};

pub mod command_pool;

/// A primary command buffer allocated from the calling thread's pool of a queue family.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBuffer<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    family: Arc<QueueFamily<D>>,
    handle: vk::CommandBuffer,
    thread: ThreadId,
}

impl<D: GpuDevice> CommandBuffer<D> {
    /// Allocate a new command buffer for a queue family. The family must be initialized.
    pub fn new(family: Arc<QueueFamily<D>>) -> Result<Self> {
        let device = family.device()?.clone();
        let handle = family.command_pool()?.allocate()?;
        Ok(CommandBuffer {
            device,
            family,
            handle,
            thread: thread::current().id(),
        })
    }

    /// Get unsafe access to the underlying `VkCommandBuffer`.
    /// # Safety
    /// The handle must not be freed manually, and must not be used after this command buffer is dropped.
    pub unsafe fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// The thread that allocated this command buffer.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The queue family this command buffer can be submitted to.
    pub fn family(&self) -> &Arc<QueueFamily<D>> {
        &self.family
    }

    /// Start recording. Any previously recorded commands are discarded.
    pub fn begin(&self, one_time: bool) -> Result<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        self.device.begin_command_buffer(self.handle, flags)
    }

    /// Finish recording.
    pub fn end(&self) -> Result<()> {
        self.device.end_command_buffer(self.handle)
    }

    /// Submit this command buffer to the queue of its family.
    /// Every wait semaphore blocks the color attachment output stage.
    pub fn submit(&self, wait: &[vk::Semaphore], signal: &[vk::Semaphore], fence: Option<&Fence<D>>) -> Result<()> {
        let stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait.len()];
        self.family.submit(
            &SubmitDesc {
                wait_semaphores: wait,
                wait_stages: stages.as_slice(),
                command_buffers: std::slice::from_ref(&self.handle),
                signal_semaphores: signal,
            },
            fence,
        )
    }

    /// Record a copy of `size` bytes between two buffers.
    pub fn copy_buffer(&self, src: vk::Buffer, src_offset: vk::DeviceSize, dst: vk::Buffer, dst_offset: vk::DeviceSize, size: vk::DeviceSize) {
        self.device.cmd_copy_buffer(
            self.handle,
            src,
            dst,
            vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            },
        );
    }

    /// Begin a render pass instance covering the whole framebuffer.
    pub fn begin_render_pass(&self, render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, extent: vk::Extent2D, clear_values: &[vk::ClearValue]) {
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        self.device
            .cmd_begin_render_pass(self.handle, render_pass, framebuffer, area, clear_values);
    }

    /// End the current render pass instance.
    pub fn end_render_pass(&self) {
        self.device.cmd_end_render_pass(self.handle);
    }
}

impl<D: GpuDevice> Drop for CommandBuffer<D> {
    fn drop(&mut self) {
        let result = self
            .family
            .command_pool()
            .and_then(|pool| pool.free(self.handle, self.thread));
        if let Err(err) = result {
            error!("Failed to free command buffer: {err}");
        }
    }
}
