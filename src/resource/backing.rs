//! A single native buffer backing one in-flight copy of a [`Buffer`](crate::Buffer).

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::queue::QueueRole;
use crate::core::traits::GpuDevice;
use crate::resource::memory_type::MemoryType;
use crate::{Context, Device, Error, Fence};

/// One native buffer and its memory. Host visible resources are written directly, device local resources are
/// written through a temporary staging buffer.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Resource<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    handle: vk::Buffer,
    size: vk::DeviceSize,
    stride: u64,
    element_count: u64,
    pub(crate) outdated: bool,
    host_visible: bool,
}

impl<D: GpuDevice> Resource<D> {
    /// Allocate a resource holding `element_count` elements of `stride` bytes each.
    /// `TRANSFER_DST` is added to the usage of device local resources so they can be uploaded to.
    pub fn new(device: Arc<D>, stride: u64, element_count: u64, usage: vk::BufferUsageFlags, memory: MemoryType) -> Result<Self> {
        let size = stride * element_count;
        if size == 0 {
            return Err(Error::Uncategorized("Cannot allocate an empty buffer resource.").into());
        }
        let usage = if memory.is_host_visible() {
            usage
        } else {
            usage | vk::BufferUsageFlags::TRANSFER_DST
        };
        let allocation = device.create_buffer(size, usage, memory)?;
        Ok(Resource {
            device,
            handle: allocation.handle,
            size: allocation.size,
            stride,
            element_count,
            outdated: false,
            host_visible: allocation.host_visible,
        })
    }

    /// Get unsafe access to the underlying `VkBuffer`.
    /// # Safety
    /// The handle must not be destroyed manually, and must not be used after this resource is dropped.
    pub unsafe fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Size of a single element in bytes.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Number of elements this resource can hold.
    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    /// Reinterpret the contents as elements of `stride` bytes. The allocation is kept.
    pub(crate) fn set_stride(&mut self, stride: u64) {
        self.element_count = self.stride * self.element_count / stride;
        self.stride = stride;
    }

    /// Whether this resource still misses the latest data written to its buffer.
    pub fn is_outdated(&self) -> bool {
        self.outdated
    }

    /// Whether the memory of this resource can be written from the host directly.
    pub fn is_host_visible(&self) -> bool {
        self.host_visible
    }

    /// Write `data` at a byte offset. Device local resources are written with a blocking staging upload on the
    /// transfer queue, or the graphic queue if there is no transfer queue.
    pub fn set_data(&self, ctx: &Context<D>, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = data.len() as vk::DeviceSize;
        if offset + size > self.size {
            return Err(Error::BufferWriteOutOfRange {
                offset,
                size,
                capacity: self.size,
            }
            .into());
        }
        if self.host_visible {
            return self.device.write_buffer(self.handle, offset, data);
        }

        let staging = Resource::new(self.device.clone(), 1, size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryType::CpuToGpu)?;
        if !staging.host_visible {
            return Err(Error::Uncategorized("Staging memory is not host visible.").into());
        }
        self.device.write_buffer(staging.handle, 0, data)?;

        let cmd = ctx.command_buffer(QueueRole::Transfer)?;
        cmd.begin(true)?;
        cmd.copy_buffer(staging.handle, 0, self.handle, offset, size);
        cmd.end()?;
        let fence = Fence::new(self.device.clone(), false)?;
        cmd.submit(&[], &[], Some(&fence))?;
        fence.wait()?;
        Ok(())
    }
}

impl<D: GpuDevice> Drop for Resource<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.handle);
        }
    }
}
