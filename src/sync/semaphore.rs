use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::traits::GpuDevice;
use crate::Device;

/// Wrapper around a [`VkSemaphore`](vk::Semaphore) object. Semaphores are used for GPU-GPU sync.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Semaphore<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    handle: vk::Semaphore,
}

impl<D: GpuDevice> Semaphore<D> {
    /// Create a new `VkSemaphore` object.
    pub fn new(device: Arc<D>) -> Result<Self> {
        let handle = device.create_semaphore()?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkSemaphore {handle:p}");
        Ok(Semaphore {
            device,
            handle,
        })
    }

    /// Get unsafe access to the underlying `VkSemaphore` handle.
    /// # Safety
    /// The handle must not be destroyed manually, and must not be used after this object is dropped.
    pub unsafe fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkSemaphore {:p}", self.handle);
        unsafe {
            self.device.destroy_semaphore(self.handle);
        }
    }
}
