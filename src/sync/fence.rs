use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Result;
use ash::vk;

use crate::core::traits::GpuDevice;
use crate::Device;

/// Wrapper around a [`VkFence`](vk::Fence) object. Fences are used for CPU-GPU sync.
///
/// A fence can be waited on in a blocking way with [`Fence::wait`], or awaited as a [`Future`](std::future::Future).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Fence<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    handle: vk::Fence,
}

impl<D: GpuDevice> Fence<D> {
    /// Create a new fence, possibly in the signaled status.
    pub fn new(device: Arc<D>, signaled: bool) -> Result<Self> {
        let handle = device.create_fence(signaled)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkFence {handle:p}");
        Ok(Fence {
            device,
            handle,
        })
    }

    /// Waits for the fence to be signaled with no timeout. Note that this is a blocking call. For the nonblocking version,
    /// use the `Future` implementation by calling `.await`.
    pub fn wait(&self) -> Result<()> {
        self.device.wait_for_fence(self.handle, u64::MAX)
    }

    /// Resets a fence to the unsignaled status.
    pub fn reset(&self) -> Result<()> {
        self.device.reset_fence(self.handle)
    }

    /// Check the status of the fence without blocking.
    pub fn is_signaled(&self) -> Result<bool> {
        self.device.fence_status(self.handle)
    }

    /// Get unsafe access to the underlying `VkFence` handle.
    /// # Safety
    /// The handle must not be destroyed manually, and must not be used after this object is dropped.
    pub unsafe fn handle(&self) -> vk::Fence {
        self.handle
    }
}

// The future implementation for Fence works by periodically polling the fence.
impl<D: GpuDevice> std::future::Future for Fence<D> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.is_signaled() {
            Ok(true) => Poll::Ready(Ok(())),
            Err(err) => Poll::Ready(Err(err)),
            Ok(false) => {
                let waker = ctx.waker().clone();
                std::thread::spawn(move || {
                    // We will try to poll every 5 milliseconds.
                    std::thread::sleep(Duration::from_millis(5));
                    waker.wake();
                });
                Poll::Pending
            }
        }
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkFence {:p}", self.handle);
        unsafe {
            self.device.destroy_fence(self.handle);
        }
    }
}
