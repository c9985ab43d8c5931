//! The sync module provides utilities dealing with Vulkan synchronization.
//!
//! - The [`fence`] module provides a wrapper around `VkFence` objects, used for CPU-GPU sync,
//! as well as an implementation for [`Future`](std::future::Future) for them.
//! - The [`semaphore`] module provides a simple wrapper around `VkSemaphore` objects, used for GPU-GPU sync.

pub mod fence;
pub mod semaphore;
