//! The wsi module defines the interface the render pass graph needs from a swapchain.
//!
//! Creating surfaces and swapchains is left to the windowing layer. All the graph needs is the size of the
//! presentable images and a view over each of them, which is expressed by the [`Swapchain`] trait.

use ash::vk;

/// A set of presentable images.
pub trait Swapchain {
    /// Size of the swapchain images in pixels.
    fn extent(&self) -> vk::Extent2D;
    /// Number of swapchain images.
    fn image_count(&self) -> usize;
    /// Get a view over swapchain image `index`.
    /// # Safety
    /// The view is owned by the swapchain and must not be used after the swapchain is recreated or destroyed.
    unsafe fn image_view(&self, index: usize) -> vk::ImageView;
}
