//! Attachment images owned by render pass instances.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::traits::{GpuDevice, ImageAllocation, ImageDesc};
use crate::graph::render_pass::AttachmentInfo;
use crate::Device;

/// A device local 2D image and a view over it, used as a render target. Destroyed when dropped.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Attachment<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    image: ImageAllocation,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl<D: GpuDevice> Attachment<D> {
    /// Allocate an image backing `info` at the given size.
    pub fn new(device: Arc<D>, info: &AttachmentInfo, extent: vk::Extent2D) -> Result<Self> {
        let image = device.create_image(&ImageDesc {
            extent,
            format: info.format,
            usage: info.usage(),
            aspect: info.aspect(),
        })?;
        Ok(Attachment {
            device,
            image,
            format: info.format,
            extent,
        })
    }

    /// Get unsafe access to the view over this image.
    /// # Safety
    /// The view must not be destroyed manually, and must not be used after this attachment is dropped.
    pub unsafe fn view(&self) -> vk::ImageView {
        self.image.view
    }

    /// Get unsafe access to the underlying `VkImage`.
    /// # Safety
    /// The image must not be destroyed manually, and must not be used after this attachment is dropped.
    pub unsafe fn handle(&self) -> vk::Image {
        self.image.image
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl<D: GpuDevice> Drop for Attachment<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(&self.image);
        }
    }
}
