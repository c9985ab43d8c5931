//! Exposes the framegraph error type

use std::sync::PoisonError;

use ash;
use gpu_allocator::AllocationError;
use thiserror::Error;

/// Error type that framegraph can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic Vulkan error type.
    #[error("Vulkan error: `{0}`")]
    VkError(ash::vk::Result),
    /// Vulkan allocation error.
    #[error("Vulkan allocation error: `{0}`")]
    AllocationError(AllocationError),
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
    /// No queue family was assigned to the requested role, and no fallback was available either.
    #[error("No queue family found for role {0:?}.")]
    NoCapableQueue(crate::core::queue::QueueRole),
    /// The queue family was used before its native queue was bound with `init_queue`.
    #[error("Queue family {0} was used before its queue was initialized.")]
    QueueNotInitialized(u32),
    /// Tried to write to or resize an immutable buffer after its initial write.
    #[error("Immutable buffer `{0}` cannot be written to or resized after its initial data upload.")]
    ImmutableBuffer(String),
    /// A buffer was used before any data was uploaded to it.
    #[error("Buffer `{0}` was used before any data was uploaded to it.")]
    MissingInitialData(String),
    /// Dynamic buffers can only be updated from the first element.
    #[error("Cannot update dynamic buffer `{0}` at a non-zero element offset.")]
    DynamicBufferOffset(String),
    /// Write does not fit inside the destination resource.
    #[error("Write of {size} bytes at offset {offset} does not fit in a resource of {capacity} bytes.")]
    BufferWriteOutOfRange {
        /// Byte offset of the write
        offset: u64,
        /// Size of the write in bytes
        size: u64,
        /// Size of the destination resource in bytes
        capacity: u64,
    },
    /// The step at the root of a render pass graph must declare a present attachment.
    #[error("Root step `{0}` does not declare a present attachment.")]
    NoPresentAttachment(String),
    /// A frame was rendered for a swapchain image the render targets were not built for.
    #[error("Swapchain image {image} is out of range, render targets exist for {count} images.")]
    SwapchainImageOutOfRange {
        /// Index of the requested swapchain image
        image: usize,
        /// Number of swapchain images the graph was built for
        count: usize,
    },
    /// Context settings must allow at least one image in flight.
    #[error("A context needs at least one image in flight.")]
    NoImagesInFlight,
    /// Node not found in graph. Generally this should not happen.
    #[error("Implementation error. Node not found.")]
    NodeNotFound,
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}

impl From<ash::vk::Result> for Error {
    fn from(value: ash::vk::Result) -> Self {
        Error::VkError(value)
    }
}

impl From<AllocationError> for Error {
    fn from(value: AllocationError) -> Self {
        Error::AllocationError(value)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
