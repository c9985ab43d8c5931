//! Multi-buffered GPU buffers.
//!
//! A [`Buffer`] holds one or more [`Resource`]s depending on how often its data changes:
//!
//! | Type | Resources | On `set_data` |
//! |------|-----------|---------------|
//! | [`BufferType::Immutable`] | 1 | Written once, later writes fail. |
//! | [`BufferType::Static`] | 1 | Waits for the device to go idle, then overwrites in place. |
//! | [`BufferType::Dynamic`] | one per image in flight | Writes the current image, others catch up lazily. |
//! | [`BufferType::Immediate`] | one per image in flight | Writes the current image only. |
//!
//! Dynamic buffers keep a copy of the last written data until every image in flight has received it. Copies are made
//! lazily by [`Buffer::raw_current`], the first time an outdated image is used, so one `set_data` never causes more
//! than one write per image.
//!
//! # Example
//! ```
//! # use framegraph::*;
//! # use anyhow::Result;
//! fn upload_vertices(ctx: &Context, vertices: &[u8]) -> Result<Buffer> {
//!     let info = BufferCreateInfo::new(BufferType::Immutable, vk::BufferUsageFlags::VERTEX_BUFFER);
//!     // 32 bytes per vertex
//!     Buffer::new(ctx, "vertices", info, Some(BufferData::new(vertices, 32)))
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::context::{defer_drop, SharedDeletionQueue};
use crate::core::traits::GpuDevice;
use crate::resource::backing::Resource;
use crate::resource::memory_type::MemoryType;
use crate::{Context, Device, Error};

/// How the contents of a buffer are expected to change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Rarely updated. Updates wait for the device to be idle.
    Static,
    /// Updated often. Every image in flight has its own copy, which is brought up to date lazily.
    Dynamic,
    /// Written exactly once.
    Immutable,
    /// Rewritten every frame. Every image in flight has its own copy, and only the current one is written.
    Immediate,
}

impl BufferType {
    /// Memory type used when none is given explicitly.
    pub fn default_memory(&self) -> MemoryType {
        match self {
            BufferType::Dynamic | BufferType::Immediate => MemoryType::CpuToGpu,
            BufferType::Static | BufferType::Immutable => MemoryType::GpuOnly,
        }
    }

    fn is_multi_buffered(&self) -> bool {
        matches!(self, BufferType::Dynamic | BufferType::Immediate)
    }
}

/// Parameters for creating a [`Buffer`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferCreateInfo {
    /// Update pattern
    pub ty: BufferType,
    /// Buffer usage flags
    pub usage: vk::BufferUsageFlags,
    /// Memory the resources are allocated in
    pub memory: MemoryType,
}

impl BufferCreateInfo {
    /// Create info with the default memory type for `ty`.
    pub fn new(ty: BufferType, usage: vk::BufferUsageFlags) -> Self {
        BufferCreateInfo {
            ty,
            usage,
            memory: ty.default_memory(),
        }
    }

    /// Override the memory type.
    pub fn memory(mut self, memory: MemoryType) -> Self {
        self.memory = memory;
        self
    }
}

/// A block of elements to write to a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferData<'a> {
    /// Raw element data, `stride * element_count` bytes.
    pub bytes: &'a [u8],
    /// Size of a single element in bytes.
    pub stride: u64,
    /// Number of elements in `bytes`.
    pub element_count: u64,
    /// Index of the first element to write.
    pub start_element: u64,
}

impl<'a> BufferData<'a> {
    /// Elements of `stride` bytes each, written from the first element.
    pub fn new(bytes: &'a [u8], stride: u64) -> Self {
        BufferData {
            bytes,
            stride,
            element_count: if stride == 0 { 0 } else { bytes.len() as u64 / stride },
            start_element: 0,
        }
    }

    /// Write starting at element `start` instead.
    pub fn at_element(mut self, start: u64) -> Self {
        self.start_element = start;
        self
    }

    /// Number of bytes from the start of the buffer to the end of this write.
    pub fn span(&self) -> u64 {
        (self.start_element + self.element_count) * self.stride
    }

    fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(Error::Uncategorized("Buffer data stride must not be zero.").into());
        }
        if self.bytes.len() as u64 != self.stride * self.element_count {
            return Err(Error::Uncategorized("Buffer data length does not match stride and element count.").into());
        }
        Ok(())
    }
}

/// A multi-buffered GPU buffer. See the module level documentation.
///
/// Buffers are not internally synchronized. Old resources are handed to the deletion queue of the context when the
/// buffer is resized, destroyed or dropped, so they outlive any frame that may still read them.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Buffer<D: GpuDevice = Device> {
    name: String,
    info: BufferCreateInfo,
    stride: u64,
    element_count: u64,
    resources: Vec<Resource<D>>,
    #[derivative(Debug = "ignore")]
    temp_buffer_data: Option<Vec<u8>>,
    written: bool,
    #[derivative(Debug = "ignore")]
    deletion_queue: SharedDeletionQueue,
}

impl<D: GpuDevice> Buffer<D> {
    /// Create a buffer, optionally uploading initial data. Without data, no memory is allocated until the first write.
    pub fn new(ctx: &Context<D>, name: impl Into<String>, info: BufferCreateInfo, data: Option<BufferData>) -> Result<Self> {
        let mut buffer = Buffer {
            name: name.into(),
            info,
            stride: 0,
            element_count: 0,
            resources: vec![],
            temp_buffer_data: None,
            written: false,
            deletion_queue: ctx.shared_deletion_queue(),
        };
        if let Some(data) = data {
            buffer.set_data(ctx, &data)?;
        }
        Ok(buffer)
    }

    /// Create a buffer with room for `element_count` elements of `stride` bytes, without writing any data.
    pub fn with_capacity(ctx: &Context<D>, name: impl Into<String>, info: BufferCreateInfo, stride: u64, element_count: u64) -> Result<Self> {
        let mut buffer = Self::new(ctx, name, info, None)?;
        buffer.allocate(ctx, stride, element_count)?;
        Ok(buffer)
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The create info this buffer was made with.
    pub fn info(&self) -> &BufferCreateInfo {
        &self.info
    }

    /// Size of one element in bytes.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Number of elements the buffer can hold.
    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.stride * self.element_count
    }

    /// All resources, one per image in flight for dynamic and immediate buffers.
    pub fn resources(&self) -> &[Resource<D>] {
        self.resources.as_slice()
    }

    /// Whether some images in flight have not received the latest dynamic write yet.
    pub fn has_pending_data(&self) -> bool {
        self.temp_buffer_data.is_some()
    }

    fn resource_count(&self, ctx: &Context<D>) -> usize {
        if self.info.ty.is_multi_buffered() {
            ctx.image_count()
        } else {
            1
        }
    }

    fn current_index(&self, ctx: &Context<D>) -> usize {
        if self.resources.len() > 1 {
            ctx.current_image() % self.resources.len()
        } else {
            0
        }
    }

    fn allocate(&mut self, ctx: &Context<D>, stride: u64, element_count: u64) -> Result<()> {
        let mut resources = Vec::with_capacity(self.resource_count(ctx));
        for _ in 0..self.resource_count(ctx) {
            resources.push(Resource::new(
                ctx.device().clone(),
                stride,
                element_count,
                self.info.usage,
                self.info.memory,
            )?);
        }
        for old in std::mem::replace(&mut self.resources, resources) {
            ctx.drop_resource(old);
        }
        self.stride = stride;
        self.element_count = element_count;
        self.temp_buffer_data = None;
        Ok(())
    }

    /// Reallocate every resource to hold `element_count` elements of `stride` bytes. Contents are discarded.
    /// # Errors
    /// * Fails for immutable buffers that already hold data.
    pub fn resize(&mut self, ctx: &Context<D>, stride: u64, element_count: u64) -> Result<()> {
        if self.info.ty == BufferType::Immutable && self.written {
            return Err(Error::ImmutableBuffer(self.name.clone()).into());
        }
        debug!(
            "Resizing buffer `{}` from {} to {} bytes",
            self.name,
            self.size(),
            stride * element_count
        );
        self.allocate(ctx, stride, element_count)
    }

    /// Write elements to the buffer, growing it if the write does not fit. See the module level documentation for
    /// how each buffer type handles writes.
    /// # Errors
    /// * Fails for immutable buffers that already hold data.
    /// * Fails for dynamic buffers if `data.start_element` is not zero.
    pub fn set_data(&mut self, ctx: &Context<D>, data: &BufferData) -> Result<()> {
        data.validate()?;
        match self.info.ty {
            BufferType::Immutable if self.written => return Err(Error::ImmutableBuffer(self.name.clone()).into()),
            BufferType::Dynamic if data.start_element != 0 => return Err(Error::DynamicBufferOffset(self.name.clone()).into()),
            _ => {}
        }

        if data.span() > self.size() || self.resources.is_empty() {
            self.resize(ctx, data.stride, data.start_element + data.element_count)?;
        } else if data.stride != self.stride {
            self.element_count = self.size() / data.stride;
            self.stride = data.stride;
            for resource in &mut self.resources {
                resource.set_stride(data.stride);
            }
        }

        let offset = data.start_element * data.stride;
        match self.info.ty {
            BufferType::Immutable => {
                self.resources[0].set_data(ctx, offset, data.bytes)?;
                self.written = true;
            }
            BufferType::Static => {
                ctx.wait_idle()?;
                self.resources[0].set_data(ctx, offset, data.bytes)?;
            }
            BufferType::Immediate => {
                let current = self.current_index(ctx);
                self.resources[current].set_data(ctx, offset, data.bytes)?;
            }
            BufferType::Dynamic => {
                let current = self.current_index(ctx);
                self.resources[current].set_data(ctx, 0, data.bytes)?;
                for (index, resource) in self.resources.iter_mut().enumerate() {
                    resource.outdated = index != current;
                }
                self.temp_buffer_data = if self.resources.len() > 1 {
                    Some(data.bytes.to_vec())
                } else {
                    None
                };
            }
        }
        Ok(())
    }

    /// Get the resource to use for the image currently being rendered. For dynamic buffers this first brings the
    /// resource up to date if it missed the last write.
    /// # Errors
    /// * Fails if no data was ever written to the buffer.
    pub fn raw_current(&mut self, ctx: &Context<D>) -> Result<&Resource<D>> {
        if self.resources.is_empty() {
            return Err(Error::MissingInitialData(self.name.clone()).into());
        }
        let current = self.current_index(ctx);
        if self.resources[current].outdated {
            if let Some(data) = &self.temp_buffer_data {
                self.resources[current].set_data(ctx, 0, data)?;
            }
            self.resources[current].outdated = false;
            if self.resources.iter().all(|resource| !resource.outdated) {
                self.temp_buffer_data = None;
            }
        }
        Ok(&self.resources[current])
    }

    /// Release the buffer. Its resources are destroyed once the GPU can no longer be using them.
    /// Dropping the buffer has the same effect.
    pub fn destroy(self, ctx: &Context<D>) {
        debug_assert!(Arc::ptr_eq(&self.deletion_queue, &ctx.shared_deletion_queue()));
        drop(self);
    }
}

impl<D: GpuDevice> Drop for Buffer<D> {
    fn drop(&mut self) {
        for resource in self.resources.drain(..) {
            defer_drop(&self.deletion_queue, resource);
        }
    }
}
