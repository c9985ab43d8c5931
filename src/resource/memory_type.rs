//! Exposes the memory types a [`Resource`](crate::Resource) can be allocated in.

/// The memory type of an allocation indicates where it should live.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryType {
    /// GPU only accessible memory. Fastest for the GPU to access, but writes from the host
    /// need to go through a staging upload.
    #[default]
    GpuOnly,
    /// Host visible memory useful for uploading data to the GPU and for data that changes every frame.
    CpuToGpu,
    /// Host visible memory useful for CPU readback of data.
    GpuToCpu,
}

impl MemoryType {
    /// Whether allocations of this memory type are expected to be mappable by the host.
    /// Note that the final word belongs to the allocator, see [`BufferAllocation::host_visible`](crate::BufferAllocation).
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryType::GpuOnly)
    }
}

impl From<MemoryType> for gpu_allocator::MemoryLocation {
    fn from(value: MemoryType) -> Self {
        match value {
            MemoryType::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryType::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryType::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}
