//! Shared test utilities. All tests run against [`MockDevice`], an in-memory device that records the native calls
//! made through it, so they need neither a GPU nor a window.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use ash::vk;
use ash::vk::Handle;

use framegraph::*;

#[derive(Debug, Clone)]
pub struct MockBuffer {
    pub data: Vec<u8>,
    pub usage: vk::BufferUsageFlags,
    pub memory: MemoryType,
}

/// Everything the mock device observed. Counters only ever grow, `*_alive` sets shrink when objects are destroyed.
#[derive(Debug, Default)]
pub struct MockState {
    pub buffers: HashMap<vk::Buffer, MockBuffer>,
    /// Number of times each buffer was written, either from the host or as the destination of a copy.
    pub buffer_writes: HashMap<vk::Buffer, usize>,
    pub copies_executed: usize,
    pub wait_idle_calls: usize,
    pub submits: usize,
    pub images_created: usize,
    pub images_alive: HashSet<vk::Image>,
    pub framebuffers_created: usize,
    pub framebuffers_alive: HashSet<vk::Framebuffer>,
    pub render_passes_created: usize,
    pub render_passes_alive: HashSet<vk::RenderPass>,
    pub pipeline_layouts_created: usize,
    pub set_layouts_alive: HashSet<vk::DescriptorSetLayout>,
    pub command_pools: Vec<(vk::CommandPool, u32)>,
    pub command_buffers: HashMap<vk::CommandBuffer, vk::CommandPool>,
    pub freed_command_buffers: Vec<(vk::CommandPool, vk::CommandBuffer)>,
    pub recorded_copies: HashMap<vk::CommandBuffer, Vec<(vk::Buffer, vk::Buffer, vk::BufferCopy)>>,
    /// Every `cmd_begin_render_pass`, in recording order.
    pub begun_render_passes: Vec<(vk::RenderPass, vk::Framebuffer)>,
    pub fences: HashMap<vk::Fence, bool>,
    pub semaphores: HashSet<vk::Semaphore>,
    /// Semaphores signaled by submissions, in submission order.
    pub signaled_semaphores: Vec<vk::Semaphore>,
}

#[derive(Debug, Default)]
pub struct MockDevice {
    next_handle: AtomicU64,
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn state(&self) -> MutexGuard<MockState> {
        self.state.lock().unwrap()
    }

    /// Total number of writes across a set of buffers.
    pub fn writes_to(&self, buffers: impl IntoIterator<Item = vk::Buffer>) -> usize {
        let state = self.state();
        buffers
            .into_iter()
            .map(|buffer| state.buffer_writes.get(&buffer).copied().unwrap_or_default())
            .sum()
    }

    pub fn contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.state().buffers[&buffer].data.clone()
    }
}

impl GpuDevice for MockDevice {
    fn wait_idle(&self) -> Result<()> {
        self.state().wait_idle_calls += 1;
        Ok(())
    }

    fn get_queue(&self, _family: u32, _index: u32) -> vk::Queue {
        self.next()
    }

    fn queue_submit(&self, _queue: vk::Queue, submit: &SubmitDesc, fence: vk::Fence) -> Result<()> {
        let mut state = self.state();
        state.submits += 1;
        // Work completes immediately.
        for cmd in submit.command_buffers {
            for (src, dst, region) in state.recorded_copies.remove(cmd).unwrap_or_default() {
                let (from, to) = (region.src_offset as usize, region.dst_offset as usize);
                let bytes = state.buffers[&src].data[from..from + region.size as usize].to_vec();
                let target = state.buffers.get_mut(&dst).unwrap();
                target.data[to..to + bytes.len()].copy_from_slice(&bytes);
                *state.buffer_writes.entry(dst).or_default() += 1;
                state.copies_executed += 1;
            }
        }
        state
            .signaled_semaphores
            .extend_from_slice(submit.signal_semaphores);
        if fence != vk::Fence::null() {
            state.fences.insert(fence, true);
        }
        Ok(())
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory: MemoryType) -> Result<BufferAllocation> {
        let handle = self.next();
        self.state().buffers.insert(
            handle,
            MockBuffer {
                data: vec![0; size as usize],
                usage,
                memory,
            },
        );
        Ok(BufferAllocation {
            handle,
            size,
            host_visible: memory.is_host_visible(),
        })
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        let target = state.buffers.get_mut(&buffer).unwrap();
        assert!(target.memory.is_host_visible(), "host write to device local memory");
        let offset = offset as usize;
        target.data[offset..offset + data.len()].copy_from_slice(data);
        *state.buffer_writes.entry(buffer).or_default() += 1;
        Ok(())
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state().buffers.remove(&buffer);
    }

    fn create_image(&self, _desc: &ImageDesc) -> Result<ImageAllocation> {
        let image = self.next();
        let view = self.next();
        let mut state = self.state();
        state.images_created += 1;
        state.images_alive.insert(image);
        Ok(ImageAllocation {
            image,
            view,
        })
    }

    unsafe fn destroy_image(&self, image: &ImageAllocation) {
        self.state().images_alive.remove(&image.image);
    }

    fn create_render_pass(&self, _layout: &RenderPassLayout) -> Result<vk::RenderPass> {
        let handle = self.next();
        let mut state = self.state();
        state.render_passes_created += 1;
        state.render_passes_alive.insert(handle);
        Ok(handle)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state().render_passes_alive.remove(&render_pass);
    }

    fn create_framebuffer(&self, _render_pass: vk::RenderPass, _attachments: &[vk::ImageView], _extent: vk::Extent2D) -> Result<vk::Framebuffer> {
        let handle = self.next();
        let mut state = self.state();
        state.framebuffers_created += 1;
        state.framebuffers_alive.insert(handle);
        Ok(handle)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state().framebuffers_alive.remove(&framebuffer);
    }

    fn create_descriptor_set_layout(&self, _bindings: &[vk::DescriptorSetLayoutBinding]) -> Result<vk::DescriptorSetLayout> {
        let handle = self.next();
        self.state().set_layouts_alive.insert(handle);
        Ok(handle)
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state().set_layouts_alive.remove(&layout);
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout], _push_constants: &[vk::PushConstantRange]) -> Result<vk::PipelineLayout> {
        self.state().pipeline_layouts_created += 1;
        Ok(self.next())
    }

    unsafe fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {}

    fn create_command_pool(&self, family: u32, _flags: vk::CommandPoolCreateFlags) -> Result<vk::CommandPool> {
        let handle = self.next();
        self.state().command_pools.push((handle, family));
        Ok(handle)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state().command_pools.retain(|(handle, _)| *handle != pool);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let handle = self.next();
        self.state().command_buffers.insert(handle, pool);
        Ok(handle)
    }

    unsafe fn free_command_buffer(&self, pool: vk::CommandPool, cmd: vk::CommandBuffer) {
        let mut state = self.state();
        state.command_buffers.remove(&cmd);
        state.freed_command_buffers.push((pool, cmd));
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _flags: vk::CommandBufferUsageFlags) -> Result<()> {
        self.state().recorded_copies.remove(&cmd);
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        self.state()
            .recorded_copies
            .entry(cmd)
            .or_default()
            .push((src, dst, region));
    }

    fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _area: vk::Rect2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.state()
            .begun_render_passes
            .push((render_pass, framebuffer));
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {}

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let handle = self.next();
        self.state().fences.insert(handle, signaled);
        Ok(handle)
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> Result<()> {
        match self.state().fences.get(&fence) {
            Some(true) => Ok(()),
            _ => Err(vk::Result::TIMEOUT.into()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        self.state().fences.insert(fence, false);
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> Result<bool> {
        Ok(self.state().fences.get(&fence).copied().unwrap_or_default())
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.state().fences.remove(&fence);
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let handle = self.next();
        self.state().semaphores.insert(handle);
        Ok(handle)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().semaphores.remove(&semaphore);
    }
}

/// A fake swapchain handing out views that were never created on any device.
#[derive(Debug)]
pub struct MockSwapchain {
    pub extent: vk::Extent2D,
    pub views: Vec<vk::ImageView>,
}

impl MockSwapchain {
    pub fn new(width: u32, height: u32, image_count: usize) -> Self {
        MockSwapchain {
            extent: vk::Extent2D {
                width,
                height,
            },
            views: (0..image_count)
                .map(|index| vk::ImageView::from_raw(0xface_0000 + index as u64))
                .collect(),
        }
    }
}

impl Swapchain for MockSwapchain {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_count(&self) -> usize {
        self.views.len()
    }

    unsafe fn image_view(&self, index: usize) -> vk::ImageView {
        self.views[index]
    }
}

/// A family supporting everything, able to present.
pub fn universal_family(index: u32) -> QueueFamilyInfo {
    QueueFamilyInfo {
        index,
        flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        present: true,
    }
}

/// A typical discrete GPU layout: a universal family, an async compute family and a transfer-only family.
pub fn discrete_families() -> Vec<QueueFamilyInfo> {
    vec![
        universal_family(0),
        QueueFamilyInfo {
            index: 1,
            flags: vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            present: false,
        },
        QueueFamilyInfo {
            index: 2,
            flags: vk::QueueFlags::TRANSFER,
            present: false,
        },
    ]
}

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

/// Creates a context on a fresh mock device with the given queue families.
pub fn make_context_with(families: Vec<QueueFamilyInfo>, settings: ContextSettings) -> Result<(Arc<MockDevice>, Context<MockDevice>)> {
    init_logger();
    let device = MockDevice::new();
    let ctx = Context::new(device.clone(), Queues::new(families), settings)?;
    Ok((device, ctx))
}

/// Creates a context with the default settings on a device with a single universal queue family.
pub fn make_context() -> Result<(Arc<MockDevice>, Context<MockDevice>)> {
    make_context_with(vec![universal_family(0)], ContextSettings::default())
}
