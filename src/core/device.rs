//! The Vulkan implementation of [`GpuDevice`], built on `ash` and `gpu-allocator`.

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan as vk_alloc;
use gpu_allocator::vulkan::AllocationScheme;

use crate::core::traits::{BufferAllocation, GpuDevice, ImageAllocation, ImageDesc, SubmitDesc};
use crate::graph::render_pass::RenderPassLayout;
use crate::resource::memory_type::MemoryType;
use crate::Error;

#[derive(Derivative)]
#[derivative(Debug)]
struct DeviceInner {
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    // Wrapped in an option so it can be dropped before the device is destroyed.
    #[derivative(Debug = "ignore")]
    allocator: Mutex<Option<vk_alloc::Allocator>>,
    #[derivative(Debug = "ignore")]
    buffer_memory: Mutex<HashMap<vk::Buffer, vk_alloc::Allocation>>,
    #[derivative(Debug = "ignore")]
    image_memory: Mutex<HashMap<vk::Image, vk_alloc::Allocation>>,
    queue_families: Vec<u32>,
    properties: vk::PhysicalDeviceProperties,
}

/// Wrapper around a `VkDevice` and the memory allocator serving it. Internal state is wrapped in an `Arc<DeviceInner>`,
/// so this is safe to clone.
///
/// Memory allocations for buffers and images are owned by the device and keyed by the handle they are bound to,
/// so destroying a buffer or image through [`GpuDevice`] also releases its memory.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a logical device on `physical_device` with one queue for every family in `queue_families`.
    /// Duplicate families are only requested once.
    pub fn new(instance: &ash::Instance, physical_device: vk::PhysicalDevice, queue_families: &[u32], extensions: &[&CStr]) -> Result<Self> {
        let mut families = queue_families.to_vec();
        families.sort_unstable();
        families.dedup();

        let priorities = [1.0f32];
        let queue_create_infos = families
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect::<Vec<_>>();
        let extension_names = extensions.iter().map(|ext| ext.as_ptr()).collect::<Vec<*const c_char>>();
        for ext in extensions {
            info!("Enabling device extension {:?}", ext);
        }

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(queue_create_infos.as_slice())
            .enabled_extension_names(extension_names.as_slice());
        // SAFETY: All pointers in `info` point to locals that outlive this call.
        let handle = unsafe { instance.create_device(physical_device, &info, None)? };
        // SAFETY: physical_device is a valid handle obtained from `instance`.
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        let allocator = vk_alloc::Allocator::new(&vk_alloc::AllocatorCreateDesc {
            instance: instance.clone(),
            device: handle.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(err) => {
                // SAFETY: Nothing was created from this device yet.
                unsafe { handle.destroy_device(None) };
                return Err(Error::from(err).into());
            }
        };

        Ok(Device {
            inner: Arc::new(DeviceInner {
                handle,
                allocator: Mutex::new(Some(allocator)),
                buffer_memory: Default::default(),
                image_memory: Default::default(),
                queue_families: families,
                properties,
            }),
        })
    }

    /// Get unsafe access to the underlying VkDevice handle
    /// # Safety
    /// * The caller should not call `vkDestroyDevice` on this.
    /// * This handle is valid as long as there is a copy of `self` alive.
    pub unsafe fn handle(&self) -> ash::Device {
        self.inner.handle.clone()
    }

    /// Get the queue families we requested on this device.
    pub fn queue_families(&self) -> &[u32] {
        self.inner.queue_families.as_slice()
    }

    /// Get the device properties
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.inner.properties
    }

    fn allocate(&self, name: &str, requirements: vk::MemoryRequirements, memory: MemoryType, linear: bool) -> Result<vk_alloc::Allocation> {
        let mut allocator = self.inner.allocator.lock().map_err(|_| Error::PoisonError)?;
        let allocator = allocator.as_mut().ok_or(Error::Uncategorized("Allocator was already destroyed."))?;
        Ok(allocator.allocate(&vk_alloc::AllocationCreateDesc {
            name,
            requirements,
            location: memory.into(),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    fn free(&self, allocation: vk_alloc::Allocation) {
        let mut allocator = match self.inner.allocator.lock() {
            Ok(allocator) => allocator,
            Err(_) => {
                error!("Allocator mutex poisoned, leaking allocation");
                return;
            }
        };
        if let Some(allocator) = allocator.as_mut() {
            if let Err(err) = allocator.free(allocation) {
                error!("Error freeing memory: {err}");
            }
        }
    }

    fn buffer_memory(&self) -> Result<MutexGuard<HashMap<vk::Buffer, vk_alloc::Allocation>>> {
        Ok(self.inner.buffer_memory.lock().map_err(|_| Error::PoisonError)?)
    }
}

impl GpuDevice for Device {
    /// Wait for the device to be completely idle.
    /// This should not be used as a synchronization measure, except on exit or when replacing in-use resources.
    fn wait_idle(&self) -> Result<()> {
        unsafe { Ok(self.inner.handle.device_wait_idle()?) }
    }

    fn get_queue(&self, family: u32, index: u32) -> vk::Queue {
        // SAFETY: Only families in `queue_families` were requested with one queue each.
        unsafe { self.inner.handle.get_device_queue(family, index) }
    }

    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitDesc, fence: vk::Fence) -> Result<()> {
        let info = vk::SubmitInfo::builder()
            .wait_semaphores(submit.wait_semaphores)
            .wait_dst_stage_mask(submit.wait_stages)
            .command_buffers(submit.command_buffers)
            .signal_semaphores(submit.signal_semaphores)
            .build();
        unsafe { Ok(self.inner.handle.queue_submit(queue, slice::from_ref(&info), fence)?) }
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory: MemoryType) -> Result<BufferAllocation> {
        // Buffers are written on the transfer queue and read on the graphic queue, so share them between
        // all families instead of transferring ownership.
        let families = self.queue_families();
        let sharing_mode = if families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let mut info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode);
        if sharing_mode == vk::SharingMode::CONCURRENT {
            info = info.queue_family_indices(families);
        }
        let handle = unsafe { self.inner.handle.create_buffer(&info, None)? };
        let requirements = unsafe { self.inner.handle.get_buffer_memory_requirements(handle) };
        let allocation = self
            .allocate("buffer", requirements, memory, true)
            .and_then(|allocation| {
                unsafe {
                    self.inner
                        .handle
                        .bind_buffer_memory(handle, allocation.memory(), allocation.offset())?
                };
                Ok(allocation)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.inner.handle.destroy_buffer(handle, None) };
                return Err(err);
            }
        };
        let host_visible = allocation.mapped_ptr().is_some();
        self.buffer_memory()?.insert(handle, allocation);
        #[cfg(feature = "log-objects")]
        trace!("Created new VkBuffer {handle:p} (size = {size} bytes)");
        Ok(BufferAllocation {
            handle,
            size,
            host_visible,
        })
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut memory = self.buffer_memory()?;
        let allocation = memory
            .get_mut(&buffer)
            .ok_or(Error::Uncategorized("Buffer was not created by this device."))?;
        let capacity = allocation.size();
        let slice = allocation
            .mapped_slice_mut()
            .ok_or(Error::Uncategorized("Buffer memory is not host visible."))?;
        let end = offset + data.len() as vk::DeviceSize;
        if end > capacity {
            return Err(Error::BufferWriteOutOfRange {
                offset,
                size: data.len() as u64,
                capacity,
            }
            .into());
        }
        slice[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkBuffer {buffer:p}");
        self.inner.handle.destroy_buffer(buffer, None);
        let allocation = self.buffer_memory().ok().and_then(|mut memory| memory.remove(&buffer));
        if let Some(allocation) = allocation {
            self.free(allocation);
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageAllocation> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.inner.handle.create_image(&info, None)? };
        let requirements = unsafe { self.inner.handle.get_image_memory_requirements(image) };
        let allocation = self
            .allocate("attachment", requirements, MemoryType::GpuOnly, false)
            .and_then(|allocation| {
                unsafe {
                    self.inner
                        .handle
                        .bind_image_memory(image, allocation.memory(), allocation.offset())?
                };
                Ok(allocation)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.inner.handle.destroy_image(image, None) };
                return Err(err);
            }
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { self.inner.handle.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.inner.handle.destroy_image(image, None) };
                self.free(allocation);
                return Err(Error::from(err).into());
            }
        };
        self.inner
            .image_memory
            .lock()
            .map_err(|_| Error::PoisonError)?
            .insert(image, allocation);
        #[cfg(feature = "log-objects")]
        trace!("Created new VkImage {image:p} with view {view:p}");
        Ok(ImageAllocation {
            image,
            view,
        })
    }

    unsafe fn destroy_image(&self, image: &ImageAllocation) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkImage {:p}", image.image);
        self.inner.handle.destroy_image_view(image.view, None);
        self.inner.handle.destroy_image(image.image, None);
        let allocation = self
            .inner
            .image_memory
            .lock()
            .ok()
            .and_then(|mut memory| memory.remove(&image.image));
        if let Some(allocation) = allocation {
            self.free(allocation);
        }
    }

    fn create_render_pass(&self, layout: &RenderPassLayout) -> Result<vk::RenderPass> {
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(layout.color_references.as_slice());
        let subpass = match &layout.depth_reference {
            Some(depth) => subpass.depth_stencil_attachment(depth),
            None => subpass,
        }
        .build();
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(layout.attachments.as_slice())
            .subpasses(slice::from_ref(&subpass))
            .dependencies(layout.dependencies.as_slice());
        let handle = unsafe { self.inner.handle.create_render_pass(&info, None)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkRenderPass {handle:p}");
        Ok(handle)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkRenderPass {render_pass:p}");
        self.inner.handle.destroy_render_pass(render_pass, None);
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> Result<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { Ok(self.inner.handle.create_framebuffer(&info, None)?) }
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.inner.handle.destroy_framebuffer(framebuffer, None);
    }

    fn create_descriptor_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding]) -> Result<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe { Ok(self.inner.handle.create_descriptor_set_layout(&info, None)?) }
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.inner.handle.destroy_descriptor_set_layout(layout, None);
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constants: &[vk::PushConstantRange]) -> Result<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        unsafe { Ok(self.inner.handle.create_pipeline_layout(&info, None)?) }
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.inner.handle.destroy_pipeline_layout(layout, None);
    }

    fn create_command_pool(&self, family: u32, flags: vk::CommandPoolCreateFlags) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(family);
        let handle = unsafe { self.inner.handle.create_command_pool(&info, None)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkCommandPool {handle:p} for family {family}");
        Ok(handle)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkCommandPool {pool:p}");
        self.inner.handle.destroy_command_pool(pool, None);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = unsafe { self.inner.handle.allocate_command_buffers(&info)? }
            .into_iter()
            .next()
            .ok_or(Error::Uncategorized("Command buffer allocation failed."))?;
        Ok(handle)
    }

    unsafe fn free_command_buffer(&self, pool: vk::CommandPool, cmd: vk::CommandBuffer) {
        self.inner.handle.free_command_buffers(pool, slice::from_ref(&cmd));
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { Ok(self.inner.handle.begin_command_buffer(cmd, &info)?) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { Ok(self.inner.handle.end_command_buffer(cmd)?) }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        unsafe { self.inner.handle.cmd_copy_buffer(cmd, src, dst, slice::from_ref(&region)) }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(area)
            .clear_values(clear_values);
        unsafe {
            self.inner
                .handle
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.inner.handle.cmd_end_render_pass(cmd) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let info = vk::FenceCreateInfo::builder().flags(if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });
        unsafe { Ok(self.inner.handle.create_fence(&info, None)?) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> Result<()> {
        unsafe { Ok(self.inner.handle.wait_for_fences(slice::from_ref(&fence), true, timeout)?) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { Ok(self.inner.handle.reset_fences(slice::from_ref(&fence))?) }
    }

    fn fence_status(&self, fence: vk::Fence) -> Result<bool> {
        unsafe { Ok(self.inner.handle.get_fence_status(fence)?) }
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.inner.handle.destroy_fence(fence, None);
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { Ok(self.inner.handle.create_semaphore(&info, None)?) }
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.inner.handle.destroy_semaphore(semaphore, None);
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        let mut allocator = match self.allocator.lock() {
            Ok(mut allocator) => allocator.take(),
            Err(_) => None,
        };
        if let Some(allocator) = allocator.as_mut() {
            let leaked = self
                .buffer_memory
                .get_mut()
                .map(|memory| memory.drain().map(|(_, allocation)| allocation).collect::<Vec<_>>())
                .unwrap_or_default();
            if !leaked.is_empty() {
                warn!("{} buffer allocations were still alive when the device was destroyed", leaked.len());
            }
            for allocation in leaked {
                let _ = allocator.free(allocation);
            }
            if let Ok(memory) = self.image_memory.get_mut() {
                for (_, allocation) in memory.drain() {
                    let _ = allocator.free(allocation);
                }
            }
        }
        // The allocator must be gone before the device is.
        drop(allocator);
        unsafe {
            self.handle.destroy_device(None);
        }
    }
}
