//! The [`Context`] ties the device, its queues and the per-frame bookkeeping together. It is passed explicitly to
//! every operation that needs to create, upload to or destroy GPU objects.

use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use ash::vk;

use crate::command_buffer::CommandBuffer;
use crate::core::app_info::ContextSettings;
use crate::core::queue::{QueueRole, Queues};
use crate::core::traits::GpuDevice;
use crate::graph::render_pass::{RenderPassInfos, RenderPassObject};
use crate::pipeline::pipeline_layout::{PipelineLayout, PipelineLayoutInfo};
use crate::util::cache::Cache;
use crate::util::deferred_delete::DeletionQueue;
use crate::{Device, Error};

type Deferred = Box<dyn Send>;

/// Deletion queue shared between the context and objects that defer their own destruction when dropped.
pub(crate) type SharedDeletionQueue = Arc<Mutex<DeletionQueue<Deferred>>>;

/// Push `resource` onto a shared deletion queue. If the queue is poisoned the resource is dropped right away.
pub(crate) fn defer_drop<T: Send + 'static>(queue: &SharedDeletionQueue, resource: T) {
    match queue.lock() {
        Ok(mut queue) => queue.push(Box::new(resource)),
        Err(_) => {
            error!("Deletion queue poisoned, destroying resource immediately");
        }
    }
}

/// Shared state of a renderer. See the module level documentation.
///
/// The context tracks which in-flight image is currently being rendered. Dynamic and immediate buffers use this to
/// pick the copy of their data that is safe to write to.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Context<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    queues: Queues<D>,
    settings: ContextSettings,
    current_image: AtomicUsize,
    #[derivative(Debug = "ignore")]
    render_passes: Mutex<Cache<D, RenderPassObject<D>>>,
    #[derivative(Debug = "ignore")]
    pipeline_layouts: Mutex<Cache<D, PipelineLayout<D>>>,
    #[derivative(Debug = "ignore")]
    deletion_queue: SharedDeletionQueue,
}

impl<D: GpuDevice> Context<D> {
    /// Create a new context. Binds the native queue and command pool of every family that was assigned a role.
    /// # Errors
    /// * Fails if `settings.in_flight` is zero.
    pub fn new(device: Arc<D>, queues: Queues<D>, settings: ContextSettings) -> Result<Self> {
        if settings.in_flight == 0 {
            return Err(Error::NoImagesInFlight.into());
        }
        queues.init_queues(&device, settings.command_pool_flags)?;
        info!(
            "Created context `{}` with {} images in flight ({} queue families in use)",
            settings.name,
            settings.in_flight,
            queues.used_families().len()
        );
        Ok(Context {
            render_passes: Mutex::new(Cache::new(device.clone(), settings.cache_ttl)),
            pipeline_layouts: Mutex::new(Cache::new(device.clone(), settings.cache_ttl)),
            deletion_queue: Arc::new(Mutex::new(DeletionQueue::new(settings.deletion_latency))),
            current_image: AtomicUsize::new(0),
            device,
            queues,
            settings,
        })
    }

    /// The device this context drives.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// The queue families and their role assignment.
    pub fn queues(&self) -> &Queues<D> {
        &self.queues
    }

    /// The settings this context was created with.
    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Number of images in flight.
    pub fn image_count(&self) -> usize {
        self.settings.in_flight
    }

    /// Index of the in-flight image currently being rendered.
    pub fn current_image(&self) -> usize {
        self.current_image.load(Ordering::Acquire)
    }

    /// Start a new frame rendering to in-flight image `image` (wrapped to the image count).
    /// This ages the caches and destroys deferred objects whose latency has expired.
    pub fn begin_frame(&self, image: usize) -> Result<()> {
        self.current_image
            .store(image % self.image_count(), Ordering::Release);
        self.deletion_queue()?.next_frame();
        self.render_passes
            .lock()
            .map_err(|_| Error::PoisonError)?
            .next_frame();
        self.pipeline_layouts
            .lock()
            .map_err(|_| Error::PoisonError)?
            .next_frame();
        Ok(())
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    fn deletion_queue(&self) -> Result<MutexGuard<DeletionQueue<Deferred>>> {
        Ok(self.deletion_queue.lock().map_err(|_| Error::PoisonError)?)
    }

    /// Keep `resource` alive until the GPU can no longer be using it, then drop it.
    pub fn drop_resource<T: Send + 'static>(&self, resource: T) {
        defer_drop(&self.deletion_queue, resource);
    }

    pub(crate) fn shared_deletion_queue(&self) -> SharedDeletionQueue {
        self.deletion_queue.clone()
    }

    /// Number of objects waiting for deferred destruction.
    pub fn pending_deletions(&self) -> usize {
        self.deletion_queue().map(|queue| queue.len()).unwrap_or_default()
    }

    /// Get the render pass object for a description, creating it on first use.
    /// Equal descriptions always yield the same object.
    pub fn render_pass(&self, infos: &RenderPassInfos) -> Result<Arc<RenderPassObject<D>>> {
        self.render_passes
            .lock()
            .map_err(|_| Error::PoisonError)?
            .get_or_create(infos)
    }

    /// Number of distinct render pass objects alive in the cache.
    pub fn cached_render_passes(&self) -> usize {
        self.render_passes.lock().map(|cache| cache.len()).unwrap_or_default()
    }

    /// Get the pipeline layout for a description, creating it on first use.
    pub fn pipeline_layout(&self, info: &PipelineLayoutInfo) -> Result<Arc<PipelineLayout<D>>> {
        self.pipeline_layouts
            .lock()
            .map_err(|_| Error::PoisonError)?
            .get_or_create(info)
    }

    /// Allocate a command buffer on the calling thread for the family assigned to `role`.
    /// Falls back to the graphic family if the role is unassigned.
    pub fn command_buffer(&self, role: QueueRole) -> Result<CommandBuffer<D>> {
        CommandBuffer::new(self.queues.get_or_graphic(role)?)
    }
}

impl Context<Device> {
    /// Create a Vulkan device on `physical_device` and a context for it. Queues are enumerated from the physical
    /// device, with `present_support` deciding which families can present to the target surface.
    pub fn from_physical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        present_support: impl Fn(u32) -> bool,
        settings: ContextSettings,
    ) -> Result<Self> {
        let queues = Queues::from_physical_device(instance, physical_device, present_support);
        let mut extensions: Vec<&CStr> = Vec::new();
        if queues.get(QueueRole::Present).is_some() {
            extensions.push(ash::extensions::khr::Swapchain::name());
        }
        let device = Device::new(instance, physical_device, &queues.used_families(), &extensions)?;
        Self::new(Arc::new(device), queues, settings)
    }
}

impl<D: GpuDevice> Drop for Context<D> {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            warn!("Failed to wait for device idle while destroying context: {err}");
        }
        if let Ok(mut queue) = self.deletion_queue.lock() {
            queue.flush();
        }
        if let Ok(cache) = self.render_passes.get_mut() {
            cache.clear();
        }
        if let Ok(cache) = self.pipeline_layouts.get_mut() {
            cache.clear();
        }
    }
}
