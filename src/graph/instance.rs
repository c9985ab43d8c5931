//! Render pass instances: the nodes of a built render pass graph.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::traits::GpuDevice;
use crate::graph::framebuffer::Framebuffer;
use crate::graph::render_pass::RenderPassObject;
use crate::graph::step::RendererStep;
use crate::resource::image::Attachment;
use crate::wsi::Swapchain;
use crate::{Context, Device};

/// Images and framebuffer an offscreen pass renders into.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct OffscreenTarget<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    attachments: Vec<Attachment<D>>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl<D: GpuDevice> OffscreenTarget<D> {
    /// Allocate one image per attachment of `render_pass` and a framebuffer over them.
    pub fn new(device: Arc<D>, render_pass: &RenderPassObject<D>, extent: vk::Extent2D) -> Result<Self> {
        let attachments = render_pass
            .infos()
            .attachments
            .iter()
            .map(|info| Attachment::new(device.clone(), info, extent))
            .collect::<Result<Vec<_>>>()?;
        // SAFETY: The attachments are owned by this target and outlive the framebuffer.
        let views = attachments
            .iter()
            .map(|attachment| unsafe { attachment.view() })
            .collect::<Vec<_>>();
        let framebuffer = device.create_framebuffer(unsafe { render_pass.handle() }, views.as_slice(), extent)?;
        Ok(OffscreenTarget {
            device,
            attachments,
            framebuffer,
            extent,
        })
    }

    /// The images rendered to, in attachment order. These are left in a sampleable layout after the pass.
    pub fn attachments(&self) -> &[Attachment<D>] {
        self.attachments.as_slice()
    }

    /// Size of the target.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl<D: GpuDevice> Drop for OffscreenTarget<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer);
        }
    }
}

/// Resources owned by the root pass: one framebuffer per swapchain image, and the images backing all
/// non-presentable attachments (shared between swapchain images).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PresentTarget<D: GpuDevice = Device> {
    framebuffers: Vec<Framebuffer<D>>,
    attachments: Vec<Attachment<D>>,
    extent: vk::Extent2D,
}

impl<D: GpuDevice> PresentTarget<D> {
    /// Create framebuffers for every swapchain image.
    pub fn new(ctx: &Context<D>, render_pass: &RenderPassObject<D>, swapchain: &dyn Swapchain) -> Result<Self> {
        let extent = swapchain.extent();
        let infos = &render_pass.infos().attachments;
        let mut attachments = Vec::new();
        let mut owned = Vec::with_capacity(infos.len());
        for info in infos {
            if info.present {
                owned.push(None);
            } else {
                owned.push(Some(attachments.len()));
                attachments.push(Attachment::new(ctx.device().clone(), info, extent)?);
            }
        }

        let mut framebuffers = Vec::with_capacity(swapchain.image_count());
        for image in 0..swapchain.image_count() {
            // SAFETY: Swapchain views are valid until the next resize, which rebuilds these framebuffers.
            // Owned attachments live as long as the framebuffers.
            let views = owned
                .iter()
                .map(|owned| match owned {
                    Some(index) => unsafe { attachments[*index].view() },
                    None => unsafe { swapchain.image_view(image) },
                })
                .collect::<Vec<_>>();
            framebuffers.push(Framebuffer::new(ctx, render_pass, views.as_slice(), extent)?);
        }
        Ok(PresentTarget {
            framebuffers,
            attachments,
            extent,
        })
    }

    /// Framebuffers, indexed by swapchain image.
    pub fn framebuffers(&self) -> &[Framebuffer<D>] {
        self.framebuffers.as_slice()
    }

    /// Images backing the non-presentable attachments, in attachment order.
    pub fn attachments(&self) -> &[Attachment<D>] {
        self.attachments.as_slice()
    }

    /// Size of the swapchain this target was built for.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// The two kinds of pass instances.
#[derive(Derivative)]
#[derivative(Debug)]
pub enum PassKind<D: GpuDevice = Device> {
    /// A pass rendering into its own images. Empty until the first resize.
    Offscreen(Option<OffscreenTarget<D>>),
    /// The root pass, rendering into the swapchain.
    PresentRoot(Option<PresentTarget<D>>),
}

/// A node in the built graph: one step, the shared render pass object for it, and its render targets.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PassInstance<D: GpuDevice = Device> {
    step: Arc<RendererStep>,
    render_pass: Arc<RenderPassObject<D>>,
    kind: PassKind<D>,
    pub(crate) rendered: bool,
}

impl<D: GpuDevice> PassInstance<D> {
    pub(crate) fn offscreen(step: Arc<RendererStep>, render_pass: Arc<RenderPassObject<D>>) -> Self {
        PassInstance {
            step,
            render_pass,
            kind: PassKind::Offscreen(None),
            rendered: false,
        }
    }

    pub(crate) fn present_root(step: Arc<RendererStep>, render_pass: Arc<RenderPassObject<D>>) -> Self {
        PassInstance {
            step,
            render_pass,
            kind: PassKind::PresentRoot(None),
            rendered: false,
        }
    }

    /// The step this instance renders.
    pub fn step(&self) -> &Arc<RendererStep> {
        &self.step
    }

    /// The render pass object, shared with every instance whose step has the same description.
    pub fn render_pass(&self) -> &Arc<RenderPassObject<D>> {
        &self.render_pass
    }

    /// Render targets of this instance.
    pub fn kind(&self) -> &PassKind<D> {
        &self.kind
    }

    /// Whether this is the root pass.
    pub fn is_root(&self) -> bool {
        matches!(self.kind, PassKind::PresentRoot(_))
    }

    /// Whether this instance was rendered during the current frame.
    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    /// Size the instance currently renders at, `None` before the first resize.
    pub fn resolution(&self) -> Option<vk::Extent2D> {
        match &self.kind {
            PassKind::Offscreen(target) => target.as_ref().map(|target| target.extent()),
            PassKind::PresentRoot(target) => target.as_ref().map(|target| target.extent()),
        }
    }

    /// The offscreen target, for consumers that sample this pass's output.
    pub fn offscreen_target(&self) -> Option<&OffscreenTarget<D>> {
        match &self.kind {
            PassKind::Offscreen(target) => target.as_ref(),
            PassKind::PresentRoot(_) => None,
        }
    }

    /// The swapchain target of the root pass.
    pub fn present_target(&self) -> Option<&PresentTarget<D>> {
        match &self.kind {
            PassKind::PresentRoot(target) => target.as_ref(),
            PassKind::Offscreen(_) => None,
        }
    }

    /// Framebuffer to render into when the frame targets swapchain image `swapchain_image`.
    pub(crate) fn framebuffer(&self, swapchain_image: usize) -> Option<vk::Framebuffer> {
        match &self.kind {
            PassKind::Offscreen(target) => target.as_ref().map(|target| target.framebuffer),
            // SAFETY: The framebuffer is used for recording while this instance is alive.
            PassKind::PresentRoot(target) => target
                .as_ref()
                .and_then(|target| target.framebuffers.get(swapchain_image))
                .map(|framebuffer| unsafe { framebuffer.handle() }),
        }
    }

    /// Reallocate the offscreen target at a new resolution. Returns whether anything was reallocated.
    /// The old target is destroyed once the GPU is done with it.
    pub(crate) fn resize_offscreen(&mut self, ctx: &Context<D>, extent: vk::Extent2D) -> Result<bool> {
        if self.resolution() == Some(extent) {
            return Ok(false);
        }
        let PassKind::Offscreen(target) = &mut self.kind else {
            return Ok(false);
        };
        let new = OffscreenTarget::new(ctx.device().clone(), &self.render_pass, extent)?;
        if let Some(old) = target.replace(new) {
            ctx.drop_resource(old);
        }
        debug!("Resized offscreen pass `{}` to {}x{}", self.step.name(), extent.width, extent.height);
        Ok(true)
    }

    /// Rebuild the framebuffers of the root pass. Always reallocates, since the swapchain images change on every resize.
    pub(crate) fn rebuild_present(&mut self, ctx: &Context<D>, swapchain: &dyn Swapchain) -> Result<()> {
        let PassKind::PresentRoot(target) = &mut self.kind else {
            return Ok(());
        };
        let new = PresentTarget::new(ctx, &self.render_pass, swapchain)?;
        if let Some(old) = target.replace(new) {
            ctx.drop_resource(old);
        }
        let extent = swapchain.extent();
        debug!(
            "Rebuilt {} framebuffers of root pass `{}` at {}x{}",
            swapchain.image_count(),
            self.step.name(),
            extent.width,
            extent.height
        );
        Ok(())
    }
}
