//! Declarative render steps. A [`RendererStep`] names a render pass description and the steps whose output it
//! consumes. Steps are shared through `Arc`s and identified by pointer, so one step can be a dependency of many others.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::graph::render_pass::{AttachmentInfo, ClearValue, RenderPassInfos};

/// Everything a step's record callback can use while its render pass instance is active.
#[derive(Debug, Copy, Clone)]
pub struct RecordContext<'a> {
    /// Name of the step being recorded.
    pub name: &'a str,
    /// Command buffer the pass is recorded into. The render pass is already begun.
    pub command_buffer: vk::CommandBuffer,
    /// Native render pass of the step.
    pub render_pass: vk::RenderPass,
    /// Size of the render area.
    pub extent: vk::Extent2D,
    /// Index of the in-flight image being rendered. Per-frame resources such as dynamic buffers are indexed by this.
    pub image_index: usize,
    /// Index of the swapchain image the frame presents to.
    pub swapchain_image: usize,
}

type RecordFn = dyn Fn(&RecordContext) -> Result<()> + Send + Sync;

/// A node in the declared render dependency graph. Build it with [`RendererStepBuilder`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RendererStep {
    name: String,
    infos: RenderPassInfos,
    dependencies: Vec<Arc<RendererStep>>,
    #[derivative(Debug = "ignore")]
    record: Option<Box<RecordFn>>,
}

impl RendererStep {
    /// Name of the step, used in logs and graph exports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The render pass description of this step.
    pub fn infos(&self) -> &RenderPassInfos {
        &self.infos
    }

    /// Steps whose output this step consumes, in declaration order.
    pub fn dependencies(&self) -> &[Arc<RendererStep>] {
        self.dependencies.as_slice()
    }

    /// Run the record callback, if any.
    pub fn record(&self, ctx: &RecordContext) -> Result<()> {
        match &self.record {
            Some(record) => record(ctx),
            None => Ok(()),
        }
    }
}

/// Used to create [`RendererStep`] objects.
/// # Example
/// ```
/// # use framegraph::*;
/// let shadow = RendererStepBuilder::new("shadow")
///     .depth(vk::Format::D32_SFLOAT, Some(ClearValue::DepthStencil { depth: 1.0, stencil: 0 }))
///     .build();
/// let main = RendererStepBuilder::new("main")
///     .present(vk::Format::B8G8R8A8_SRGB, Some(ClearValue::Color(ClearColor::Float([0.0, 0.0, 0.0, 1.0]))))
///     .depends_on(&shadow)
///     .build();
/// assert_eq!(main.dependencies().len(), 1);
/// ```
pub struct RendererStepBuilder {
    inner: RendererStep,
}

impl RendererStepBuilder {
    /// Start a new step without attachments or dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        RendererStepBuilder {
            inner: RendererStep {
                name: name.into(),
                infos: RenderPassInfos::new(),
                dependencies: vec![],
                record: None,
            },
        }
    }

    /// Add an attachment.
    pub fn attachment(mut self, attachment: AttachmentInfo) -> Self {
        self.inner.infos.attachments.push(attachment);
        self
    }

    /// Add an offscreen color attachment.
    pub fn color(self, format: vk::Format, clear_value: Option<ClearValue>) -> Self {
        self.attachment(AttachmentInfo {
            format,
            clear_value,
            present: false,
        })
    }

    /// Add a depth attachment.
    pub fn depth(self, format: vk::Format, clear_value: Option<ClearValue>) -> Self {
        self.attachment(AttachmentInfo {
            format,
            clear_value,
            present: false,
        })
    }

    /// Add the presentable swapchain image as a color attachment.
    pub fn present(self, format: vk::Format, clear_value: Option<ClearValue>) -> Self {
        self.attachment(AttachmentInfo {
            format,
            clear_value,
            present: true,
        })
    }

    /// Declare that this step consumes the output of `step`.
    pub fn depends_on(mut self, step: &Arc<RendererStep>) -> Self {
        self.inner.dependencies.push(step.clone());
        self
    }

    /// Set the callback recording draw commands while this step's render pass is active.
    pub fn record(mut self, f: impl Fn(&RecordContext) -> Result<()> + Send + Sync + 'static) -> Self {
        self.inner.record = Some(Box::new(f));
        self
    }

    /// Finish the step.
    pub fn build(self) -> Arc<RendererStep> {
        Arc::new(self.inner)
    }
}
