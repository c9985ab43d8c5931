//! Render pass descriptions, the derivation of native render pass layouts from them, and the deduplicated
//! [`RenderPassObject`].
//!
//! Every pass in the graph has exactly one subpass. Attachments are described in declaration order by
//! [`RenderPassInfos`], which is also the key render pass objects are deduplicated by.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::traits::GpuDevice;
use crate::util::cache;
use crate::{Device, Error};

/// Clear color for a color attachment.
#[derive(Debug, Copy, Clone)]
pub enum ClearColor {
    /// Clear value for float and normalized formats.
    Float([f32; 4]),
    /// Clear value for signed integer formats.
    Int([i32; 4]),
    /// Clear value for unsigned integer formats.
    Uint([u32; 4]),
}

/// Clear value of an attachment. Compared and hashed bitwise, so it can be part of a cache key.
#[derive(Debug, Copy, Clone)]
pub enum ClearValue {
    /// Clear value for a color attachment.
    Color(ClearColor),
    /// Clear value for a depth/stencil attachment.
    DepthStencil {
        /// Depth value
        depth: f32,
        /// Stencil value
        stencil: u32,
    },
}

impl ClearValue {
    fn bits(&self) -> (u8, [u32; 4]) {
        match self {
            ClearValue::Color(ClearColor::Float(v)) => (0, v.map(f32::to_bits)),
            ClearValue::Color(ClearColor::Int(v)) => (1, v.map(|x| x as u32)),
            ClearValue::Color(ClearColor::Uint(v)) => (2, *v),
            ClearValue::DepthStencil {
                depth,
                stencil,
            } => (3, [depth.to_bits(), *stencil, 0, 0]),
        }
    }

    /// Convert to the Vulkan representation.
    pub fn to_vk(&self) -> vk::ClearValue {
        match *self {
            ClearValue::Color(ClearColor::Float(values)) => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: values,
                },
            },
            ClearValue::Color(ClearColor::Int(values)) => vk::ClearValue {
                color: vk::ClearColorValue {
                    int32: values,
                },
            },
            ClearValue::Color(ClearColor::Uint(values)) => vk::ClearValue {
                color: vk::ClearColorValue {
                    uint32: values,
                },
            },
            ClearValue::DepthStencil {
                depth,
                stencil,
            } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth,
                    stencil,
                },
            },
        }
    }
}

impl PartialEq for ClearValue {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for ClearValue {}

impl Hash for ClearValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Whether a format holds depth data.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// A single attachment of a render pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentInfo {
    /// Pixel format. Depth formats are placed in the depth slot of the subpass.
    pub format: vk::Format,
    /// Clear value. If set the attachment is cleared on load, otherwise its previous contents are discarded.
    pub clear_value: Option<ClearValue>,
    /// Whether this attachment is the presentable swapchain image.
    pub present: bool,
}

impl AttachmentInfo {
    /// Whether this is a depth attachment.
    pub fn is_depth(&self) -> bool {
        is_depth_format(self.format)
    }

    /// Image usage needed for an image backing this attachment.
    pub fn usage(&self) -> vk::ImageUsageFlags {
        let attachment = if self.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
        attachment | vk::ImageUsageFlags::SAMPLED
    }

    /// Aspect of a view over an image backing this attachment.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    fn description(&self) -> vk::AttachmentDescription {
        let load_op = match self.clear_value {
            Some(_) => vk::AttachmentLoadOp::CLEAR,
            None => vk::AttachmentLoadOp::DONT_CARE,
        };
        let (stencil_load_op, stencil_store_op) = if has_stencil(self.format) {
            (load_op, vk::AttachmentStoreOp::STORE)
        } else {
            (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
        };
        vk::AttachmentDescription::builder()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(stencil_load_op)
            .stencil_store_op(stencil_store_op)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if self.present {
                vk::ImageLayout::PRESENT_SRC_KHR
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            })
            .build()
    }
}

/// Ordered description of all attachments of a render pass. Two passes with equal infos share one native render pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassInfos {
    /// Attachments in declaration order.
    pub attachments: Vec<AttachmentInfo>,
}

impl RenderPassInfos {
    /// Create an empty description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attachment.
    pub fn attachment(mut self, format: vk::Format, clear_value: Option<ClearValue>, present: bool) -> Self {
        self.attachments.push(AttachmentInfo {
            format,
            clear_value,
            present,
        });
        self
    }

    /// Whether any attachment is the presentable swapchain image.
    pub fn has_present_attachment(&self) -> bool {
        self.attachments.iter().any(|attachment| attachment.present)
    }

    /// One clear value per attachment, in attachment order. Attachments without a clear value get a zeroed entry,
    /// which is ignored since they are not cleared.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.attachments
            .iter()
            .map(|attachment| attachment.clear_value.map(|value| value.to_vk()).unwrap_or_default())
            .collect()
    }

    /// Derive the native render pass layout.
    pub fn layout(&self) -> Result<RenderPassLayout> {
        RenderPassLayout::derive(self)
    }
}

/// Everything needed to create a single-subpass native render pass.
#[derive(Debug, Clone)]
pub struct RenderPassLayout {
    /// One description per attachment, in declaration order.
    pub attachments: Vec<vk::AttachmentDescription>,
    /// References to the color attachments, in declaration order.
    pub color_references: Vec<vk::AttachmentReference>,
    /// Reference to the depth attachment, if there is one.
    pub depth_reference: Option<vk::AttachmentReference>,
    /// External dependencies bracketing the subpass.
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassLayout {
    /// Derive the layout from a description. Fails if more than one depth attachment is declared.
    pub fn derive(infos: &RenderPassInfos) -> Result<Self> {
        let mut color_references = Vec::new();
        let mut depth_reference = None;
        for (index, attachment) in infos.attachments.iter().enumerate() {
            if attachment.is_depth() {
                if depth_reference.is_some() {
                    return Err(Error::Uncategorized("A render pass can have at most one depth attachment.").into());
                }
                depth_reference = Some(vk::AttachmentReference {
                    attachment: index as u32,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                });
            } else {
                color_references.push(vk::AttachmentReference {
                    attachment: index as u32,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                });
            }
        }

        let color_access = vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        let dependencies = vec![
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags::MEMORY_READ,
                dst_access_mask: color_access,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                src_access_mask: color_access,
                dst_access_mask: vk::AccessFlags::MEMORY_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ];

        Ok(RenderPassLayout {
            attachments: infos.attachments.iter().map(AttachmentInfo::description).collect(),
            color_references,
            depth_reference,
            dependencies,
        })
    }
}

/// An immutable native render pass, created from and identified by its [`RenderPassInfos`].
/// Obtain these through [`Context::render_pass`](crate::Context::render_pass) so equal descriptions share one object.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RenderPassObject<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    handle: vk::RenderPass,
    infos: RenderPassInfos,
}

impl<D: GpuDevice> RenderPassObject<D> {
    /// Create a new render pass. Prefer going through the context cache.
    pub fn new(device: Arc<D>, infos: &RenderPassInfos) -> Result<Self> {
        let layout = infos.layout()?;
        let handle = device.create_render_pass(&layout)?;
        Ok(RenderPassObject {
            device,
            handle,
            infos: infos.clone(),
        })
    }

    /// Get unsafe access to the underlying `VkRenderPass`.
    /// # Safety
    /// The handle must not be destroyed manually, and must not be used after this object is dropped.
    pub unsafe fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// The description this pass was created from.
    pub fn infos(&self) -> &RenderPassInfos {
        &self.infos
    }
}

impl<D: GpuDevice> cache::Resource<D> for RenderPassObject<D> {
    type Key = RenderPassInfos;

    fn create(device: Arc<D>, key: &Self::Key) -> Result<Self> {
        Self::new(device, key)
    }
}

impl<D: GpuDevice> Drop for RenderPassObject<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.handle);
        }
    }
}
