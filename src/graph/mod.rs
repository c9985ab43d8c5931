//! The graph module turns declared render steps into a tree of render pass instances and records it every frame.
//!
//! - The [`step`] module defines [`RendererStep`](step::RendererStep), the declarative description of one render
//!   pass and the steps it depends on.
//! - The [`render_pass`] module describes attachments and derives deduplicated native render passes from them.
//! - The [`root`] module builds the instance tree for a presenting step, and handles resizing and per-frame recording.
//!
//! # Example
//! ```
//! # use framegraph::*;
//! # use std::sync::Arc;
//! # use anyhow::Result;
//! fn build(ctx: &Context, swapchain: &dyn Swapchain, format: vk::Format) -> Result<RenderPassRoot> {
//!     let gbuffer = RendererStepBuilder::new("gbuffer")
//!         .color(vk::Format::R16G16B16A16_SFLOAT, Some(ClearValue::Color(ClearColor::Float([0.0; 4]))))
//!         .depth(vk::Format::D32_SFLOAT, Some(ClearValue::DepthStencil { depth: 1.0, stencil: 0 }))
//!         .build();
//!     let lighting = RendererStepBuilder::new("lighting")
//!         .present(format, None)
//!         .depends_on(&gbuffer)
//!         .build();
//!     RenderPassRoot::new(ctx, &lighting, swapchain)
//! }
//! ```

pub mod framebuffer;
pub mod instance;
pub mod render_pass;
pub mod root;
pub mod step;
