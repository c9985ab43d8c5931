//! Render graph and frame resource core on top of Vulkan.
//!
//! Framegraph takes care of the parts of a renderer that sit between the raw Vulkan device and the code that
//! records draw calls:
//!
//! - Picking a queue family for every [`QueueRole`], preferring dedicated families.
//! - Command buffers allocated from per-thread command pools.
//! - [`Buffer`]s that are multi-buffered across images in flight, according to how often they are written.
//! - Render passes deduplicated by their attachment description.
//! - A tree of render pass instances built from declared [`RendererStep`]s, with offscreen targets that follow the
//!   swapchain resolution.
//!
//! Everything talks to the GPU through the [`GpuDevice`] trait. [`Device`] implements it on top of `ash` and
//! `gpu-allocator`.
//!
//! # Example
//!
//! Creating the window, surface and swapchain is left to the application. Given a physical device and a way to
//! query surface support, a [`Context`] is created with
//! ```no_run
//! use framegraph::*;
//! # fn run(instance: &ash::Instance, physical_device: vk::PhysicalDevice, swapchain: &dyn Swapchain) -> anyhow::Result<()> {
//! let settings = ContextBuilder::new()
//!     .name("framegraph demo")
//!     .in_flight(swapchain.image_count())
//!     .build();
//! // Every family can present in this example.
//! let ctx = Context::from_physical_device(instance, physical_device, |_| true, settings)?;
//! # Ok(())
//! # }
//! ```
//! The render graph is then described by steps, and built into a [`RenderPassRoot`].
//! ```no_run
//! # use framegraph::*;
//! # fn run(ctx: &Context, swapchain: &dyn Swapchain) -> anyhow::Result<()> {
//! let main = RendererStepBuilder::new("main")
//!     .present(vk::Format::B8G8R8A8_SRGB, Some(ClearValue::Color(ClearColor::Float([0.0, 0.0, 0.0, 1.0]))))
//!     .record(|cmd| {
//!         // Draw calls go here
//!         Ok(())
//!     })
//!     .build();
//! let mut graph = RenderPassRoot::new(ctx, &main, swapchain)?;
//! let fence = Fence::new(ctx.device().clone(), false)?;
//!
//! // Every frame, with the in-flight frame index and the index of the acquired swapchain image:
//! let (frame, swapchain_image) = (0, 0);
//! ctx.begin_frame(frame)?;
//! graph.render(ctx, swapchain_image)?;
//! graph.submit(swapchain_image, &[], Some(&fence))?;
//! fence.wait()?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod command_buffer;
pub mod core;
pub mod graph;
pub mod pipeline;
pub mod resource;
pub mod sync;
pub mod util;
pub mod wsi;
