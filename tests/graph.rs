use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use futures::executor::block_on;

use framegraph::*;

mod framework;

const SWAPCHAIN_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

fn black() -> Option<ClearValue> {
    Some(ClearValue::Color(ClearColor::Float([0.0, 0.0, 0.0, 1.0])))
}

fn far_plane() -> Option<ClearValue> {
    Some(ClearValue::DepthStencil {
        depth: 1.0,
        stencil: 0,
    })
}

/// Builds a step that appends its name to `log` when recorded.
fn logged(builder: RendererStepBuilder, log: &Arc<Mutex<Vec<String>>>) -> Arc<RendererStep> {
    let log = log.clone();
    builder
        .record(move |cmd| {
            log.lock().unwrap().push(cmd.name.to_owned());
            Ok(())
        })
        .build()
}

#[test]
pub fn equal_descriptions_share_a_render_pass() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let a = RendererStepBuilder::new("a").color(vk::Format::R8G8B8A8_UNORM, black()).build();
    let b = RendererStepBuilder::new("b").color(vk::Format::R8G8B8A8_UNORM, black()).build();
    let c = RendererStepBuilder::new("c").color(vk::Format::R8G8B8A8_UNORM, None).build();

    let pass_a = ctx.render_pass(a.infos())?;
    let pass_b = ctx.render_pass(b.infos())?;
    let pass_c = ctx.render_pass(c.infos())?;
    assert!(Arc::ptr_eq(&pass_a, &pass_b));
    assert!(!Arc::ptr_eq(&pass_a, &pass_c));
    assert_eq!(device.state().render_passes_created, 2);
    assert_eq!(ctx.cached_render_passes(), 2);
    Ok(())
}

#[test]
pub fn graph_instances_reuse_render_passes() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(800, 600, 2);
    let left = RendererStepBuilder::new("left").color(vk::Format::R16G16B16A16_SFLOAT, black()).build();
    let right = RendererStepBuilder::new("right").color(vk::Format::R16G16B16A16_SFLOAT, black()).build();
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, black())
        .depends_on(&left)
        .depends_on(&right)
        .build();
    let graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;

    let left = graph.instance(graph.find(&left).unwrap()).unwrap();
    let right = graph.instance(graph.find(&right).unwrap()).unwrap();
    assert!(Arc::ptr_eq(left.render_pass(), right.render_pass()));
    assert_eq!(device.state().render_passes_created, 2);
    Ok(())
}

#[test]
pub fn root_with_two_offscreen_children() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(1280, 720, 2);
    let a = RendererStepBuilder::new("A").color(vk::Format::R8G8B8A8_UNORM, black()).build();
    let b = RendererStepBuilder::new("B")
        .color(vk::Format::R8G8B8A8_UNORM, black())
        .depth(vk::Format::D32_SFLOAT, far_plane())
        .build();
    let root_step = RendererStepBuilder::new("Root")
        .present(SWAPCHAIN_FORMAT, black())
        .depends_on(&a)
        .depends_on(&b)
        .build();
    let graph = RenderPassRoot::new(&ctx, &root_step, &swapchain)?;

    assert_eq!(graph.instance_count(), 3);
    assert_eq!(graph.offscreen_count(), 2);
    let root = graph.instance(graph.root()).unwrap();
    assert!(root.is_root());
    assert!(Arc::ptr_eq(root.step(), &root_step));
    assert_eq!(graph.children(graph.root()), vec![graph.find(&a).unwrap(), graph.find(&b).unwrap()]);

    let b = graph.instance(graph.find(&b).unwrap()).unwrap();
    let target = b.offscreen_target().unwrap();
    assert_eq!(target.attachments().len(), 2);
    assert_eq!(target.extent(), swapchain.extent);
    assert_eq!(target.attachments()[1].format(), vk::Format::D32_SFLOAT);

    assert_eq!(root.present_target().unwrap().framebuffers().len(), 2);
    let state = device.state();
    // One image for A, two for B. The root only renders to the swapchain.
    assert_eq!(state.images_created, 3);
    // One framebuffer per offscreen pass, one per swapchain image for the root.
    assert_eq!(state.framebuffers_created, 4);
    Ok(())
}

#[test]
pub fn children_render_before_parents() -> Result<()> {
    let (_device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(640, 480, 2);
    let log = Arc::new(Mutex::new(Vec::new()));
    let shadow = logged(RendererStepBuilder::new("shadow").depth(vk::Format::D32_SFLOAT, far_plane()), &log);
    let gbuffer = logged(
        RendererStepBuilder::new("gbuffer")
            .color(vk::Format::R16G16B16A16_SFLOAT, black())
            .depth(vk::Format::D24_UNORM_S8_UINT, far_plane()),
        &log,
    );
    let lighting = logged(
        RendererStepBuilder::new("lighting")
            .color(vk::Format::R16G16B16A16_SFLOAT, None)
            .depends_on(&shadow)
            .depends_on(&gbuffer),
        &log,
    );
    let post = logged(
        RendererStepBuilder::new("post")
            .present(SWAPCHAIN_FORMAT, None)
            .depends_on(&lighting),
        &log,
    );
    let mut graph = RenderPassRoot::new(&ctx, &post, &swapchain)?;
    let executed = graph.render(&ctx, 0)?;

    assert_eq!(executed.len(), 4);
    for (position, handle) in executed.iter().enumerate() {
        for child in graph.children(*handle) {
            let child_position = executed.iter().position(|h| *h == child).unwrap();
            assert!(child_position < position);
        }
    }
    assert_eq!(*log.lock().unwrap(), vec!["shadow", "gbuffer", "lighting", "post"]);
    assert_eq!(executed.last(), Some(&graph.root()));
    Ok(())
}

#[test]
pub fn shared_dependency_is_instanced_and_rendered_once() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(640, 480, 2);
    let log = Arc::new(Mutex::new(Vec::new()));
    let depth = logged(RendererStepBuilder::new("depth prepass").depth(vk::Format::D32_SFLOAT, far_plane()), &log);
    let opaque = logged(
        RendererStepBuilder::new("opaque")
            .color(vk::Format::R8G8B8A8_UNORM, black())
            .depends_on(&depth),
        &log,
    );
    let ssao = logged(
        RendererStepBuilder::new("ssao")
            .color(vk::Format::R8_UNORM, None)
            .depends_on(&depth),
        &log,
    );
    let compose = logged(
        RendererStepBuilder::new("compose")
            .present(SWAPCHAIN_FORMAT, None)
            .depends_on(&opaque)
            .depends_on(&ssao),
        &log,
    );
    let mut graph = RenderPassRoot::new(&ctx, &compose, &swapchain)?;
    assert_eq!(graph.instance_count(), 4);
    let depth_handle = graph.find(&depth).unwrap();
    assert_eq!(graph.children(graph.find(&opaque).unwrap()), vec![depth_handle]);
    assert_eq!(graph.children(graph.find(&ssao).unwrap()), vec![depth_handle]);

    for frame in 0..3 {
        log.lock().unwrap().clear();
        ctx.begin_frame(frame)?;
        graph.render(&ctx, frame % 2)?;
        assert_eq!(*log.lock().unwrap(), vec!["depth prepass", "opaque", "ssao", "compose"]);
        assert!(graph.instance(depth_handle).unwrap().is_rendered());
    }
    assert_eq!(device.state().begun_render_passes.len(), 12);
    Ok(())
}

#[test]
pub fn root_renders_into_current_image() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(640, 480, 2);
    let main = RendererStepBuilder::new("main").present(SWAPCHAIN_FORMAT, black()).build();
    let mut graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    let framebuffers = graph
        .instance(graph.root())
        .unwrap()
        .present_target()
        .unwrap()
        .framebuffers()
        .iter()
        .map(|framebuffer| unsafe { framebuffer.handle() })
        .collect::<Vec<_>>();

    for image in [1, 0, 1] {
        ctx.begin_frame(image)?;
        graph.render(&ctx, image)?;
        let (_, framebuffer) = *device.state().begun_render_passes.last().unwrap();
        assert_eq!(framebuffer, framebuffers[image]);
    }
    Ok(())
}

#[test]
pub fn renders_into_acquired_image_with_fewer_frames_in_flight() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    assert_eq!(ctx.image_count(), 2);
    let swapchain = framework::MockSwapchain::new(640, 480, 3);
    let images = Arc::new(Mutex::new(Vec::new()));
    let recorded = images.clone();
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, black())
        .record(move |cmd| {
            recorded.lock().unwrap().push((cmd.image_index, cmd.swapchain_image));
            Ok(())
        })
        .build();
    let mut graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    let framebuffers = graph
        .instance(graph.root())
        .unwrap()
        .present_target()
        .unwrap()
        .framebuffers()
        .iter()
        .map(|framebuffer| unsafe { framebuffer.handle() })
        .collect::<Vec<_>>();

    for (frame, swapchain_image) in [(0, 2), (1, 0), (2, 1), (3, 2)] {
        ctx.begin_frame(frame)?;
        graph.render(&ctx, swapchain_image)?;
        graph.submit(swapchain_image, &[], None)?;
        let state = device.state();
        let (_, framebuffer) = *state.begun_render_passes.last().unwrap();
        assert_eq!(framebuffer, framebuffers[swapchain_image]);
        let signaled = unsafe { graph.render_finished(swapchain_image).unwrap().handle() };
        assert_eq!(state.signaled_semaphores.last(), Some(&signaled));
    }
    assert_eq!(*images.lock().unwrap(), vec![(0, 2), (1, 0), (0, 1), (1, 2)]);

    let err = graph.render(&ctx, 3).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::SwapchainImageOutOfRange { image: 3, count: 3 })
    ));
    assert!(graph.render_finished(3).is_none());
    Ok(())
}

#[test]
pub fn submit_signals_fence_and_semaphore() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(640, 480, 2);
    let main = RendererStepBuilder::new("main").present(SWAPCHAIN_FORMAT, black()).build();
    let mut graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    let acquired = Semaphore::new(device.clone())?;
    let fence = Fence::new(device.clone(), false)?;
    assert!(!fence.is_signaled()?);

    graph.render(&ctx, 0)?;
    graph.submit(0, &[unsafe { acquired.handle() }], Some(&fence))?;
    let signaled = unsafe { graph.render_finished(0).unwrap().handle() };
    assert_eq!(device.state().signaled_semaphores, vec![signaled]);
    assert_eq!(device.state().submits, 1);
    block_on(fence)?;
    Ok(())
}

#[test]
pub fn same_resolution_resize_keeps_offscreen_targets() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let mut swapchain = framework::MockSwapchain::new(1024, 768, 3);
    let gbuffer = RendererStepBuilder::new("gbuffer")
        .color(vk::Format::R8G8B8A8_UNORM, black())
        .depth(vk::Format::D32_SFLOAT, far_plane())
        .build();
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, black())
        .depends_on(&gbuffer)
        .build();
    let mut graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    let images = device.state().images_created;
    let framebuffers = device.state().framebuffers_created;
    assert_eq!(images, 2);

    graph.resize(&ctx, &swapchain)?;
    {
        let state = device.state();
        assert_eq!(state.images_created, images);
        // The root always rebuilds its framebuffers, the offscreen pass keeps its own.
        assert_eq!(state.framebuffers_created, framebuffers + 3);
    }

    swapchain = framework::MockSwapchain::new(1920, 1080, 2);
    let pending = ctx.pending_deletions();
    graph.resize(&ctx, &swapchain)?;
    assert_eq!(device.state().images_created, images + 2);
    // The old offscreen target and the old root framebuffers wait for the GPU.
    assert_eq!(ctx.pending_deletions(), pending + 2);
    let gbuffer = graph.instance(graph.find(&gbuffer).unwrap()).unwrap();
    assert_eq!(gbuffer.resolution(), Some(swapchain.extent));
    let root = graph.instance(graph.root()).unwrap();
    assert_eq!(root.present_target().unwrap().framebuffers().len(), 2);
    Ok(())
}

#[test]
pub fn resize_pass_visits_children_of_unchanged_passes() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(800, 600, 2);
    let inner = RendererStepBuilder::new("inner").color(vk::Format::R8G8B8A8_UNORM, None).build();
    let outer = RendererStepBuilder::new("outer")
        .color(vk::Format::R8G8B8A8_UNORM, None)
        .depends_on(&inner)
        .build();
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, None)
        .depends_on(&outer)
        .build();
    let mut graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    let images = device.state().images_created;
    let half = vk::Extent2D {
        width: 400,
        height: 300,
    };
    graph.resize_pass(&ctx, graph.find(&inner).unwrap(), half)?;
    assert_eq!(device.state().images_created, images + 1);

    // `outer` is already at this size, its child is brought back to it anyway.
    graph.resize_pass(&ctx, graph.find(&outer).unwrap(), swapchain.extent)?;
    assert_eq!(device.state().images_created, images + 2);
    assert_eq!(graph.instance(graph.find(&inner).unwrap()).unwrap().resolution(), Some(swapchain.extent));
    Ok(())
}

#[test]
pub fn root_owned_depth_is_shared_between_swapchain_images() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(800, 600, 3);
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, black())
        .depth(vk::Format::D32_SFLOAT, far_plane())
        .build();
    let graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    let target = graph.instance(graph.root()).unwrap().present_target().unwrap();
    assert_eq!(target.attachments().len(), 1);
    assert_eq!(target.framebuffers().len(), 3);
    assert_eq!(device.state().images_created, 1);
    Ok(())
}

#[test]
pub fn present_step_needs_present_attachment() -> Result<()> {
    let (_device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(800, 600, 2);
    let offscreen = RendererStepBuilder::new("offscreen").color(vk::Format::R8G8B8A8_UNORM, None).build();
    let err = RenderPassRoot::new(&ctx, &offscreen, &swapchain).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoPresentAttachment(name)) if name == "offscreen"));
    Ok(())
}

#[test]
pub fn two_depth_attachments_are_rejected() -> Result<()> {
    let (_device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(800, 600, 2);
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, None)
        .depth(vk::Format::D32_SFLOAT, None)
        .depth(vk::Format::D16_UNORM, None)
        .build();
    assert!(RenderPassRoot::new(&ctx, &main, &swapchain).is_err());
    Ok(())
}

#[test]
pub fn failing_record_callback_is_propagated() -> Result<()> {
    let (_device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(800, 600, 2);
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, None)
        .record(|_| Err(anyhow::anyhow!("draw failed")))
        .build();
    let mut graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    assert!(graph.render(&ctx, 0).is_err());
    assert!(!graph.instance(graph.root()).unwrap().is_rendered());
    Ok(())
}

#[test]
pub fn graph_exports_to_dot() -> Result<()> {
    let (_device, ctx) = framework::make_context()?;
    let swapchain = framework::MockSwapchain::new(800, 600, 2);
    let shadow = RendererStepBuilder::new("shadow").depth(vk::Format::D32_SFLOAT, far_plane()).build();
    let main = RendererStepBuilder::new("main")
        .present(SWAPCHAIN_FORMAT, None)
        .depends_on(&shadow)
        .build();
    let graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    let dot = graph.to_dot();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("shadow"));
    assert!(dot.contains("main"));
    assert!(dot.contains("->"));
    Ok(())
}
