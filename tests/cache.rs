use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use framegraph::*;

mod framework;

fn shaders() -> Vec<CompiledShader> {
    vec![
        CompiledShader::from_spirv(vk::ShaderStageFlags::VERTEX, vec![0x07230203, 1])
            .binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)
            .push_constants(64),
        CompiledShader::from_spirv(vk::ShaderStageFlags::FRAGMENT, vec![0x07230203, 2])
            .binding(1, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
    ]
}

#[test]
pub fn pipeline_layouts_are_shared() -> Result<()> {
    let (device, ctx) = framework::make_context()?;
    let info = PipelineLayoutInfo::from_shaders(&shaders())?;
    let a = ctx.pipeline_layout(&info)?;
    let b = ctx.pipeline_layout(&info)?;
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.set_layouts().len(), 2);
    assert_eq!(device.state().pipeline_layouts_created, 1);
    Ok(())
}

#[test]
pub fn unused_cache_entries_expire() -> Result<()> {
    let settings = ContextBuilder::new().cache_ttl(2).build();
    let (device, ctx) = framework::make_context_with(vec![framework::universal_family(0)], settings)?;
    let info = PipelineLayoutInfo::from_shaders(&shaders())?;
    let layout = ctx.pipeline_layout(&info)?;

    // Referenced entries never expire.
    for frame in 0..5 {
        ctx.begin_frame(frame)?;
    }
    assert_eq!(device.state().set_layouts_alive.len(), 2);

    drop(layout);
    ctx.begin_frame(0)?;
    assert_eq!(device.state().set_layouts_alive.len(), 2);
    ctx.begin_frame(1)?;
    assert!(device.state().set_layouts_alive.is_empty());

    // Requesting it again creates a new one.
    ctx.pipeline_layout(&info)?;
    assert_eq!(device.state().pipeline_layouts_created, 2);
    Ok(())
}

#[test]
pub fn render_passes_outlive_graph_until_expired() -> Result<()> {
    let settings = ContextBuilder::new().cache_ttl(1).build();
    let (device, ctx) = framework::make_context_with(vec![framework::universal_family(0)], settings)?;
    let swapchain = framework::MockSwapchain::new(320, 240, 2);
    let main = RendererStepBuilder::new("main")
        .present(vk::Format::B8G8R8A8_SRGB, None)
        .build();
    let graph = RenderPassRoot::new(&ctx, &main, &swapchain)?;
    assert_eq!(device.state().render_passes_alive.len(), 1);

    drop(graph);
    assert_eq!(ctx.cached_render_passes(), 1);
    ctx.begin_frame(0)?;
    assert_eq!(ctx.cached_render_passes(), 0);
    assert!(device.state().render_passes_alive.is_empty());
    Ok(())
}
