//! Wrapper structs around `VkPipelineLayout` objects.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::traits::GpuDevice;
use crate::pipeline::shader::CompiledShader;
use crate::util::cache::Resource;
use crate::{Device, Error};

/// A binding inside a descriptor set layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SetBinding {
    /// Binding index
    pub binding: u32,
    /// Type of the descriptor
    pub descriptor_type: vk::DescriptorType,
    /// Array size
    pub count: u32,
    /// Every stage that accesses this binding
    pub stages: vk::ShaderStageFlags,
}

/// Describes a descriptor set layout. Bindings are sorted by binding index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutInfo {
    pub bindings: Vec<SetBinding>,
}

/// Defines a range of Vulkan push constants.
#[derive(Debug, Clone, Default, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Shader stages where this push constant range is used
    pub stage_flags: vk::ShaderStageFlags,
    /// Offset into the global push constant block of this range
    pub offset: u32,
    /// Size of this push constant range
    pub size: u32,
}

impl PushConstantRange {
    pub fn to_vk(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stage_flags,
            offset: self.offset,
            size: self.size,
        }
    }
}

/// Define a pipeline layout, this includes all descriptor bindings and push constant ranges used by the pipeline.
/// Usually derived from the shaders of a pipeline with [`PipelineLayoutInfo::from_shaders`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PipelineLayoutInfo {
    /// Descriptor set layouts, indexed by set number. Sets not used by any shader are empty.
    pub sets: Vec<DescriptorSetLayoutInfo>,
    /// Push constant ranges used in this pipeline
    pub push_constants: Vec<PushConstantRange>,
}

impl PipelineLayoutInfo {
    /// Merge the resources declared by all shaders of a pipeline.
    ///
    /// A binding used by several stages appears once, with the stage flags combined. All push constant blocks are
    /// merged into a single range visible to every stage that declares one.
    /// # Errors
    /// * Fails if two shaders declare the same binding with different descriptor types.
    pub fn from_shaders(shaders: &[CompiledShader]) -> Result<Self> {
        let mut info = PipelineLayoutInfo::default();
        for shader in shaders {
            for binding in shader.bindings() {
                let set_index = binding.set as usize;
                if info.sets.len() <= set_index {
                    info.sets.resize_with(set_index + 1, Default::default);
                }
                let set = &mut info.sets[set_index];
                match set.bindings.iter_mut().find(|b| b.binding == binding.binding) {
                    Some(existing) => {
                        if existing.descriptor_type != binding.descriptor_type {
                            return Err(Error::Uncategorized("Shaders declare the same binding with different descriptor types.").into());
                        }
                        existing.stages |= shader.stage();
                        existing.count = existing.count.max(binding.count);
                    }
                    None => set.bindings.push(SetBinding {
                        binding: binding.binding,
                        descriptor_type: binding.descriptor_type,
                        count: binding.count,
                        stages: shader.stage(),
                    }),
                }
            }

            if shader.push_constant_size() > 0 {
                match info.push_constants.first_mut() {
                    Some(range) => {
                        range.stage_flags |= shader.stage();
                        range.size = range.size.max(shader.push_constant_size());
                    }
                    None => info.push_constants.push(PushConstantRange {
                        stage_flags: shader.stage(),
                        offset: 0,
                        size: shader.push_constant_size(),
                    }),
                }
            }
        }
        for set in &mut info.sets {
            set.bindings.sort_by_key(|binding| binding.binding);
        }
        Ok(info)
    }
}

/// A fully built Vulkan pipeline layout, owning its descriptor set layouts. Managed by the context cache.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PipelineLayout<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    handle: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl<D: GpuDevice> PipelineLayout<D> {
    /// Get unsafe access to the internal `VkPipelineLayout`.
    /// # Safety
    /// Any vulkan calls that mutate this pipeline layout may put the system in an undefined state.
    pub unsafe fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }

    /// Get the descriptor set layouts of this pipeline layout.
    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        self.set_layouts.as_slice()
    }

    fn destroy_set_layouts(device: &D, set_layouts: &[vk::DescriptorSetLayout]) {
        for layout in set_layouts {
            unsafe {
                device.destroy_descriptor_set_layout(*layout);
            }
        }
    }
}

impl<D: GpuDevice> Resource<D> for PipelineLayout<D> {
    type Key = PipelineLayoutInfo;

    fn create(device: Arc<D>, key: &Self::Key) -> Result<Self> {
        let mut set_layouts = Vec::with_capacity(key.sets.len());
        for set in &key.sets {
            let bindings = set
                .bindings
                .iter()
                .map(|binding| {
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(binding.binding)
                        .descriptor_type(binding.descriptor_type)
                        .descriptor_count(binding.count)
                        .stage_flags(binding.stages)
                        .build()
                })
                .collect::<Vec<_>>();
            match device.create_descriptor_set_layout(bindings.as_slice()) {
                Ok(layout) => set_layouts.push(layout),
                Err(err) => {
                    Self::destroy_set_layouts(&device, &set_layouts);
                    return Err(err);
                }
            }
        }

        let pc = key.push_constants.iter().map(|pc| pc.to_vk()).collect::<Vec<_>>();
        let handle = match device.create_pipeline_layout(set_layouts.as_slice(), pc.as_slice()) {
            Ok(handle) => handle,
            Err(err) => {
                Self::destroy_set_layouts(&device, &set_layouts);
                return Err(err);
            }
        };

        #[cfg(feature = "log-objects")]
        trace!("Created new VkPipelineLayout {handle:p}");

        Ok(Self {
            device,
            handle,
            set_layouts,
        })
    }
}

impl<D: GpuDevice> Drop for PipelineLayout<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkPipelineLayout {:p}", self.handle);
        unsafe {
            self.device.destroy_pipeline_layout(self.handle);
        }
        Self::destroy_set_layouts(&self.device, &self.set_layouts);
    }
}
