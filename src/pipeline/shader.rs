use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ash::vk;

/// A descriptor binding declared by a shader.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShaderBinding {
    /// Descriptor set index
    pub set: u32,
    /// Binding index inside the set
    pub binding: u32,
    /// Type of the descriptor
    pub descriptor_type: vk::DescriptorType,
    /// Array size, 1 for non-array bindings
    pub count: u32,
}

/// The output of the shader compiler: SPIR-V code plus the resources the shader declares.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    stage: vk::ShaderStageFlags,
    code: Vec<u32>,
    code_hash: u64,
    bindings: Vec<ShaderBinding>,
    push_constant_size: u32,
}

impl CompiledShader {
    /// Wrap a SPIR-V binary. Declared resources are added with [`CompiledShader::binding`] and
    /// [`CompiledShader::push_constants`].
    pub fn from_spirv(stage: vk::ShaderStageFlags, code: Vec<u32>) -> Self {
        let mut hasher = DefaultHasher::new();
        code.hash(&mut hasher);
        Self {
            stage,
            code,
            code_hash: hasher.finish(),
            bindings: vec![],
            push_constant_size: 0,
        }
    }

    /// Declare a descriptor binding used by this shader.
    pub fn binding(mut self, set: u32, binding: u32, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.bindings.push(ShaderBinding {
            set,
            binding,
            descriptor_type,
            count,
        });
        self
    }

    /// Declare the size of the push constant block used by this shader, in bytes.
    pub fn push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }

    /// Stage this shader runs in.
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    /// The SPIR-V binary.
    pub fn code(&self) -> &[u32] {
        self.code.as_slice()
    }

    /// Hash of the SPIR-V binary.
    pub fn code_hash(&self) -> u64 {
        self.code_hash
    }

    /// Descriptor bindings declared with [`CompiledShader::binding`], in declaration order.
    pub fn bindings(&self) -> &[ShaderBinding] {
        self.bindings.as_slice()
    }

    /// Size of the push constant block in bytes, zero if the shader uses none.
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}
