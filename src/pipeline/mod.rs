//! Pipeline layouts derived from compiled shaders.
//!
//! Shader compilation and reflection happen outside of this crate. A [`CompiledShader`](shader::CompiledShader)
//! carries the SPIR-V code together with the resources it declares, which is all that is needed to derive a
//! [`PipelineLayoutInfo`](pipeline_layout::PipelineLayoutInfo). Layouts are then created and deduplicated through
//! [`Context::pipeline_layout`](crate::Context::pipeline_layout).

pub mod pipeline_layout;
pub mod shader;
