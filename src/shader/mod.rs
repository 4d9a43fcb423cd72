//! Shader compilation, caching and reflection
//!
//! WGSL sources are compiled to SPIR-V with naga and cached by source hash in an explicit
//! [`ShaderBinaryCache`]. Every compiled stage carries the uniform blocks and samplers its
//! entry point uses, which is what the uniform layer builds on.

pub mod cache;
pub mod compiler;
pub mod pipeline;
pub mod reflection;

pub use cache::{cache_key, CacheStorage, DirectoryStorage, MemoryStorage, ShaderBinaryCache};
pub use compiler::{CompiledShader, ShaderCompiler, ShaderSource};
pub use pipeline::ShaderPipeline;
pub use reflection::{
    FieldKind, SamplerBinding, SamplerStateBinding, ShaderReflection, UniformBlockLayout,
    UniformField,
};
