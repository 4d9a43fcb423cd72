//! WGSL to SPIR-V compilation and SPIR-V reflection through naga.

use crate::backend::ShaderStage;
use crate::config::RendererConfig;
use crate::error::ShaderError;

use super::cache::{cache_key, ShaderBinaryCache};
use super::reflection::{naga_stage, reflect_module, ShaderReflection};

/// Source of one shader stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    Wgsl(String),
    SpirV(Vec<u32>),
}

impl ShaderSource {
    pub fn wgsl(source: impl Into<String>) -> Self {
        ShaderSource::Wgsl(source.into())
    }
}

/// Shader stage ready for pipeline creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub spirv: Vec<u32>,
    pub reflection: ShaderReflection,
}

/// Compiles shader stages, reusing binaries from its cache
#[derive(Debug, Default)]
pub struct ShaderCompiler {
    cache: ShaderBinaryCache,
}

impl ShaderCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: ShaderBinaryCache) -> Self {
        Self { cache }
    }

    /// Persistent cache when the config names a directory, in memory otherwise.
    pub fn from_config(config: &RendererConfig) -> Result<Self, ShaderError> {
        let cache = match &config.shader_cache_dir {
            Some(dir) => ShaderBinaryCache::in_directory(dir)?,
            None => ShaderBinaryCache::in_memory(),
        };
        Ok(Self::with_cache(cache))
    }

    pub fn cache(&self) -> &ShaderBinaryCache {
        &self.cache
    }

    pub fn compile(
        &mut self,
        source: &ShaderSource,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<CompiledShader, ShaderError> {
        match source {
            ShaderSource::Wgsl(text) => self.compile_wgsl(text, stage, entry_point),
            ShaderSource::SpirV(words) => Self::load_spirv(words, stage, entry_point),
        }
    }

    fn compile_wgsl(
        &mut self,
        source: &str,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<CompiledShader, ShaderError> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| ShaderError::Parse(format!("WGSL parse error: {e}")))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator
            .validate(&module)
            .map_err(|e| ShaderError::Validation(e.to_string()))?;

        let not_found = || ShaderError::EntryPointNotFound {
            name: entry_point.to_string(),
            stage,
        };
        let naga_stage = naga_stage(stage).ok_or_else(not_found)?;
        let entry_index = module
            .entry_points
            .iter()
            .position(|ep| ep.name == entry_point && ep.stage == naga_stage)
            .ok_or_else(not_found)?;

        let key = cache_key(source, stage, entry_point);
        let spirv = match self.cache.get(key) {
            Some(spirv) => {
                log::trace!("Shader cache hit for {} {}", stage, entry_point);
                spirv
            }
            None => {
                let options = naga::back::spv::Options {
                    lang_version: (1, 3),
                    flags: naga::back::spv::WriterFlags::DEBUG,
                    capabilities: None,
                    bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
                    binding_map: Default::default(),
                    debug_info: None,
                    zero_initialize_workgroup_memory:
                        naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
                };
                let pipeline_options = naga::back::spv::PipelineOptions {
                    shader_stage: naga_stage,
                    entry_point: entry_point.to_string(),
                };
                let spirv =
                    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
                        .map_err(|e| ShaderError::SpirvGeneration(e.to_string()))?;
                self.cache.insert(key, &spirv);
                log::debug!(
                    "Compiled {} entry point {} ({} words)",
                    stage,
                    entry_point,
                    spirv.len()
                );
                spirv
            }
        };

        Ok(CompiledShader {
            stage,
            entry_point: entry_point.to_string(),
            spirv,
            reflection: reflect_module(&module, &info, Some(entry_index)),
        })
    }

    /// Reflect a precompiled binary.
    ///
    /// Stages naga cannot represent are reflected over every bound global.
    fn load_spirv(
        words: &[u32],
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<CompiledShader, ShaderError> {
        let module = naga::front::spv::parse_u8_slice(
            bytemuck::cast_slice(words),
            &naga::front::spv::Options::default(),
        )
        .map_err(|e| ShaderError::Parse(e.to_string()))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::empty(),
            naga::valid::Capabilities::all(),
        );
        let info = validator
            .validate(&module)
            .map_err(|e| ShaderError::Validation(e.to_string()))?;

        let entry_index = match naga_stage(stage) {
            Some(naga_stage) => Some(
                module
                    .entry_points
                    .iter()
                    .position(|ep| ep.name == entry_point && ep.stage == naga_stage)
                    .ok_or_else(|| ShaderError::EntryPointNotFound {
                        name: entry_point.to_string(),
                        stage,
                    })?,
            ),
            None => None,
        };

        Ok(CompiledShader {
            stage,
            entry_point: entry_point.to_string(),
            spirv: words.to_vec(),
            reflection: reflect_module(&module, &info, entry_index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
struct Params {
    tint: vec4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1);
    return vec4<f32>(x, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.tint;
}
"#;

    #[test]
    fn test_compile_wgsl_emits_spirv() {
        let mut compiler = ShaderCompiler::new();
        let shader = compiler
            .compile(&ShaderSource::wgsl(SOURCE), ShaderStage::Fragment, "fs_main")
            .unwrap();
        assert_eq!(shader.spirv[0], 0x0723_0203);
        assert_eq!(shader.reflection.blocks.len(), 1);
        assert_eq!(shader.reflection.blocks[0].size, 16);
    }

    #[test]
    fn test_second_compile_hits_cache() {
        let mut compiler = ShaderCompiler::new();
        let source = ShaderSource::wgsl(SOURCE);
        let first = compiler.compile(&source, ShaderStage::Vertex, "vs_main").unwrap();
        let second = compiler.compile(&source, ShaderStage::Vertex, "vs_main").unwrap();
        assert_eq!(first, second);
        assert_eq!(compiler.cache().misses(), 1);
        assert_eq!(compiler.cache().hits(), 1);
    }

    #[test]
    fn test_missing_entry_point() {
        let mut compiler = ShaderCompiler::new();
        let err = compiler
            .compile(&ShaderSource::wgsl(SOURCE), ShaderStage::Vertex, "fs_main")
            .unwrap_err();
        assert_eq!(
            err,
            ShaderError::EntryPointNotFound {
                name: "fs_main".into(),
                stage: ShaderStage::Vertex
            }
        );
    }

    #[test]
    fn test_parse_error() {
        let mut compiler = ShaderCompiler::new();
        let err = compiler
            .compile(&ShaderSource::wgsl("fn broken("), ShaderStage::Vertex, "main")
            .unwrap_err();
        assert!(matches!(err, ShaderError::Parse(_)));
    }
}
