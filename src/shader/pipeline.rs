//! Compiled shader stages of one render operation.

use crate::backend::ShaderStage;
use crate::error::ShaderError;

use super::compiler::{CompiledShader, ShaderCompiler, ShaderSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPipeline {
    stages: Vec<CompiledShader>,
}

impl ShaderPipeline {
    /// Stages are kept in pipeline order, one per stage kind.
    pub fn new(mut stages: Vec<CompiledShader>) -> Self {
        stages.sort_by_key(|shader| shader.stage);
        for pair in stages.windows(2) {
            assert!(
                pair[0].stage != pair[1].stage,
                "shader pipeline has two {} stages",
                pair[0].stage
            );
        }
        Self { stages }
    }

    /// Compile several entry points of one WGSL module.
    pub fn from_wgsl(
        compiler: &mut ShaderCompiler,
        source: &str,
        entry_points: &[(ShaderStage, &str)],
    ) -> Result<Self, ShaderError> {
        let source = ShaderSource::wgsl(source);
        let stages = entry_points
            .iter()
            .map(|(stage, entry)| compiler.compile(&source, *stage, entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(stages))
    }

    pub fn stages(&self) -> &[CompiledShader] {
        &self.stages
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&CompiledShader> {
        self.stages.iter().find(|shader| shader.stage == stage)
    }
}
