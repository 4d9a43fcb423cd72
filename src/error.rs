//! Error types for the render graph, shader, uniform and renderer layers.

use thiserror::Error;

use crate::backend::BackendError;
use crate::backend::ShaderStage;
use crate::renderer::RendererState;

/// Errors raised while compiling a render graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// No operation qualifies for the first pass, or some operations can never be
    /// scheduled.
    #[error("Bad graph layout: {0}")]
    BadGraphLayout(String),

    /// A render operation writes images of different sizes.
    #[error("Inconsistent output image extents in operation {operation}")]
    InconsistentOutputExtents { operation: String },

    #[error("Invalid transfer operation {operation}: {reason}")]
    InvalidTransfer { operation: String, reason: String },

    #[error("Invalid present operation {operation}: {reason}")]
    InvalidPresent { operation: String, reason: String },

    #[error("Invalid vertex input of operation {operation}: {reason}")]
    InvalidVertexInput { operation: String, reason: String },

    #[error("Resource {resource} has no physical backing for frame {frame}")]
    MissingBacking { resource: String, frame: u32 },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors raised while compiling or reflecting shaders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderError {
    #[error("Failed to parse shader: {0}")]
    Parse(String),

    #[error("Shader validation failed: {0}")]
    Validation(String),

    #[error("Entry point {name} for the {stage} stage not found")]
    EntryPointNotFound { name: String, stage: ShaderStage },

    #[error("Failed to generate SPIR-V: {0}")]
    SpirvGeneration(String),

    #[error("Shader cache storage failed: {0}")]
    CacheStorage(String),
}

/// Errors raised by the uniform accessor chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniformError {
    #[error("Operation {0} has no reflected uniforms")]
    UnknownOperation(u32),

    #[error("No reflected uniforms for the {0} stage")]
    UnknownStage(ShaderStage),

    #[error("Uniform block {0} not found")]
    UnknownBlock(String),

    #[error("Uniform field {name} not found in {parent}")]
    UnknownField { name: String, parent: String },

    #[error("Uniform {0} is not an array")]
    NotAnArray(String),

    #[error("Index {index} out of range for {name} with {len} elements")]
    IndexOutOfRange { name: String, index: u32, len: u32 },

    #[error("Sampler {0} not found")]
    UnknownSampler(String),

    #[error("No uniform buffer compiled for frame {0}")]
    MissingBuffer(u32),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors raised while driving frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendererError {
    #[error("Renderer cannot render in state {0:?}")]
    InvalidState(RendererState),

    #[error("Render graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl RendererError {
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, RendererError::Backend(BackendError::OutOfDateSwapchain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::BadGraphLayout("no operation without producers".into());
        assert_eq!(
            err.to_string(),
            "Bad graph layout: no operation without producers"
        );

        let err = UniformError::UnknownField {
            name: "color".into(),
            parent: "Params".into(),
        };
        assert_eq!(err.to_string(), "Uniform field color not found in Params");
    }

    #[test]
    fn test_out_of_date_detection() {
        let err: RendererError = BackendError::OutOfDateSwapchain.into();
        assert!(err.is_out_of_date());
        let err: RendererError = BackendError::DeviceLost.into();
        assert!(!err.is_out_of_date());
    }
}
