//! Stimulus Renderer - a render graph engine for visual stimuli
//!
//! Image, uniform and swapchain resources are connected to render, transfer and present
//! operations. Compiling the graph layers the operations into passes, creates one physical
//! backing per frame in flight and records every frame's command buffers up front, so a
//! running renderer only acquires, flushes uniforms, submits and presents.
//!
//! # Features
//! - Render graph with explicit layout transitions between passes
//! - WGSL shaders compiled to SPIR-V with naga, cached by source hash
//! - Reflected uniform blocks written through a typed accessor chain
//! - Blocking and multi-buffered renderers that survive swapchain recreation
//! - Vulkan backend via ash (feature `vulkan-backend`) and a headless dummy backend

pub mod backend;
pub mod config;
pub mod error;
pub mod render_graph;
pub mod renderer;
pub mod shader;
pub mod uniform;

pub use backend::dummy::{DummyDevice, DummySwapchain};
pub use backend::{GraphicsDevice, Swapchain};
pub use config::{CommandBufferStrategy, GraphSettings, PresentMode, RendererConfig};
pub use error::{GraphError, RendererError, ShaderError, UniformError};
pub use render_graph::RenderGraph;
pub use renderer::{
    BlockingGraphRenderer, GraphRenderer, RendererState, SynchronizedSwapchainGraphRenderer,
};
pub use shader::{ShaderCompiler, ShaderPipeline};
pub use uniform::UniformReflection;

#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::{VulkanDevice, VulkanSwapchain};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install an `env_logger` logger filtered by `RUST_LOG`, defaulting to `info`.
///
/// Does nothing if a logger is already installed.
pub fn init() {
    init_logging("info");
}

/// Like [`init`] with an explicit default filter such as `"debug"` or `"stimulus_renderer=trace"`.
pub fn init_logging(default_filter: &str) {
    let result = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .try_init();
    if result.is_ok() {
        log::info!("Stimulus Renderer v{}", VERSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_twice() {
        init();
        init_logging("debug");
    }
}
