//! Renderer and graph configuration.

use std::path::PathBuf;

use crate::backend::{Extent2d, Swapchain};

/// How the swapchain paces presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentMode {
    /// Wait for vertical blank, never tears
    #[default]
    Fifo,
    /// Replace the queued image, never tears
    Mailbox,
    /// Present as soon as possible, may tear
    Immediate,
}

/// Configuration for creating a device, swapchain and shader compiler
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Initial surface width
    pub width: u32,
    /// Initial surface height
    pub height: u32,
    /// Requested swapchain image count, clamped to what the surface supports
    pub image_count: u32,
    pub present_mode: PresentMode,
    /// Enable validation layers and route their messages to the log
    pub validation: bool,
    /// Directory for compiled shader binaries, in memory only when unset
    pub shader_cache_dir: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "Stimulus Renderer".to_string(),
            width: 1280,
            height: 720,
            image_count: 2,
            present_mode: PresentMode::Fifo,
            validation: cfg!(debug_assertions),
            shader_cache_dir: None,
        }
    }
}

/// How a frame's operations are split across command buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandBufferStrategy {
    /// Every operation of a frame in one command buffer
    #[default]
    Single,
    /// One command buffer per operation
    PerOperation,
}

/// Settings a render graph is compiled against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphSettings {
    /// Number of frames whose physical resources exist side by side
    pub frames_in_flight: u32,
    /// Surface width that relative image sizes resolve against
    pub width: u32,
    /// Surface height that relative image sizes resolve against
    pub height: u32,
    pub command_buffer_strategy: CommandBufferStrategy,
}

impl GraphSettings {
    pub fn new(frames_in_flight: u32, width: u32, height: u32) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");
        Self {
            frames_in_flight,
            width,
            height,
            command_buffer_strategy: CommandBufferStrategy::default(),
        }
    }

    /// One frame per swapchain image at the swapchain extent.
    pub fn from_swapchain(swapchain: &dyn Swapchain) -> Self {
        let extent = swapchain.extent();
        Self::new(swapchain.image_count(), extent.width, extent.height)
    }

    pub fn with_strategy(mut self, strategy: CommandBufferStrategy) -> Self {
        self.command_buffer_strategy = strategy;
        self
    }

    pub fn extent(&self) -> Extent2d {
        Extent2d::new(self.width, self.height)
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self::new(2, 500, 500)
    }
}
