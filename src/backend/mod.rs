//! Backend abstraction layer
//!
//! Provides the device and swapchain capabilities the render graph consumes, a headless
//! dummy implementation, and the Vulkan implementation.

pub mod command;
pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use command::*;
pub use traits::*;
pub use types::*;
