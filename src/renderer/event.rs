//! Synchronous callback lists

use std::fmt;
use std::time::Duration;

/// Ordered list of callbacks fired on the render thread
pub struct Event<T> {
    callbacks: Vec<Box<dyn FnMut(&T)>>,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Callbacks run in subscription order.
    pub fn subscribe(&mut self, callback: impl FnMut(&T) + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn fire(&mut self, value: &T) {
        for callback in &mut self.callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Passed to pre-submit callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Graph frame whose buffers and command buffers this frame uses.
    pub frame_index: u32,
    pub image_index: u32,
    /// Synchronization slot, always zero for the blocking renderer.
    pub slot: usize,
    /// Frames rendered since the renderer was created.
    pub frame_number: u64,
    /// Time since the renderer was created.
    pub elapsed: Duration,
    /// Time since the previous frame started.
    pub delta: Duration,
}

/// Events fired by a graph renderer
#[derive(Debug, Default)]
pub struct RendererEvents {
    /// Before the frame's command buffers are submitted.
    pub pre_submit: Event<FrameInfo>,
    /// After the swapchain and graph were rebuilt.
    pub recreate: Event<()>,
    pub image_acquired: Event<u32>,
    pub presented: Event<u32>,
}
