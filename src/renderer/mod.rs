//! Frame drivers for a compiled render graph
//!
//! A renderer owns the graph and the swapchain, acquires images, fires the pre-submit event
//! (where uniform values are flushed), submits and presents. An out-of-date swapchain is
//! recreated transparently, recompiling the graph against the new extent.

pub mod blocking;
pub mod event;
pub mod observer;
pub mod synchronized;

pub use blocking::{BlockingFrames, BlockingGraphRenderer};
pub use event::{Event, FrameInfo, RendererEvents};
pub use observer::{FrameDisplayObserver, LoggingObserver};
pub use synchronized::{SynchronizedFrames, SynchronizedSwapchainGraphRenderer};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{GraphicsDevice, Swapchain};
use crate::config::GraphSettings;
use crate::error::RendererError;
use crate::render_graph::RenderGraph;

/// Lifecycle of a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    /// The graph has not been compiled yet.
    Idle,
    Compiled,
    Rendering,
    OutOfDate,
    Recreating,
    Destroyed,
}

/// Object safe interface shared by every renderer
pub trait GraphRenderer {
    fn render_next_frame(&mut self) -> Result<(), RendererError>;

    fn state(&self) -> RendererState;

    fn events_mut(&mut self) -> &mut RendererEvents;

    fn graph(&self) -> &RenderGraph;

    /// Topology changes take effect after the next [`RecreatableGraphRenderer::compile`].
    fn graph_mut(&mut self) -> &mut RenderGraph;

    fn add_observer(&mut self, observer: Box<dyn FrameDisplayObserver>);

    /// Wait for the device and release the renderer's sync objects.
    fn destroy(&mut self);
}

/// Everything a [`FrameStrategy`] may touch while rendering one frame
pub struct FrameContext<'a> {
    pub graph: &'a RenderGraph,
    pub swapchain: &'a dyn Swapchain,
    pub events: &'a mut RendererEvents,
    pub observers: &'a mut [Box<dyn FrameDisplayObserver>],
    pub frame_number: u64,
    pub elapsed: Duration,
    pub delta: Duration,
}

impl FrameContext<'_> {
    pub fn device(&self) -> &dyn GraphicsDevice {
        self.graph.device().as_ref()
    }

    pub fn notify(&mut self, mut hook: impl FnMut(&mut dyn FrameDisplayObserver)) {
        for observer in self.observers.iter_mut() {
            hook(observer.as_mut());
        }
    }

    pub fn frame_info(&self, frame_index: u32, image_index: u32, slot: usize) -> FrameInfo {
        FrameInfo {
            frame_index,
            image_index,
            slot,
            frame_number: self.frame_number,
            elapsed: self.elapsed,
            delta: self.delta,
        }
    }
}

/// How a renderer turns one call into acquire, submit and present
pub trait FrameStrategy {
    fn render_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<(), RendererError>;

    /// Called once the swapchain was recreated and the graph recompiled with `settings`.
    fn on_recreated(
        &mut self,
        device: &dyn GraphicsDevice,
        settings: &GraphSettings,
    ) -> Result<(), RendererError>;

    fn destroy(&mut self, device: &dyn GraphicsDevice);
}

/// Renderer that recreates the swapchain and recompiles the graph when it goes out of date
pub struct RecreatableGraphRenderer<S: FrameStrategy> {
    graph: RenderGraph,
    swapchain: Arc<dyn Swapchain>,
    strategy: S,
    events: RendererEvents,
    observers: Vec<Box<dyn FrameDisplayObserver>>,
    state: RendererState,
    started: Instant,
    last_frame: Option<Instant>,
    frame_number: u64,
}

impl<S: FrameStrategy> RecreatableGraphRenderer<S> {
    pub fn with_strategy(graph: RenderGraph, swapchain: Arc<dyn Swapchain>, strategy: S) -> Self {
        let state = if graph.is_compiled() {
            RendererState::Compiled
        } else {
            RendererState::Idle
        };
        Self {
            graph,
            swapchain,
            strategy,
            events: RendererEvents::default(),
            observers: Vec::new(),
            state,
            started: Instant::now(),
            last_frame: None,
            frame_number: 0,
        }
    }

    /// Compile the graph against the swapchain's extent and image count.
    pub fn compile(&mut self) -> Result<(), RendererError> {
        if self.state == RendererState::Destroyed {
            return Err(RendererError::InvalidState(self.state));
        }
        let settings = self.swapchain_settings();
        self.graph.compile_resources(&settings)?;
        self.graph.compile(&settings)?;
        self.strategy
            .on_recreated(self.graph.device().as_ref(), &settings)?;
        self.state = RendererState::Compiled;
        Ok(())
    }

    pub fn swapchain(&self) -> &Arc<dyn Swapchain> {
        &self.swapchain
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Frames rendered so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    fn swapchain_settings(&self) -> GraphSettings {
        GraphSettings::from_swapchain(self.swapchain.as_ref())
            .with_strategy(self.graph.settings().command_buffer_strategy)
    }

    fn recreate(&mut self) -> Result<(), RendererError> {
        self.state = RendererState::Recreating;
        match self.try_recreate() {
            Ok(()) => {
                self.events.recreate.fire(&());
                self.state = RendererState::Compiled;
                Ok(())
            }
            // The surface is still changing, retry on the next frame
            Err(err) if err.is_out_of_date() => {
                log::debug!("Swapchain still out of date during recreation: {}", err);
                self.state = RendererState::OutOfDate;
                Ok(())
            }
            Err(err) => {
                log::error!("Swapchain recreation failed: {}", err);
                self.state = RendererState::OutOfDate;
                Err(err)
            }
        }
    }

    fn try_recreate(&mut self) -> Result<(), RendererError> {
        let device = self.graph.device().clone();
        device.wait_idle()?;
        device.wait_queue_idle()?;
        self.swapchain.recreate()?;

        let settings = self.swapchain_settings();
        log::info!(
            "Recreated swapchain: {}x{}, {} images",
            settings.width,
            settings.height,
            settings.frames_in_flight
        );
        self.graph.compile_resources(&settings)?;
        self.graph.compile(&settings)?;
        self.strategy.on_recreated(device.as_ref(), &settings)
    }
}

impl<S: FrameStrategy> GraphRenderer for RecreatableGraphRenderer<S> {
    fn render_next_frame(&mut self) -> Result<(), RendererError> {
        match self.state {
            RendererState::Idle | RendererState::Destroyed => {
                return Err(RendererError::InvalidState(self.state));
            }
            RendererState::OutOfDate | RendererState::Recreating => return self.recreate(),
            RendererState::Compiled | RendererState::Rendering => {}
        }

        self.state = RendererState::Rendering;
        let now = Instant::now();
        let delta = self
            .last_frame
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_frame = Some(now);

        let mut frame = FrameContext {
            graph: &self.graph,
            swapchain: self.swapchain.as_ref(),
            events: &mut self.events,
            observers: &mut self.observers,
            frame_number: self.frame_number,
            elapsed: now.duration_since(self.started),
            delta,
        };
        match self.strategy.render_frame(&mut frame) {
            Ok(()) => {
                self.frame_number += 1;
                self.state = RendererState::Compiled;
                Ok(())
            }
            Err(err) if err.is_out_of_date() => {
                log::info!("Swapchain out of date, recreating");
                self.state = RendererState::OutOfDate;
                self.recreate()
            }
            Err(err) => {
                self.state = RendererState::Compiled;
                Err(err)
            }
        }
    }

    fn state(&self) -> RendererState {
        self.state
    }

    fn events_mut(&mut self) -> &mut RendererEvents {
        &mut self.events
    }

    fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    fn add_observer(&mut self, observer: Box<dyn FrameDisplayObserver>) {
        self.observers.push(observer);
    }

    fn destroy(&mut self) {
        if self.state == RendererState::Destroyed {
            return;
        }
        let device = self.graph.device().clone();
        if let Err(err) = device.wait_idle() {
            log::warn!("Failed to wait for device idle while destroying renderer: {}", err);
        }
        self.strategy.destroy(device.as_ref());
        self.state = RendererState::Destroyed;
    }
}

impl<S: FrameStrategy> Drop for RecreatableGraphRenderer<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<S: FrameStrategy> std::fmt::Debug for RecreatableGraphRenderer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecreatableGraphRenderer")
            .field("state", &self.state)
            .field("frame_number", &self.frame_number)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

/// Render until `should_stop` returns true, checked after every frame.
///
/// Returns how often the renderer was driven, recreation-only calls included.
/// The renderer is always driven at least once.
pub fn run_render_loop(
    renderer: &mut dyn GraphRenderer,
    mut should_stop: impl FnMut() -> bool,
) -> Result<u64, RendererError> {
    let mut frames = 0;
    loop {
        renderer.render_next_frame()?;
        frames += 1;
        if should_stop() {
            break;
        }
    }
    log::debug!("Render loop stopped after {} frames", frames);
    Ok(frames)
}

/// Never stops.
pub fn infinite_draw_callback() -> impl FnMut() -> bool {
    || false
}

/// Stops once `should_stop` returns true.
pub fn conditional_draw_callback(should_stop: impl Fn() -> bool) -> impl FnMut() -> bool {
    move || should_stop()
}

/// Stops after `limit` frames.
pub fn count_limited_draw_callback(limit: u64) -> impl FnMut() -> bool {
    let mut frames = 0;
    move || {
        frames += 1;
        frames >= limit
    }
}
