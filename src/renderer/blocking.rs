//! Single buffered renderer that waits for the GPU after every frame

use std::sync::Arc;

use crate::backend::{GraphicsDevice, SemaphoreHandle, Swapchain};
use crate::config::GraphSettings;
use crate::error::RendererError;
use crate::render_graph::RenderGraph;

use super::{FrameContext, FrameStrategy, RecreatableGraphRenderer};

/// Reference renderer without CPU/GPU overlap
pub type BlockingGraphRenderer = RecreatableGraphRenderer<BlockingFrames>;

/// Acquire, submit, wait for idle, present
#[derive(Debug)]
pub struct BlockingFrames {
    acquire_semaphore: Option<SemaphoreHandle>,
}

impl RecreatableGraphRenderer<BlockingFrames> {
    pub fn new(graph: RenderGraph, swapchain: Arc<dyn Swapchain>) -> Result<Self, RendererError> {
        let acquire_semaphore = graph.device().create_semaphore()?;
        Ok(Self::with_strategy(
            graph,
            swapchain,
            BlockingFrames {
                acquire_semaphore: Some(acquire_semaphore),
            },
        ))
    }
}

impl FrameStrategy for BlockingFrames {
    fn render_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<(), RendererError> {
        let Some(acquire_semaphore) = self.acquire_semaphore else {
            return Err(RendererError::InvalidState(super::RendererState::Destroyed));
        };

        frame.notify(|observer| observer.on_acquire_started());
        let image_index = frame.swapchain.next_image_index(acquire_semaphore)?;
        frame.notify(|observer| observer.on_acquire_returned(image_index));
        frame.notify(|observer| observer.on_acquire_ended());
        frame.events.image_acquired.fire(&image_index);

        let info = frame.frame_info(image_index, image_index, 0);
        frame.events.pre_submit.fire(&info);

        frame.notify(|observer| observer.on_render_started(image_index));
        frame.graph.submit(image_index, &[], &[], None)?;
        frame.device().wait_queue_idle()?;
        frame.device().wait_idle()?;

        if frame.swapchain.supports_presenting() {
            frame.notify(|observer| observer.on_present_started(image_index));
            frame
                .graph
                .present(image_index, frame.swapchain, &[acquire_semaphore])?;
            frame.events.presented.fire(&image_index);
        }
        frame.device().wait_queue_idle()?;
        frame.device().wait_idle()?;
        Ok(())
    }

    fn on_recreated(
        &mut self,
        _device: &dyn GraphicsDevice,
        _settings: &GraphSettings,
    ) -> Result<(), RendererError> {
        Ok(())
    }

    fn destroy(&mut self, device: &dyn GraphicsDevice) {
        if let Some(semaphore) = self.acquire_semaphore.take() {
            device.destroy_semaphore(semaphore);
        }
    }
}
