//! Multi-buffered renderer with per-slot fences and semaphores

use std::sync::Arc;

use crate::backend::{FenceHandle, GraphicsDevice, SemaphoreHandle, Swapchain};
use crate::config::GraphSettings;
use crate::error::RendererError;
use crate::render_graph::RenderGraph;

use super::{FrameContext, FrameStrategy, RecreatableGraphRenderer};

/// Production renderer keeping up to `frames_in_flight` frames on the GPU
pub type SynchronizedSwapchainGraphRenderer = RecreatableGraphRenderer<SynchronizedFrames>;

#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    image_available: SemaphoreHandle,
    render_finished: SemaphoreHandle,
    in_flight: FenceHandle,
}

impl FrameSlot {
    fn create(device: &dyn GraphicsDevice) -> Result<Self, RendererError> {
        Ok(Self {
            image_available: device.create_semaphore()?,
            render_finished: device.create_semaphore()?,
            in_flight: device.create_fence(true)?,
        })
    }

    fn destroy(self, device: &dyn GraphicsDevice) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
        device.destroy_fence(self.in_flight);
    }
}

/// Round-robin frame slots plus the slot that last wrote each swapchain image
///
/// The graph frame used for uniforms and command buffers is the acquired image index, so a
/// graph frame is never reused before the fence guarding its image has signaled.
#[derive(Debug)]
pub struct SynchronizedFrames {
    slots: Vec<FrameSlot>,
    image_to_frame: Vec<Option<usize>>,
    current: usize,
}

impl SynchronizedFrames {
    fn new(device: &dyn GraphicsDevice, frames_in_flight: u32, image_count: u32) -> Result<Self, RendererError> {
        let mut frames = Self {
            slots: Vec::new(),
            image_to_frame: vec![None; image_count as usize],
            current: 0,
        };
        frames.create_slots(device, frames_in_flight)?;
        Ok(frames)
    }

    fn create_slots(&mut self, device: &dyn GraphicsDevice, count: u32) -> Result<(), RendererError> {
        for _ in 0..count {
            let slot = FrameSlot::create(device)?;
            self.slots.push(slot);
        }
        Ok(())
    }

    fn destroy_slots(&mut self, device: &dyn GraphicsDevice) {
        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot that last submitted work targeting `image_index`.
    pub fn last_writer(&self, image_index: u32) -> Option<usize> {
        self.image_to_frame.get(image_index as usize).copied().flatten()
    }
}

impl RecreatableGraphRenderer<SynchronizedFrames> {
    /// Panics when the compiled graph does not run one frame per swapchain image.
    pub fn new(graph: RenderGraph, swapchain: Arc<dyn Swapchain>) -> Result<Self, RendererError> {
        let image_count = swapchain.image_count();
        let frames_in_flight = if graph.is_compiled() {
            graph.settings().frames_in_flight
        } else {
            image_count
        };
        assert_eq!(
            image_count, frames_in_flight,
            "swapchain image count must equal frames in flight"
        );
        let strategy = SynchronizedFrames::new(graph.device().as_ref(), frames_in_flight, image_count)?;
        Ok(Self::with_strategy(graph, swapchain, strategy))
    }
}

impl FrameStrategy for SynchronizedFrames {
    fn render_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<(), RendererError> {
        let slot_index = self.current;
        let Some(slot) = self.slots.get(slot_index).copied() else {
            return Err(RendererError::InvalidState(super::RendererState::Destroyed));
        };

        // 1. bound how far the CPU runs ahead of this slot
        frame.device().wait_fence(slot.in_flight)?;

        // 2. acquire
        frame.notify(|observer| observer.on_acquire_started());
        let image_index = frame.swapchain.next_image_index(slot.image_available)?;
        frame.notify(|observer| observer.on_acquire_returned(image_index));

        // 3. the image may still be in use by another slot
        if let Some(previous) = self.last_writer(image_index) {
            if previous != slot_index {
                frame.notify(|observer| observer.on_image_fence_wait_started(previous));
                frame.device().wait_fence(self.slots[previous].in_flight)?;
                frame.notify(|observer| observer.on_image_fence_wait_ended(previous));
            }
        }
        frame.notify(|observer| observer.on_acquire_ended());
        frame.events.image_acquired.fire(&image_index);

        // 4.
        if let Some(entry) = self.image_to_frame.get_mut(image_index as usize) {
            *entry = Some(slot_index);
        }

        // 5.
        frame.device().reset_fence(slot.in_flight)?;

        // 6.
        let info = frame.frame_info(image_index, image_index, slot_index);
        frame.events.pre_submit.fire(&info);

        // 7.
        frame.notify(|observer| observer.on_render_started(image_index));
        frame.graph.submit(
            image_index,
            &[slot.image_available],
            &[slot.render_finished],
            Some(slot.in_flight),
        )?;

        // 9. advance before presenting so an out-of-date present leaves the slot consistent
        self.current = (self.current + 1) % self.slots.len();

        // 8.
        if frame.swapchain.supports_presenting() {
            frame.notify(|observer| observer.on_present_started(image_index));
            frame
                .graph
                .present(image_index, frame.swapchain, &[slot.render_finished])?;
            frame.events.presented.fire(&image_index);
        }
        Ok(())
    }

    fn on_recreated(
        &mut self,
        device: &dyn GraphicsDevice,
        settings: &GraphSettings,
    ) -> Result<(), RendererError> {
        let count = settings.frames_in_flight;
        self.image_to_frame = vec![None; count as usize];
        if self.slots.len() != count as usize {
            log::debug!(
                "Rebuilding frame slots: {} -> {}",
                self.slots.len(),
                count
            );
            self.destroy_slots(device);
            self.create_slots(device, count)?;
            self.current = 0;
        }
        Ok(())
    }

    fn destroy(&mut self, device: &dyn GraphicsDevice) {
        self.destroy_slots(device);
        self.image_to_frame.clear();
    }
}
