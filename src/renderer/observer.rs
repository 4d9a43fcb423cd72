//! Hooks into the phases of a displayed frame

/// Observer of the blocking points of a frame
///
/// Every hook does nothing by default, implement the ones you need. Hooks run on the render
/// thread in the order the renderer reaches them.
pub trait FrameDisplayObserver {
    /// About to host-wait for the fence of the slot that last wrote the acquired image.
    fn on_image_fence_wait_started(&mut self, _slot: usize) {}

    fn on_image_fence_wait_ended(&mut self, _slot: usize) {}

    fn on_acquire_started(&mut self) {}

    fn on_acquire_returned(&mut self, _image_index: u32) {}

    fn on_acquire_ended(&mut self) {}

    fn on_render_started(&mut self, _frame_index: u32) {}

    fn on_present_started(&mut self, _image_index: u32) {}
}

/// Logs every hook at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl FrameDisplayObserver for LoggingObserver {
    fn on_image_fence_wait_started(&mut self, slot: usize) {
        log::trace!("Waiting for frame slot {} to release its image", slot);
    }

    fn on_image_fence_wait_ended(&mut self, slot: usize) {
        log::trace!("Frame slot {} released its image", slot);
    }

    fn on_acquire_returned(&mut self, image_index: u32) {
        log::trace!("Acquired swapchain image {}", image_index);
    }

    fn on_render_started(&mut self, frame_index: u32) {
        log::trace!("Submitting frame {}", frame_index);
    }

    fn on_present_started(&mut self, image_index: u32) {
        log::trace!("Presenting swapchain image {}", image_index);
    }
}
