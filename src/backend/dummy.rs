//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It keeps every object in host
//! memory, records an ordered log of synchronization relevant calls, and rejects the
//! submissions a real driver would reject: signaling a fence that is still in use or
//! resubmitting a command buffer that has not finished executing.
//!
//! Work either completes as soon as it is submitted ([`CompletionMode::Immediate`]) or
//! stays pending until a fence or idle wait drains the queue in submission order
//! ([`CompletionMode::Deferred`]).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::command::Command;
use super::traits::*;
use super::types::*;

/// When submitted work is considered finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    #[default]
    Immediate,
    Deferred,
}

/// Entry of the dummy device event log
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    CreateImage(ImageHandle),
    DestroyImage(ImageHandle),
    CreateBuffer(BufferHandle),
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: usize,
    },
    RecordCommandBuffer(CommandBufferHandle),
    Submit {
        command_buffers: Vec<CommandBufferHandle>,
        wait_semaphores: Vec<SemaphoreHandle>,
        signal_semaphores: Vec<SemaphoreHandle>,
        fence: Option<FenceHandle>,
    },
    /// `blocked` is true when the fence was not yet signaled and the host had to wait.
    WaitFence {
        fence: FenceHandle,
        blocked: bool,
    },
    ResetFence(FenceHandle),
    WaitQueueIdle,
    WaitIdle,
    AcquireImage {
        image_index: u32,
        signal: SemaphoreHandle,
    },
    AcquireOutOfDate,
    Present {
        image_index: u32,
        wait_semaphores: Vec<SemaphoreHandle>,
    },
    PresentOutOfDate {
        image_index: u32,
    },
    RecreateOutOfDate,
    RecreateSwapchain {
        extent: Extent2d,
        image_count: u32,
    },
}

#[derive(Debug)]
struct DummyImage {
    desc: ImageDescriptor,
    data: Option<Vec<u8>>,
}

#[derive(Debug)]
struct DummySet {
    layout: DescriptorSetLayoutHandle,
    writes: Vec<DescriptorWrite>,
}

#[derive(Debug)]
struct PendingWork {
    command_buffers: Vec<CommandBufferHandle>,
    fence: Option<FenceHandle>,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    images: HashMap<u64, DummyImage>,
    samplers: HashSet<u64>,
    layouts: HashMap<u64, Vec<DescriptorBinding>>,
    sets: HashMap<u64, DummySet>,
    pipelines: HashMap<u64, GraphicsPipelineDescriptor>,
    command_buffers: HashMap<u64, Vec<Command>>,
    semaphores: HashSet<u64>,
    fences: HashMap<u64, bool>,
    pending: VecDeque<PendingWork>,
    submissions: u64,
    events: Vec<DeviceEvent>,
}

impl DummyState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_command_buffer_pending(&self, command_buffer: CommandBufferHandle) -> bool {
        self.pending
            .iter()
            .any(|work| work.command_buffers.contains(&command_buffer))
    }

    fn is_fence_pending(&self, fence: FenceHandle) -> bool {
        self.pending.iter().any(|work| work.fence == Some(fence))
    }

    fn complete(&mut self, work: PendingWork) {
        if let Some(fence) = work.fence {
            self.fences.insert(fence.0, true);
        }
    }

    /// Execute queued work in order until `fence` is signaled.
    fn complete_through(&mut self, fence: FenceHandle) {
        while let Some(work) = self.pending.pop_front() {
            let done = work.fence == Some(fence);
            self.complete(work);
            if done {
                break;
            }
        }
    }

    fn complete_all(&mut self) {
        while let Some(work) = self.pending.pop_front() {
            self.complete(work);
        }
    }
}

/// Dummy GPU device.
#[derive(Debug)]
pub struct DummyDevice {
    name: String,
    mode: Mutex<CompletionMode>,
    state: Mutex<DummyState>,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    /// Create a new dummy device completing work immediately.
    pub fn new() -> Self {
        Self::with_mode(CompletionMode::Immediate)
    }

    pub fn with_mode(mode: CompletionMode) -> Self {
        Self {
            name: "Dummy Device".to_string(),
            mode: Mutex::new(mode),
            state: Mutex::new(DummyState::default()),
        }
    }

    pub fn set_completion_mode(&self, mode: CompletionMode) {
        *self.mode.lock() = mode;
        if mode == CompletionMode::Immediate {
            self.state.lock().complete_all();
        }
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Number of submissions accepted so far.
    pub fn submission_count(&self) -> u64 {
        self.state.lock().submissions
    }

    /// Number of submissions that have not completed yet.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Finish all queued work, as if the GPU caught up.
    pub fn complete_all(&self) {
        self.state.lock().complete_all();
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer.0).cloned()
    }

    pub fn image_data(&self, image: ImageHandle) -> Option<Vec<u8>> {
        self.state
            .lock()
            .images
            .get(&image.0)
            .and_then(|image| image.data.clone())
    }

    pub fn image_descriptor(&self, image: ImageHandle) -> Option<ImageDescriptor> {
        self.state
            .lock()
            .images
            .get(&image.0)
            .map(|image| image.desc.clone())
    }

    pub fn recorded_commands(&self, command_buffer: CommandBufferHandle) -> Option<Vec<Command>> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer.0)
            .cloned()
    }

    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Option<Vec<DescriptorWrite>> {
        self.state
            .lock()
            .sets
            .get(&set.0)
            .map(|set| set.writes.clone())
    }

    pub fn descriptor_set_layout(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> Option<Vec<DescriptorBinding>> {
        self.state.lock().layouts.get(&layout.0).cloned()
    }

    pub fn pipeline_descriptor(&self, pipeline: PipelineHandle) -> Option<GraphicsPipelineDescriptor> {
        self.state.lock().pipelines.get(&pipeline.0).cloned()
    }

    /// Count of live objects of every kind, used to check that compiles release what they
    /// created.
    pub fn live_object_count(&self) -> usize {
        let state = self.state.lock();
        state.buffers.len()
            + state.images.len()
            + state.samplers.len()
            + state.layouts.len()
            + state.sets.len()
            + state.pipelines.len()
            + state.command_buffers.len()
    }

    fn log(&self, event: DeviceEvent) {
        self.state.lock().events.push(event);
    }
}

impl GraphicsDevice for DummyDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.buffers.insert(id, vec![0; desc.size as usize]);
        state.events.push(DeviceEvent::CreateBuffer(BufferHandle(id)));
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let contents = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(BackendError::Validation(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        state.events.push(DeviceEvent::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> BackendResult<()> {
        let state = self.state.lock();
        let contents = state.buffers.get(&buffer.0).ok_or(BackendError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        let start = offset as usize;
        let end = start + out.len();
        if end > contents.len() {
            return Err(BackendError::Validation(format!(
                "read of {} bytes at {} overflows buffer of {} bytes",
                out.len(),
                offset,
                contents.len()
            )));
        }
        out.copy_from_slice(&contents[start..end]);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn create_image(&self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        log::trace!(
            "DummyDevice: creating image {:?} ({}x{}x{}, {} layers)",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth,
            desc.layers
        );
        if desc.extent.texel_count() == 0 || desc.layers == 0 {
            return Err(BackendError::ImageCreationFailed(format!(
                "zero sized image {:?}",
                desc.label
            )));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.images.insert(
            id,
            DummyImage {
                desc: desc.clone(),
                data: None,
            },
        );
        state.events.push(DeviceEvent::CreateImage(ImageHandle(id)));
        Ok(ImageHandle(id))
    }

    fn upload_image(&self, image: ImageHandle, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let entry = state.images.get_mut(&image.0).ok_or(BackendError::InvalidHandle {
            kind: "image",
            id: image.0,
        })?;
        let expected = entry.desc.extent.texel_count()
            * entry.desc.layers as u64
            * entry.desc.format.bytes_per_pixel() as u64;
        if data.len() as u64 != expected {
            return Err(BackendError::Validation(format!(
                "image upload of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        entry.data = Some(data.to_vec());
        Ok(())
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        if state.images.remove(&image.0).is_some() {
            state.events.push(DeviceEvent::DestroyImage(image));
        }
    }

    fn create_sampler(&self, filter: Filter) -> BackendResult<SamplerHandle> {
        log::trace!("DummyDevice: creating sampler ({:?})", filter);
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().samplers.remove(&sampler.0);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.layouts.insert(id, bindings.to_vec());
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state.lock().layouts.remove(&layout.0);
    }

    fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        if !state.layouts.contains_key(&layout.0) {
            return Err(BackendError::InvalidHandle {
                kind: "descriptor set layout",
                id: layout.0,
            });
        }
        let id = state.allocate_id();
        state.sets.insert(
            id,
            DummySet {
                layout,
                writes: Vec::new(),
            },
        );
        Ok(DescriptorSetHandle(id))
    }

    fn write_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let layout = state
            .sets
            .get(&set.0)
            .map(|set| set.layout)
            .ok_or(BackendError::InvalidHandle {
                kind: "descriptor set",
                id: set.0,
            })?;
        let bindings = state.layouts.get(&layout.0).cloned().unwrap_or_default();
        for write in writes {
            match bindings.iter().find(|b| b.binding == write.binding()) {
                None => {
                    return Err(BackendError::Validation(format!(
                        "descriptor write to binding {} missing from layout",
                        write.binding()
                    )))
                }
                Some(binding) if binding.kind != write.kind() => {
                    return Err(BackendError::Validation(format!(
                        "descriptor write of {:?} to binding {} declared as {:?}",
                        write.kind(),
                        write.binding(),
                        binding.kind
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(entry) = state.sets.get_mut(&set.0) {
            entry.writes.extend_from_slice(writes);
        }
        Ok(())
    }

    fn free_descriptor_set(&self, set: DescriptorSetHandle) {
        self.state.lock().sets.remove(&set.0);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        log::trace!("DummyDevice: creating pipeline {:?}", desc.label);
        if desc.shaders.iter().any(|shader| shader.spirv.is_empty()) {
            return Err(BackendError::PipelineCreationFailed(
                "empty shader module".into(),
            ));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.pipelines.insert(id, desc.clone());
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(&pipeline.0);
    }

    fn create_command_buffer(&self) -> BackendResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.command_buffers.insert(id, Vec::new());
        Ok(CommandBufferHandle(id))
    }

    fn record_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        commands: &[Command],
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.is_command_buffer_pending(command_buffer) {
            return Err(BackendError::Validation(format!(
                "command buffer {} recorded while pending",
                command_buffer.0
            )));
        }
        let entry = state
            .command_buffers
            .get_mut(&command_buffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "command buffer",
                id: command_buffer.0,
            })?;
        *entry = commands.to_vec();
        state
            .events
            .push(DeviceEvent::RecordCommandBuffer(command_buffer));
        Ok(())
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        self.state.lock().command_buffers.remove(&command_buffer.0);
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.semaphores.insert(id);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state.lock().semaphores.remove(&semaphore.0);
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.fences.insert(id, signaled);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let signaled = *state.fences.get(&fence.0).ok_or(BackendError::InvalidHandle {
            kind: "fence",
            id: fence.0,
        })?;
        if signaled {
            state.events.push(DeviceEvent::WaitFence {
                fence,
                blocked: false,
            });
            return Ok(());
        }
        if !state.is_fence_pending(fence) {
            return Err(BackendError::SyncFailed(format!(
                "fence {} is unsignaled and no submitted work will signal it",
                fence.0
            )));
        }
        log::trace!("DummyDevice: blocking on fence {}", fence.0);
        state.complete_through(fence);
        state.events.push(DeviceEvent::WaitFence {
            fence,
            blocked: true,
        });
        Ok(())
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.is_fence_pending(fence) {
            return Err(BackendError::Validation(format!(
                "fence {} reset while in use by a submission",
                fence.0
            )));
        }
        let entry = state.fences.get_mut(&fence.0).ok_or(BackendError::InvalidHandle {
            kind: "fence",
            id: fence.0,
        })?;
        *entry = false;
        state.events.push(DeviceEvent::ResetFence(fence));
        Ok(())
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool> {
        self.state
            .lock()
            .fences
            .get(&fence.0)
            .copied()
            .ok_or(BackendError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            })
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.state.lock().fences.remove(&fence.0);
    }

    fn submit(&self, submission: &Submission<'_>) -> BackendResult<()> {
        let mode = *self.mode.lock();
        let mut state = self.state.lock();

        for command_buffer in submission.command_buffers {
            if !state.command_buffers.contains_key(&command_buffer.0) {
                return Err(BackendError::InvalidHandle {
                    kind: "command buffer",
                    id: command_buffer.0,
                });
            }
            if state.is_command_buffer_pending(*command_buffer) {
                return Err(BackendError::Validation(format!(
                    "command buffer {} submitted while still pending",
                    command_buffer.0
                )));
            }
        }
        for semaphore in submission
            .wait_semaphores
            .iter()
            .chain(submission.signal_semaphores)
        {
            if !state.semaphores.contains(&semaphore.0) {
                return Err(BackendError::InvalidHandle {
                    kind: "semaphore",
                    id: semaphore.0,
                });
            }
        }
        if let Some(fence) = submission.fence {
            let signaled = *state.fences.get(&fence.0).ok_or(BackendError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            })?;
            if signaled || state.is_fence_pending(fence) {
                return Err(BackendError::Validation(format!(
                    "fence {} submitted while signaled or in use",
                    fence.0
                )));
            }
        }

        state.submissions += 1;
        state.events.push(DeviceEvent::Submit {
            command_buffers: submission.command_buffers.to_vec(),
            wait_semaphores: submission.wait_semaphores.to_vec(),
            signal_semaphores: submission.signal_semaphores.to_vec(),
            fence: submission.fence,
        });
        let work = PendingWork {
            command_buffers: submission.command_buffers.to_vec(),
            fence: submission.fence,
        };
        match mode {
            CompletionMode::Immediate => state.complete(work),
            CompletionMode::Deferred => state.pending.push_back(work),
        }
        Ok(())
    }

    fn wait_queue_idle(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.complete_all();
        state.events.push(DeviceEvent::WaitQueueIdle);
        Ok(())
    }

    fn wait_idle(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.complete_all();
        state.events.push(DeviceEvent::WaitIdle);
        Ok(())
    }
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<ImageHandle>,
    extent: Extent2d,
    image_count: u32,
    next_index: u32,
    scripted: VecDeque<u32>,
    out_of_date: u32,
    present_out_of_date: u32,
    recreate_out_of_date: u32,
    pending_resize: Option<(Extent2d, Option<u32>)>,
    recreations: u32,
}

/// Dummy swapchain sharing the event log of its [`DummyDevice`].
#[derive(Debug)]
pub struct DummySwapchain {
    device: Arc<DummyDevice>,
    format: TextureFormat,
    presenting: bool,
    state: Mutex<SwapchainState>,
}

impl DummySwapchain {
    /// Presenting swapchain with round robin acquisition.
    pub fn new(device: Arc<DummyDevice>, extent: Extent2d, image_count: u32) -> BackendResult<Self> {
        Self::build(device, extent, image_count, true)
    }

    /// Offscreen swapchain that never presents.
    pub fn headless(
        device: Arc<DummyDevice>,
        extent: Extent2d,
        image_count: u32,
    ) -> BackendResult<Self> {
        Self::build(device, extent, image_count, false)
    }

    fn build(
        device: Arc<DummyDevice>,
        extent: Extent2d,
        image_count: u32,
        presenting: bool,
    ) -> BackendResult<Self> {
        assert!(image_count > 0, "image_count must be at least 1");
        let format = TextureFormat::Bgra8UnormSrgb;
        let images = Self::create_images(&device, extent, image_count, format)?;
        Ok(Self {
            device,
            format,
            presenting,
            state: Mutex::new(SwapchainState {
                images,
                extent,
                image_count,
                next_index: 0,
                scripted: VecDeque::new(),
                out_of_date: 0,
                present_out_of_date: 0,
                recreate_out_of_date: 0,
                pending_resize: None,
                recreations: 0,
            }),
        })
    }

    fn create_images(
        device: &DummyDevice,
        extent: Extent2d,
        image_count: u32,
        format: TextureFormat,
    ) -> BackendResult<Vec<ImageHandle>> {
        (0..image_count)
            .map(|index| {
                device.create_image(&ImageDescriptor {
                    label: Some(format!("swapchain image {index}")),
                    extent: extent.into(),
                    layers: 1,
                    format,
                    usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::COPY_DST,
                    initial_layout: ImageLayout::PresentSrc,
                })
            })
            .collect()
    }

    /// Make the next `count` acquisitions fail with an out of date error.
    pub fn fail_next_acquire(&self, count: u32) {
        self.state.lock().out_of_date += count;
    }

    /// Make the next `count` presents fail with an out of date error.
    pub fn fail_next_present(&self, count: u32) {
        self.state.lock().present_out_of_date += count;
    }

    /// Make the next `count` recreations fail with an out of date error,
    /// leaving the current images untouched.
    pub fn fail_next_recreate(&self, count: u32) {
        self.state.lock().recreate_out_of_date += count;
    }

    /// Use these image indices for the next acquisitions instead of round robin.
    pub fn script_acquire_order(&self, indices: impl IntoIterator<Item = u32>) {
        self.state.lock().scripted.extend(indices);
    }

    /// Extent (and optionally image count) the next recreation picks up.
    pub fn resize(&self, extent: Extent2d, image_count: Option<u32>) {
        self.state.lock().pending_resize = Some((extent, image_count));
    }

    pub fn recreation_count(&self) -> u32 {
        self.state.lock().recreations
    }
}

impl Swapchain for DummySwapchain {
    fn image_count(&self) -> u32 {
        self.state.lock().image_count
    }

    fn extent(&self) -> Extent2d {
        self.state.lock().extent
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn images(&self) -> Vec<ImageHandle> {
        self.state.lock().images.clone()
    }

    fn next_image_index(&self, signal: SemaphoreHandle) -> BackendResult<u32> {
        let mut state = self.state.lock();
        if state.out_of_date > 0 {
            state.out_of_date -= 1;
            drop(state);
            self.device.log(DeviceEvent::AcquireOutOfDate);
            return Err(BackendError::OutOfDateSwapchain);
        }
        let image_index = match state.scripted.pop_front() {
            Some(index) => index,
            None => {
                let index = state.next_index;
                state.next_index = (index + 1) % state.image_count;
                index
            }
        };
        if image_index >= state.image_count {
            return Err(BackendError::AcquireImageFailed(format!(
                "scripted image index {image_index} out of range"
            )));
        }
        drop(state);
        log::trace!("DummySwapchain: acquired image {}", image_index);
        self.device.log(DeviceEvent::AcquireImage {
            image_index,
            signal,
        });
        Ok(image_index)
    }

    fn present(&self, image_index: u32, wait_semaphores: &[SemaphoreHandle]) -> BackendResult<()> {
        if !self.presenting {
            return Err(BackendError::PresentFailed(
                "headless swapchain cannot present".into(),
            ));
        }
        let mut state = self.state.lock();
        if image_index >= state.image_count {
            return Err(BackendError::PresentFailed(format!(
                "image index {image_index} out of range"
            )));
        }
        if state.present_out_of_date > 0 {
            state.present_out_of_date -= 1;
            drop(state);
            self.device.log(DeviceEvent::PresentOutOfDate { image_index });
            return Err(BackendError::OutOfDateSwapchain);
        }
        drop(state);
        self.device.log(DeviceEvent::Present {
            image_index,
            wait_semaphores: wait_semaphores.to_vec(),
        });
        Ok(())
    }

    fn supports_presenting(&self) -> bool {
        self.presenting
    }

    fn recreate(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.recreate_out_of_date > 0 {
            state.recreate_out_of_date -= 1;
            drop(state);
            log::debug!("DummySwapchain: surface still changing, recreation refused");
            self.device.log(DeviceEvent::RecreateOutOfDate);
            return Err(BackendError::OutOfDateSwapchain);
        }
        for image in state.images.drain(..) {
            self.device.destroy_image(image);
        }
        if let Some((extent, image_count)) = state.pending_resize.take() {
            state.extent = extent;
            if let Some(count) = image_count {
                state.image_count = count;
            }
        }
        state.images =
            Self::create_images(&self.device, state.extent, state.image_count, self.format)?;
        state.next_index = 0;
        state.recreations += 1;
        let event = DeviceEvent::RecreateSwapchain {
            extent: state.extent,
            image_count: state.image_count,
        };
        drop(state);
        log::info!("DummySwapchain: recreated");
        self.device.log(event);
        Ok(())
    }
}
