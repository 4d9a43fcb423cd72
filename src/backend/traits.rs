//! Core backend abstraction traits
//!
//! These traits are the only GPU capabilities the render graph and the renderers consume.
//! Both the Vulkan backend and the headless dummy backend implement them.

use crate::backend::command::Command;
use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create image: {0}")]
    ImageCreationFailed(String),
    #[error("Failed to create descriptor set: {0}")]
    DescriptorCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to record commands: {0}")]
    RecordingFailed(String),
    #[error("Failed to submit work: {0}")]
    SubmitFailed(String),
    #[error("Failed to synchronize: {0}")]
    SyncFailed(String),
    #[error("Unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("Invalid usage: {0}")]
    Validation(String),
    #[error("Swapchain is out of date")]
    OutOfDateSwapchain,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

impl BackendError {
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, BackendError::OutOfDateSwapchain)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw backend id, stable for the lifetime of the object.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Handle to a host visible GPU buffer
    BufferHandle
);
define_handle!(
    /// Handle to a GPU image together with its default view
    ImageHandle
);
define_handle!(
    /// Handle to a sampler
    SamplerHandle
);
define_handle!(
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle
);
define_handle!(
    /// Handle to a descriptor set
    DescriptorSetHandle
);
define_handle!(
    /// Handle to a graphics pipeline and its layout
    PipelineHandle
);
define_handle!(
    /// Handle to a primary command buffer
    CommandBufferHandle
);
define_handle!(
    /// Device side ordering signal between queue operations
    SemaphoreHandle
);
define_handle!(
    /// Host waitable GPU completion signal
    FenceHandle
);

/// Resource view written into a descriptor set slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    UniformBuffer {
        binding: u32,
        buffer: BufferHandle,
        size: u64,
    },
    CombinedImageSampler {
        binding: u32,
        image: ImageHandle,
        sampler: SamplerHandle,
    },
    SampledImage {
        binding: u32,
        image: ImageHandle,
    },
    Sampler {
        binding: u32,
        sampler: SamplerHandle,
    },
}

impl DescriptorWrite {
    pub fn binding(&self) -> u32 {
        match self {
            DescriptorWrite::UniformBuffer { binding, .. }
            | DescriptorWrite::CombinedImageSampler { binding, .. }
            | DescriptorWrite::SampledImage { binding, .. }
            | DescriptorWrite::Sampler { binding, .. } => *binding,
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            DescriptorWrite::UniformBuffer { .. } => DescriptorKind::UniformBuffer,
            DescriptorWrite::CombinedImageSampler { .. } => DescriptorKind::CombinedImageSampler,
            DescriptorWrite::SampledImage { .. } => DescriptorKind::SampledImage,
            DescriptorWrite::Sampler { .. } => DescriptorKind::Sampler,
        }
    }
}

/// One batch of work for the graphics queue
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission<'a> {
    pub command_buffers: &'a [CommandBufferHandle],
    /// Waited on at the color attachment output stage.
    pub wait_semaphores: &'a [SemaphoreHandle],
    pub signal_semaphores: &'a [SemaphoreHandle],
    pub fence: Option<FenceHandle>,
}

/// Device and graphics queue capability
///
/// Implementations guard their own object tables, so every method takes `&self` and a
/// device can be shared as `Arc<dyn GraphicsDevice>`.
pub trait GraphicsDevice: Send + Sync {
    /// Human readable adapter name
    fn name(&self) -> &str;

    // Memory

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Copy `data` into the mapped buffer at `offset`.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Copy mapped buffer contents at `offset` into `out`.
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> BackendResult<()>;

    fn destroy_buffer(&self, buffer: BufferHandle);

    fn create_image(&self, desc: &ImageDescriptor) -> BackendResult<ImageHandle>;

    /// Upload texel data and leave the image in `ShaderReadOnly` layout.
    fn upload_image(&self, image: ImageHandle, data: &[u8]) -> BackendResult<()>;

    fn destroy_image(&self, image: ImageHandle);

    fn create_sampler(&self, filter: Filter) -> BackendResult<SamplerHandle>;

    fn destroy_sampler(&self, sampler: SamplerHandle);

    // Descriptors

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle>;

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;

    fn write_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()>;

    fn free_descriptor_set(&self, set: DescriptorSetHandle);

    // Pipelines

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    // Commands

    fn create_command_buffer(&self) -> BackendResult<CommandBufferHandle>;

    /// Replace the contents of a command buffer with `commands`.
    fn record_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        commands: &[Command],
    ) -> BackendResult<()>;

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle);

    // Synchronization

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle>;

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle>;

    /// Block the host until the fence is signaled.
    fn wait_fence(&self, fence: FenceHandle) -> BackendResult<()>;

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()>;

    fn is_fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool>;

    fn destroy_fence(&self, fence: FenceHandle);

    // Queue

    fn submit(&self, submission: &Submission<'_>) -> BackendResult<()>;

    fn wait_queue_idle(&self) -> BackendResult<()>;

    fn wait_idle(&self) -> BackendResult<()>;
}

/// Presentable image ring managed by the display subsystem
pub trait Swapchain: Send + Sync {
    fn image_count(&self) -> u32;

    fn extent(&self) -> Extent2d;

    fn format(&self) -> TextureFormat;

    /// Images owned by the swapchain, indexed by image index.
    fn images(&self) -> Vec<ImageHandle>;

    /// Acquire the next image, signaling `signal` once it is available.
    ///
    /// Returns [`BackendError::OutOfDateSwapchain`] when the surface changed and the
    /// swapchain has to be recreated.
    fn next_image_index(&self, signal: SemaphoreHandle) -> BackendResult<u32>;

    /// Queue `image_index` for display after `wait_semaphores` are signaled.
    fn present(&self, image_index: u32, wait_semaphores: &[SemaphoreHandle]) -> BackendResult<()>;

    /// Headless swapchains render offscreen and never present.
    fn supports_presenting(&self) -> bool;

    /// Rebuild against the current surface extent. Image handles change.
    fn recreate(&self) -> BackendResult<()>;
}
