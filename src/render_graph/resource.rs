//! Resources owned by the render graph
//!
//! Every resource exposes one physical backing per frame in flight. Backings are created
//! by [`Resource::compile`] and destroyed by [`Resource::release`]; read-only images are
//! the exception and keep their image across recompiles.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::*;
use crate::config::GraphSettings;

/// Dense handle of a resource, assigned in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource #{}", self.0)
    }
}

/// Per-frame buffers shared between a uniform block resource and its consumers
///
/// Recompiling the resource swaps the handles in place, so a consumer holding a clone
/// always resolves the current backing.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffers(Arc<RwLock<Vec<BufferHandle>>>);

impl FrameBuffers {
    pub fn get(&self, frame: u32) -> Option<BufferHandle> {
        self.0.read().get(frame as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    fn replace(&self, buffers: Vec<BufferHandle>) -> Vec<BufferHandle> {
        std::mem::replace(&mut *self.0.write(), buffers)
    }
}

/// Render target image, one per frame in flight
#[derive(Debug, Clone)]
pub struct ImageResource {
    pub name: Option<String>,
    pub format: TextureFormat,
    pub size: ImageSize,
    pub layers: u32,
    pub filter: Filter,
    images: Vec<ImageHandle>,
    sampler: Option<SamplerHandle>,
    extent: Option<Extent2d>,
}

impl ImageResource {
    pub fn new(format: TextureFormat, size: ImageSize) -> Self {
        Self {
            name: None,
            format,
            size,
            layers: 1,
            filter: Filter::Linear,
            images: Vec::new(),
            sampler: None,
            extent: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        assert!(layers > 0, "an image needs at least one layer");
        self.layers = layers;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }

    /// Extent resolved by the last compile.
    pub fn extent(&self) -> Option<Extent2d> {
        self.extent
    }

    fn compile(&mut self, device: &dyn GraphicsDevice, settings: &GraphSettings) -> BackendResult<()> {
        self.release(device);
        let extent = self.size.resolve(settings.extent());
        for frame in 0..settings.frames_in_flight {
            let image = device.create_image(&ImageDescriptor {
                label: self.name.as_ref().map(|name| format!("{name} [{frame}]")),
                extent: extent.into(),
                layers: self.layers,
                format: self.format,
                usage: TextureUsage::ALL,
                initial_layout: ImageLayout::General,
            })?;
            self.images.push(image);
        }
        self.sampler = Some(device.create_sampler(self.filter)?);
        self.extent = Some(extent);
        Ok(())
    }

    fn release(&mut self, device: &dyn GraphicsDevice) {
        for image in self.images.drain(..) {
            device.destroy_image(image);
        }
        if let Some(sampler) = self.sampler.take() {
            device.destroy_sampler(sampler);
        }
        self.extent = None;
    }
}

/// Non-owning view over the images of a swapchain
#[derive(Clone)]
pub struct SwapchainImageResource {
    pub name: Option<String>,
    swapchain: Arc<dyn Swapchain>,
    images: Vec<ImageHandle>,
    extent: Option<Extent2d>,
}

impl fmt::Debug for SwapchainImageResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapchainImageResource")
            .field("name", &self.name)
            .field("images", &self.images)
            .field("extent", &self.extent)
            .finish()
    }
}

impl SwapchainImageResource {
    pub fn new(swapchain: Arc<dyn Swapchain>) -> Self {
        Self {
            name: None,
            swapchain,
            images: Vec::new(),
            extent: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn swapchain(&self) -> &Arc<dyn Swapchain> {
        &self.swapchain
    }

    pub fn format(&self) -> TextureFormat {
        self.swapchain.format()
    }

    pub fn extent(&self) -> Option<Extent2d> {
        self.extent
    }

    fn compile(&mut self, settings: &GraphSettings) {
        self.images = self.swapchain.images();
        self.extent = Some(self.swapchain.extent());
        if self.images.len() < settings.frames_in_flight as usize {
            log::warn!(
                "Swapchain has {} images but the graph runs {} frames in flight",
                self.images.len(),
                settings.frames_in_flight
            );
        }
    }
}

/// Sampled texture populated once from the host
#[derive(Debug, Clone)]
pub struct ReadOnlyImageResource {
    pub name: Option<String>,
    pub format: TextureFormat,
    pub extent: Extent3d,
    pub layers: u32,
    pub filter: Filter,
    image: Option<ImageHandle>,
    sampler: Option<SamplerHandle>,
    pending_data: Option<Vec<u8>>,
}

impl ReadOnlyImageResource {
    pub fn new(format: TextureFormat, extent: Extent3d) -> Self {
        Self {
            name: None,
            format,
            extent,
            layers: 1,
            filter: Filter::Linear,
            image: None,
            sampler: None,
            pending_data: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        assert!(layers > 0, "an image needs at least one layer");
        self.layers = layers;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Byte size of a full upload.
    pub fn data_size(&self) -> usize {
        (self.extent.texel_count() * self.layers as u64 * self.format.bytes_per_pixel() as u64)
            as usize
    }

    pub fn image(&self) -> Option<ImageHandle> {
        self.image
    }

    /// Upload texel data now when the image exists, otherwise on the first compile.
    pub fn set_data(&mut self, device: &dyn GraphicsDevice, data: Vec<u8>) -> BackendResult<()> {
        assert_eq!(
            data.len(),
            self.data_size(),
            "read-only image data size does not match its extent and format"
        );
        match self.image {
            Some(image) => device.upload_image(image, &data),
            None => {
                self.pending_data = Some(data);
                Ok(())
            }
        }
    }

    fn compile(&mut self, device: &dyn GraphicsDevice) -> BackendResult<()> {
        if self.image.is_none() {
            let image = device.create_image(&ImageDescriptor {
                label: self.name.clone(),
                extent: self.extent,
                layers: self.layers,
                format: self.format,
                usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
                initial_layout: ImageLayout::ShaderReadOnly,
            })?;
            self.image = Some(image);
            self.sampler = Some(device.create_sampler(self.filter)?);
        }
        if let (Some(image), Some(data)) = (self.image, self.pending_data.take()) {
            device.upload_image(image, &data)?;
        }
        Ok(())
    }

    fn release(&mut self, device: &dyn GraphicsDevice) {
        if let Some(image) = self.image.take() {
            device.destroy_image(image);
        }
        if let Some(sampler) = self.sampler.take() {
            device.destroy_sampler(sampler);
        }
    }
}

/// Host writable buffer, one per frame in flight
#[derive(Debug, Clone)]
pub struct UniformBlockResource {
    pub name: Option<String>,
    pub size: u64,
    buffers: FrameBuffers,
}

impl UniformBlockResource {
    pub fn new(size: u64) -> Self {
        assert!(size > 0, "uniform block size must be non-zero");
        Self {
            name: None,
            size,
            buffers: FrameBuffers::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn buffers(&self) -> &FrameBuffers {
        &self.buffers
    }

    fn compile(&mut self, device: &dyn GraphicsDevice, settings: &GraphSettings) -> BackendResult<()> {
        let mut created = Vec::with_capacity(settings.frames_in_flight as usize);
        for frame in 0..settings.frames_in_flight {
            let buffer = device.create_buffer(&BufferDescriptor {
                label: self.name.as_ref().map(|name| format!("{name} [{frame}]")),
                size: self.size,
                usage: BufferUsage::UNIFORM,
            });
            match buffer {
                Ok(buffer) => created.push(buffer),
                Err(err) => {
                    for buffer in created {
                        device.destroy_buffer(buffer);
                    }
                    return Err(err);
                }
            }
        }
        for old in self.buffers.replace(created) {
            device.destroy_buffer(old);
        }
        Ok(())
    }

    fn release(&mut self, device: &dyn GraphicsDevice) {
        for buffer in self.buffers.replace(Vec::new()) {
            device.destroy_buffer(buffer);
        }
    }
}

/// Closed set of resource kinds
#[derive(Debug, Clone)]
pub enum Resource {
    Image(ImageResource),
    SwapchainImage(SwapchainImageResource),
    ReadOnlyImage(ReadOnlyImageResource),
    UniformBlock(UniformBlockResource),
}

impl Resource {
    pub fn name(&self) -> Option<&str> {
        match self {
            Resource::Image(r) => r.name.as_deref(),
            Resource::SwapchainImage(r) => r.name.as_deref(),
            Resource::ReadOnlyImage(r) => r.name.as_deref(),
            Resource::UniformBlock(r) => r.name.as_deref(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Resource::Image(_) => "image",
            Resource::SwapchainImage(_) => "swapchain image",
            Resource::ReadOnlyImage(_) => "read-only image",
            Resource::UniformBlock(_) => "uniform block",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, Resource::UniformBlock(_))
    }

    /// Whether an operation may render or copy into this resource.
    pub fn is_writable(&self) -> bool {
        matches!(self, Resource::Image(_) | Resource::SwapchainImage(_))
    }

    pub fn format(&self) -> Option<TextureFormat> {
        match self {
            Resource::Image(r) => Some(r.format),
            Resource::SwapchainImage(r) => Some(r.format()),
            Resource::ReadOnlyImage(r) => Some(r.format),
            Resource::UniformBlock(_) => None,
        }
    }

    /// Layout the image rests in between frames.
    pub fn initial_layout(&self) -> Option<ImageLayout> {
        match self {
            Resource::Image(_) => Some(ImageLayout::General),
            Resource::SwapchainImage(_) => Some(ImageLayout::PresentSrc),
            Resource::ReadOnlyImage(_) => Some(ImageLayout::ShaderReadOnly),
            Resource::UniformBlock(_) => None,
        }
    }

    pub fn layers(&self) -> u32 {
        match self {
            Resource::Image(r) => r.layers,
            Resource::ReadOnlyImage(r) => r.layers,
            Resource::SwapchainImage(_) | Resource::UniformBlock(_) => 1,
        }
    }

    /// Extent of the compiled image backing.
    pub fn extent(&self) -> Option<Extent3d> {
        match self {
            Resource::Image(r) => r.extent.map(Extent3d::from),
            Resource::SwapchainImage(r) => r.extent.map(Extent3d::from),
            Resource::ReadOnlyImage(r) => Some(r.extent),
            Resource::UniformBlock(_) => None,
        }
    }

    pub fn image(&self, frame: u32) -> Option<ImageHandle> {
        match self {
            Resource::Image(r) => r.images.get(frame as usize).copied(),
            Resource::SwapchainImage(r) => r.images.get(frame as usize).copied(),
            Resource::ReadOnlyImage(r) => r.image,
            Resource::UniformBlock(_) => None,
        }
    }

    pub fn sampler(&self) -> Option<SamplerHandle> {
        match self {
            Resource::Image(r) => r.sampler,
            Resource::ReadOnlyImage(r) => r.sampler,
            Resource::SwapchainImage(_) | Resource::UniformBlock(_) => None,
        }
    }

    pub fn buffer(&self, frame: u32) -> Option<BufferHandle> {
        match self {
            Resource::UniformBlock(r) => r.buffers.get(frame),
            _ => None,
        }
    }

    /// Byte size of a buffer backing.
    pub fn buffer_size(&self) -> Option<u64> {
        match self {
            Resource::UniformBlock(r) => Some(r.size),
            _ => None,
        }
    }

    /// (Re)create the physical backings for `settings`.
    pub fn compile(
        &mut self,
        device: &dyn GraphicsDevice,
        settings: &GraphSettings,
    ) -> BackendResult<()> {
        match self {
            Resource::Image(r) => r.compile(device, settings),
            Resource::SwapchainImage(r) => {
                r.compile(settings);
                Ok(())
            }
            Resource::ReadOnlyImage(r) => r.compile(device),
            Resource::UniformBlock(r) => r.compile(device, settings),
        }
    }

    /// Destroy every physical backing this resource owns.
    pub fn release(&mut self, device: &dyn GraphicsDevice) {
        match self {
            Resource::Image(r) => r.release(device),
            Resource::SwapchainImage(r) => {
                r.images.clear();
                r.extent = None;
            }
            Resource::ReadOnlyImage(r) => r.release(device),
            Resource::UniformBlock(r) => r.release(device),
        }
    }
}

impl From<ImageResource> for Resource {
    fn from(resource: ImageResource) -> Self {
        Resource::Image(resource)
    }
}

impl From<SwapchainImageResource> for Resource {
    fn from(resource: SwapchainImageResource) -> Self {
        Resource::SwapchainImage(resource)
    }
}

impl From<ReadOnlyImageResource> for Resource {
    fn from(resource: ReadOnlyImageResource) -> Self {
        Resource::ReadOnlyImage(resource)
    }
}

impl From<UniformBlockResource> for Resource {
    fn from(resource: UniformBlockResource) -> Self {
        Resource::UniformBlock(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, DummySwapchain};

    #[test]
    fn test_image_resource_per_frame_backing() {
        let device = DummyDevice::new();
        let mut resource: Resource = ImageResource::new(TextureFormat::Rgba8Unorm, ImageSize::surface()).into();
        resource
            .compile(&device, &GraphSettings::new(3, 320, 240))
            .unwrap();

        let images: Vec<_> = (0..3).map(|frame| resource.image(frame).unwrap()).collect();
        assert_eq!(images.len(), 3);
        assert_ne!(images[0], images[1]);
        assert!(resource.image(3).is_none());
        assert_eq!(resource.extent(), Some(Extent3d::new(320, 240, 1)));
        assert!(resource.sampler().is_some());

        resource.release(&device);
        assert!(resource.image(0).is_none());
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_recompile_replaces_buffers_in_shared_handle() {
        let device = DummyDevice::new();
        let block = UniformBlockResource::new(16);
        let shared = block.buffers().clone();
        let mut resource: Resource = block.into();

        resource.compile(&device, &GraphSettings::new(2, 1, 1)).unwrap();
        let first = shared.get(0).unwrap();
        assert_eq!(resource.buffer(0), Some(first));

        resource.compile(&device, &GraphSettings::new(3, 1, 1)).unwrap();
        assert_eq!(shared.len(), 3);
        assert_ne!(shared.get(0), Some(first));
        assert_eq!(device.buffer_contents(first), None);
    }

    #[test]
    fn test_read_only_image_uploads_pending_data_once() {
        let device = DummyDevice::new();
        let mut texture = ReadOnlyImageResource::new(TextureFormat::R8Unorm, Extent3d::new(4, 2, 1));
        texture.set_data(&device, vec![7; 8]).unwrap();
        let mut resource: Resource = texture.into();

        resource.compile(&device, &GraphSettings::default()).unwrap();
        let image = resource.image(0).unwrap();
        assert_eq!(device.image_data(image), Some(vec![7; 8]));

        resource.compile(&device, &GraphSettings::default()).unwrap();
        assert_eq!(resource.image(1), Some(image));
    }

    #[test]
    #[should_panic(expected = "read-only image data size")]
    fn test_read_only_image_rejects_wrong_size() {
        let device = DummyDevice::new();
        let mut texture = ReadOnlyImageResource::new(TextureFormat::Rgba8Unorm, Extent3d::new(2, 2, 1));
        let _ = texture.set_data(&device, vec![0; 3]);
    }

    #[test]
    fn test_swapchain_resource_views_swapchain_images() {
        let device = Arc::new(DummyDevice::new());
        let swapchain: Arc<dyn Swapchain> =
            Arc::new(DummySwapchain::new(device.clone(), Extent2d::new(64, 64), 2).unwrap());
        let mut resource: Resource = SwapchainImageResource::new(swapchain.clone()).into();
        resource
            .compile(device.as_ref(), &GraphSettings::from_swapchain(swapchain.as_ref()))
            .unwrap();

        let images = swapchain.images();
        assert_eq!(resource.image(0), Some(images[0]));
        assert_eq!(resource.image(1), Some(images[1]));
        assert_eq!(resource.initial_layout(), Some(ImageLayout::PresentSrc));
        assert!(resource.sampler().is_none());
    }
}
