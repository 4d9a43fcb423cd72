//! Common types shared between backends

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    R8Srgb,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Rg32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm | TextureFormat::R8Srgb => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Two dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Three dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub const fn flat(extent: Extent2d) -> Self {
        Self::new(extent.width, extent.height, 1)
    }

    pub fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /// Dimensionality implied by which axes are larger than one.
    pub fn dimension(&self) -> ImageDimension {
        if self.depth > 1 {
            ImageDimension::D3
        } else if self.height > 1 {
            ImageDimension::D2
        } else {
            ImageDimension::D1
        }
    }
}

impl Default for Extent3d {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<Extent2d> for Extent3d {
    fn from(extent: Extent2d) -> Self {
        Self::flat(extent)
    }
}

/// Image dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageDimension {
    D1,
    D2,
    D3,
    Cube,
}

/// Size of a graph image, either absolute or relative to the swapchain
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageSize {
    /// Fixed size in pixels
    Absolute { width: u32, height: u32 },
    /// Scaled from the surface size
    Relative { width_scale: f32, height_scale: f32 },
}

impl ImageSize {
    /// Same size as the surface.
    pub const fn surface() -> Self {
        Self::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }

    /// Resolve against the current surface extent.
    pub fn resolve(&self, surface: Extent2d) -> Extent2d {
        match *self {
            ImageSize::Absolute { width, height } => Extent2d::new(width.max(1), height.max(1)),
            ImageSize::Relative {
                width_scale,
                height_scale,
            } => Extent2d::new(
                ((surface.width as f32 * width_scale) as u32).max(1),
                ((surface.height as f32 * height_scale) as u32).max(1),
            ),
        }
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::surface()
    }
}

/// Layout an image is in while a command touches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// What happens to an attachment when rendering begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
    DontCare,
}

impl Default for LoadOp {
    fn default() -> Self {
        LoadOp::Clear([0.0, 0.0, 0.0, 1.0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    Store,
    Discard,
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessellationControl,
    TessellationEvaluation,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Geometry,
        ShaderStage::TessellationControl,
        ShaderStage::TessellationEvaluation,
        ShaderStage::Compute,
    ];

    pub fn flag(&self) -> ShaderStageFlags {
        match self {
            ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => ShaderStageFlags::GEOMETRY,
            ShaderStage::TessellationControl => ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Compute => ShaderStageFlags::COMPUTE,
        }
    }

    /// Index into per-stage tables.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessellationControl => "tessellation-control",
            ShaderStage::TessellationEvaluation => "tessellation-evaluation",
            ShaderStage::Compute => "compute",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const NONE: Self = Self(0);
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const GEOMETRY: Self = Self(1 << 2);
    pub const TESSELLATION_CONTROL: Self = Self(1 << 3);
    pub const TESSELLATION_EVALUATION: Self = Self(1 << 4);
    pub const COMPUTE: Self = Self(1 << 5);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));
    pub const ALL_GRAPHICS: Self = Self(0b1_1111);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ShaderStageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// How an operation consumes one of its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
    /// Texture half of a separate texture/sampler pair.
    SampledImage,
    /// Sampler half of a separate texture/sampler pair, reading the sampler of
    /// the connected image resource.
    Sampler,
    /// Source image of a device-side copy, no descriptor is written.
    TransferSource,
    /// Swapchain image handed back for display, no descriptor is written.
    PresentSource,
}

impl DescriptorKind {
    /// Whether the binding lands in the operation's descriptor set.
    pub fn is_descriptor(&self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBuffer
                | DescriptorKind::CombinedImageSampler
                | DescriptorKind::SampledImage
                | DescriptorKind::Sampler
        )
    }

    /// Whether the operation reads the image contents through this binding.
    pub fn reads_image(&self) -> bool {
        !matches!(self, DescriptorKind::UniformBuffer | DescriptorKind::Sampler)
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Format of one vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Uint,
    Uint2,
    Uint4,
    /// Four bytes normalized to 0.0-1.0
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(&self) -> u32 {
        match self {
            VertexFormat::Float | VertexFormat::Uint | VertexFormat::Unorm8x4 => 4,
            VertexFormat::Float2 | VertexFormat::Uint2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 | VertexFormat::Uint4 => 16,
        }
    }
}

/// Whether a vertex buffer advances per vertex or per instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    #[default]
    Vertex,
    Instance,
}

/// Shader input location fed from a vertex buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    /// Byte offset inside one element
    pub offset: u32,
}

/// Layout of one vertex buffer, bound at its index in the pipeline's list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub stride: u32,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            step_mode: VertexStepMode::Vertex,
            attributes: Vec::new(),
        }
    }

    /// Tightly packed attributes at consecutive locations starting from 0.
    pub fn packed(formats: &[VertexFormat]) -> Self {
        let mut layout = Self::new(0);
        for (location, format) in formats.iter().enumerate() {
            layout.attributes.push(VertexAttribute {
                location: location as u32,
                format: *format,
                offset: layout.stride,
            });
            layout.stride += format.size();
        }
        layout
    }

    pub fn with_attribute(mut self, location: u32, format: VertexFormat, offset: u32) -> Self {
        self.attributes.push(VertexAttribute {
            location,
            format,
            offset,
        });
        self
    }

    pub fn per_instance(mut self) -> Self {
        self.step_mode = VertexStepMode::Instance;
        self
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const UNIFORM: Self = Self(1 << 0);
    pub const STORAGE: Self = Self(1 << 1);
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const VERTEX: Self = Self(1 << 4);
    pub const INDEX: Self = Self(1 << 5);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const SAMPLED: Self = Self(1 << 2);
    pub const COLOR_ATTACHMENT: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer descriptor
///
/// Buffers are host visible and stay mapped for their whole lifetime.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Image descriptor
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub extent: Extent3d,
    pub layers: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    /// Layout the backend leaves the image in after creation.
    pub initial_layout: ImageLayout,
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            extent: Extent3d::default(),
            layers: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
            initial_layout: ImageLayout::General,
        }
    }
}

/// Single descriptor set layout entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: ShaderStageFlags,
    pub count: u32,
}

/// Compiled shader stage handed to the backend
#[derive(Debug, Clone)]
pub struct ShaderModuleDescriptor {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub spirv: Vec<u32>,
}

/// Graphics pipeline descriptor
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<String>,
    pub shaders: Vec<ShaderModuleDescriptor>,
    pub descriptor_set_layout: super::DescriptorSetLayoutHandle,
    pub color_formats: Vec<TextureFormat>,
    pub topology: PrimitiveTopology,
    /// Empty for pipelines that generate their vertices in the shader
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub extent: Extent2d,
    pub alpha_blending: bool,
}
