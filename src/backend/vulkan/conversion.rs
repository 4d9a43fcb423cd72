//! Type conversions between backend types and Vulkan types.

use ash::vk;

use crate::backend::traits::BackendError;
use crate::backend::types::*;
use crate::config::PresentMode;

pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    result
}

pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R8Srgb => vk::Format::R8_SRGB,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
    }
}

/// Inverse of [`convert_texture_format`], `None` for surface formats the graph cannot name.
pub fn texture_format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    let format = match format {
        vk::Format::R8_UNORM => TextureFormat::R8Unorm,
        vk::Format::R8_SRGB => TextureFormat::R8Srgb,
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8UnormSrgb,
        vk::Format::R16G16B16A16_SFLOAT => TextureFormat::Rgba16Float,
        vk::Format::R32G32B32A32_SFLOAT => TextureFormat::Rgba32Float,
        vk::Format::R32_SFLOAT => TextureFormat::R32Float,
        vk::Format::R32G32_SFLOAT => TextureFormat::Rg32Float,
        _ => return None,
    };
    Some(format)
}

pub fn convert_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    result
}

/// Image and view type for an extent with `layers` array layers.
pub fn image_types(extent: Extent3d, layers: u32) -> (vk::ImageType, vk::ImageViewType) {
    match extent.dimension() {
        ImageDimension::D1 if layers > 1 => (vk::ImageType::TYPE_1D, vk::ImageViewType::TYPE_1D_ARRAY),
        ImageDimension::D1 => (vk::ImageType::TYPE_1D, vk::ImageViewType::TYPE_1D),
        ImageDimension::D3 => (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D),
        ImageDimension::D2 | ImageDimension::Cube if layers > 1 => {
            (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D_ARRAY)
        }
        ImageDimension::D2 | ImageDimension::Cube => (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D),
    }
}

pub fn convert_extent(extent: Extent3d) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: extent.depth,
    }
}

pub fn convert_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Accesses that must be made available before leaving `layout`.
pub fn src_access_mask(layout: ImageLayout) -> vk::AccessFlags {
    match layout {
        ImageLayout::Undefined | ImageLayout::PresentSrc => vk::AccessFlags::empty(),
        ImageLayout::General => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ImageLayout::ColorAttachment => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ImageLayout::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        ImageLayout::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        ImageLayout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

/// Accesses that become visible after entering `layout`.
pub fn dst_access_mask(layout: ImageLayout) -> vk::AccessFlags {
    match layout {
        ImageLayout::Undefined | ImageLayout::PresentSrc => vk::AccessFlags::empty(),
        ImageLayout::General => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ImageLayout::ColorAttachment => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        ImageLayout::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        ImageLayout::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        ImageLayout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
    }
}

pub fn src_stage(layout: ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        ImageLayout::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
        ImageLayout::General => vk::PipelineStageFlags::ALL_COMMANDS,
        ImageLayout::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ImageLayout::ShaderReadOnly => vk::PipelineStageFlags::ALL_GRAPHICS,
        ImageLayout::TransferSrc | ImageLayout::TransferDst => vk::PipelineStageFlags::TRANSFER,
        ImageLayout::PresentSrc => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

pub fn dst_stage(layout: ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        ImageLayout::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
        ImageLayout::General => vk::PipelineStageFlags::ALL_COMMANDS,
        ImageLayout::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ImageLayout::ShaderReadOnly => vk::PipelineStageFlags::ALL_GRAPHICS,
        ImageLayout::TransferSrc | ImageLayout::TransferDst => vk::PipelineStageFlags::TRANSFER,
        ImageLayout::PresentSrc => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

pub fn convert_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn convert_vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float => vk::Format::R32_SFLOAT,
        VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint => vk::Format::R32_UINT,
        VertexFormat::Uint2 => vk::Format::R32G32_UINT,
        VertexFormat::Uint4 => vk::Format::R32G32B32A32_UINT,
        VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Binding and attribute descriptions, binding `n` being the `n`th layout.
pub fn convert_vertex_layouts(
    layouts: &[VertexBufferLayout],
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let bindings = layouts
        .iter()
        .enumerate()
        .map(|(binding, layout)| vk::VertexInputBindingDescription {
            binding: binding as u32,
            stride: layout.stride,
            input_rate: match layout.step_mode {
                VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
                VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
            },
        })
        .collect();
    let attributes = layouts
        .iter()
        .enumerate()
        .flat_map(|(binding, layout)| {
            layout
                .attributes
                .iter()
                .map(move |attribute| vk::VertexInputAttributeDescription {
                    location: attribute.location,
                    binding: binding as u32,
                    format: convert_vertex_format(attribute.format),
                    offset: attribute.offset,
                })
        })
        .collect();
    (bindings, attributes)
}

pub fn convert_shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn convert_shader_stage_flags(flags: ShaderStageFlags) -> vk::ShaderStageFlags {
    ShaderStage::ALL
        .iter()
        .filter(|stage| flags.contains(stage.flag()))
        .fold(vk::ShaderStageFlags::empty(), |acc, stage| {
            acc | convert_shader_stage(*stage)
        })
}

/// `None` for kinds that never land in a descriptor set.
pub fn convert_descriptor_kind(kind: DescriptorKind) -> Option<vk::DescriptorType> {
    match kind {
        DescriptorKind::UniformBuffer => Some(vk::DescriptorType::UNIFORM_BUFFER),
        DescriptorKind::CombinedImageSampler => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        DescriptorKind::SampledImage => Some(vk::DescriptorType::SAMPLED_IMAGE),
        DescriptorKind::Sampler => Some(vk::DescriptorType::SAMPLER),
        DescriptorKind::TransferSource | DescriptorKind::PresentSource => None,
    }
}

pub fn convert_load_op(op: LoadOp) -> (vk::AttachmentLoadOp, vk::ClearValue) {
    match op {
        LoadOp::Clear(color) => (
            vk::AttachmentLoadOp::CLEAR,
            vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        ),
        LoadOp::Load => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
        LoadOp::DontCare => (vk::AttachmentLoadOp::DONT_CARE, vk::ClearValue::default()),
    }
}

pub fn convert_store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::Discard => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn convert_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Map a Vulkan result to a backend error, keeping the conditions callers react to.
pub fn map_vk_error(result: vk::Result, context: fn(String) -> BackendError) -> BackendError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::OutOfDateSwapchain,
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        other => context(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for format in [
            TextureFormat::R8Srgb,
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba32Float,
        ] {
            assert_eq!(texture_format_from_vk(convert_texture_format(format)), Some(format));
        }
        assert_eq!(texture_format_from_vk(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn test_stage_flags() {
        let flags = convert_shader_stage_flags(ShaderStageFlags::VERTEX_FRAGMENT);
        assert_eq!(flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_vertex_layouts_number_bindings_by_position() {
        let layouts = [
            VertexBufferLayout::packed(&[VertexFormat::Float3, VertexFormat::Float2]),
            VertexBufferLayout::new(16)
                .with_attribute(2, VertexFormat::Float4, 0)
                .per_instance(),
        ];
        let (bindings, attributes) = convert_vertex_layouts(&layouts);
        assert_eq!(bindings.len(), 2);
        assert_eq!((bindings[0].stride, bindings[0].input_rate), (20, vk::VertexInputRate::VERTEX));
        assert_eq!(bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        let placed: Vec<(u32, u32, u32)> = attributes
            .iter()
            .map(|attribute| (attribute.location, attribute.binding, attribute.offset))
            .collect();
        assert_eq!(placed, vec![(0, 0, 0), (1, 0, 12), (2, 1, 0)]);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_array_view_types() {
        let (image, view) = image_types(Extent3d::new(8, 8, 1), 6);
        assert_eq!(image, vk::ImageType::TYPE_2D);
        assert_eq!(view, vk::ImageViewType::TYPE_2D_ARRAY);
        let (_, view) = image_types(Extent3d::new(8, 1, 1), 1);
        assert_eq!(view, vk::ImageViewType::TYPE_1D);
    }

    #[test]
    fn test_out_of_date_mapping() {
        assert_eq!(
            map_vk_error(vk::Result::ERROR_OUT_OF_DATE_KHR, BackendError::PresentFailed),
            BackendError::OutOfDateSwapchain
        );
        assert!(matches!(
            map_vk_error(vk::Result::ERROR_INITIALIZATION_FAILED, BackendError::SubmitFailed),
            BackendError::SubmitFailed(_)
        ));
    }
}
