//! Units of GPU work in the render graph

use std::fmt;

use glam::Vec4;

use crate::backend::*;
use crate::shader::ShaderPipeline;

/// Dense handle of an operation, assigned in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub(crate) u32);

impl OperationId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation #{}", self.0)
    }
}

/// Non-indexed draw issued by a render operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawSpec {
    pub vertex_count: u32,
    pub instance_count: u32,
}

impl DrawSpec {
    pub const fn new(vertex_count: u32, instance_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count,
        }
    }

    /// Three vertices covering the whole target.
    pub const fn fullscreen_triangle() -> Self {
        Self::new(3, 1)
    }

    /// Two triangles.
    pub const fn quad() -> Self {
        Self::new(6, 1)
    }
}

/// Vertex and index data uploaded once per compile
///
/// Each buffer is bound at its position in `layouts`. With indices the operation issues
/// an indexed draw of all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexInput {
    pub layouts: Vec<VertexBufferLayout>,
    pub buffers: Vec<Vec<u8>>,
    pub indices: Option<Vec<u16>>,
}

impl VertexInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer<T: bytemuck::Pod>(mut self, layout: VertexBufferLayout, elements: &[T]) -> Self {
        self.layouts.push(layout);
        self.buffers.push(bytemuck::cast_slice(elements).to_vec());
        self
    }

    pub fn with_indices(mut self, indices: impl Into<Vec<u16>>) -> Self {
        self.indices = Some(indices.into());
        self
    }

    /// Elements in the first per-vertex buffer.
    pub fn vertex_count(&self) -> u32 {
        self.layouts
            .iter()
            .zip(&self.buffers)
            .find(|(layout, _)| layout.step_mode == VertexStepMode::Vertex)
            .map(|(layout, data)| match layout.stride {
                0 => 0,
                stride => data.len() as u32 / stride,
            })
            .unwrap_or(0)
    }

    pub fn index_count(&self) -> Option<u32> {
        self.indices.as_ref().map(|indices| indices.len() as u32)
    }
}

/// Draws into its outputs with a compiled pipeline
#[derive(Debug, Clone)]
pub struct RenderOperation {
    pub name: Option<String>,
    pub pipeline: ShaderPipeline,
    pub draw: DrawSpec,
    pub vertex_input: Option<VertexInput>,
    pub topology: PrimitiveTopology,
    /// Used by outputs connected without an explicit load op.
    pub clear_color: Vec4,
    pub alpha_blending: bool,
}

impl RenderOperation {
    pub fn new(pipeline: ShaderPipeline, draw: DrawSpec) -> Self {
        Self {
            name: None,
            pipeline,
            draw,
            vertex_input: None,
            topology: PrimitiveTopology::TriangleList,
            clear_color: Vec4::W,
            alpha_blending: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Draw from vertex buffers. The vertex count follows the first per-vertex buffer,
    /// the instance count is kept.
    pub fn with_vertex_input(mut self, input: VertexInput) -> Self {
        self.draw.vertex_count = input.vertex_count();
        self.vertex_input = Some(input);
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_clear_color(mut self, color: impl Into<Vec4>) -> Self {
        self.clear_color = color.into();
        self
    }

    pub fn with_alpha_blending(mut self, enabled: bool) -> Self {
        self.alpha_blending = enabled;
        self
    }
}

/// Device side copy from one image to another of the same size
#[derive(Debug, Clone, Default)]
pub struct TransferOperation {
    pub name: Option<String>,
}

impl TransferOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Hands a swapchain image back for display
#[derive(Debug, Clone, Default)]
pub struct PresentOperation {
    pub name: Option<String>,
}

impl PresentOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Closed set of operation kinds
#[derive(Debug, Clone)]
pub enum Operation {
    Render(RenderOperation),
    Transfer(TransferOperation),
    Present(PresentOperation),
}

/// Color target of a render operation, resolved for one frame
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedOutput {
    pub image: ImageHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

/// Everything an operation needs to record one frame
#[derive(Debug)]
pub(crate) struct RecordContext<'a> {
    pub pipeline: Option<PipelineHandle>,
    pub descriptor_set: Option<DescriptorSetHandle>,
    pub extent: Extent2d,
    /// Image inputs in slot order
    pub inputs: &'a [ImageHandle],
    /// Image outputs in slot order
    pub outputs: &'a [ResolvedOutput],
    pub copy_extent: Extent3d,
    pub layers: u32,
    pub vertex_buffers: &'a [BufferHandle],
    pub index_buffer: Option<BufferHandle>,
}

impl Operation {
    pub fn name(&self) -> Option<&str> {
        match self {
            Operation::Render(op) => op.name.as_deref(),
            Operation::Transfer(op) => op.name.as_deref(),
            Operation::Present(op) => op.name.as_deref(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::Render(_) => "render",
            Operation::Transfer(_) => "transfer",
            Operation::Present(_) => "present",
        }
    }

    pub fn as_render(&self) -> Option<&RenderOperation> {
        match self {
            Operation::Render(op) => Some(op),
            _ => None,
        }
    }

    /// Whether an input of `kind` can be bound to this operation.
    pub fn accepts_input(&self, kind: DescriptorKind) -> bool {
        match self {
            Operation::Render(_) => kind.is_descriptor(),
            Operation::Transfer(_) => kind == DescriptorKind::TransferSource,
            Operation::Present(_) => kind == DescriptorKind::PresentSource,
        }
    }

    pub fn accepts_outputs(&self) -> bool {
        !matches!(self, Operation::Present(_))
    }

    /// Layout an input image must be in while the operation runs.
    pub fn input_layout(&self) -> ImageLayout {
        match self {
            Operation::Render(_) => ImageLayout::ShaderReadOnly,
            Operation::Transfer(_) => ImageLayout::TransferSrc,
            Operation::Present(_) => ImageLayout::PresentSrc,
        }
    }

    /// Layout an output image must be in while the operation runs.
    pub fn output_layout(&self) -> ImageLayout {
        match self {
            Operation::Render(_) => ImageLayout::ColorAttachment,
            Operation::Transfer(_) => ImageLayout::TransferDst,
            Operation::Present(_) => ImageLayout::PresentSrc,
        }
    }

    pub(crate) fn record(&self, ctx: &RecordContext<'_>, list: &mut CommandList) {
        match self {
            Operation::Render(op) => {
                list.push(Command::BeginRendering {
                    targets: ctx
                        .outputs
                        .iter()
                        .map(|output| ColorTarget {
                            image: output.image,
                            load_op: output.load_op,
                            store_op: output.store_op,
                        })
                        .collect(),
                    extent: ctx.extent,
                });
                if let Some(pipeline) = ctx.pipeline {
                    list.push(Command::BindPipeline(pipeline));
                    if let Some(set) = ctx.descriptor_set {
                        list.push(Command::BindDescriptorSet { pipeline, set });
                    }
                    if !ctx.vertex_buffers.is_empty() {
                        list.push(Command::BindVertexBuffers {
                            first_binding: 0,
                            buffers: ctx.vertex_buffers.to_vec(),
                        });
                    }
                    let index_count = op.vertex_input.as_ref().and_then(VertexInput::index_count);
                    match (ctx.index_buffer, index_count) {
                        (Some(buffer), Some(index_count)) => {
                            list.push(Command::BindIndexBuffer(buffer));
                            list.push(Command::DrawIndexed {
                                index_count,
                                instance_count: op.draw.instance_count,
                            });
                        }
                        _ => list.push(Command::Draw {
                            vertex_count: op.draw.vertex_count,
                            instance_count: op.draw.instance_count,
                            first_vertex: 0,
                            first_instance: 0,
                        }),
                    }
                }
                list.push(Command::EndRendering);
            }
            Operation::Transfer(_) => {
                if let (Some(src), Some(dst)) = (ctx.inputs.first(), ctx.outputs.first()) {
                    list.push(Command::CopyImage {
                        src: *src,
                        dst: dst.image,
                        extent: ctx.copy_extent,
                        layers: ctx.layers,
                    });
                }
            }
            Operation::Present(_) => {}
        }
    }
}

impl From<RenderOperation> for Operation {
    fn from(op: RenderOperation) -> Self {
        Operation::Render(op)
    }
}

impl From<TransferOperation> for Operation {
    fn from(op: TransferOperation) -> Self {
        Operation::Transfer(op)
    }
}

impl From<PresentOperation> for Operation {
    fn from(op: PresentOperation) -> Self {
        Operation::Present(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_records_single_copy() {
        let op: Operation = TransferOperation::new().into();
        let mut list = CommandList::new();
        op.record(
            &RecordContext {
                pipeline: None,
                descriptor_set: None,
                extent: Extent2d::new(4, 4),
                inputs: &[ImageHandle(1)],
                outputs: &[ResolvedOutput {
                    image: ImageHandle(2),
                    load_op: LoadOp::Load,
                    store_op: StoreOp::Store,
                }],
                copy_extent: Extent3d::new(4, 4, 1),
                layers: 1,
                vertex_buffers: &[],
                index_buffer: None,
            },
            &mut list,
        );
        assert_eq!(
            list.as_slice(),
            &[Command::CopyImage {
                src: ImageHandle(1),
                dst: ImageHandle(2),
                extent: Extent3d::new(4, 4, 1),
                layers: 1,
            }]
        );
    }

    #[test]
    fn test_vertex_input_counts_follow_per_vertex_buffer() {
        let offsets = [[0.0f32, 0.0], [1.0, 0.5]];
        let corners = [[-1.0f32, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];
        let input = VertexInput::new()
            .with_buffer(VertexBufferLayout::packed(&[VertexFormat::Float2]).per_instance(), &offsets)
            .with_buffer(VertexBufferLayout::packed(&[VertexFormat::Float2]), &corners)
            .with_indices([0u16, 1, 2, 2, 1, 3]);
        assert_eq!(input.vertex_count(), 4);
        assert_eq!(input.index_count(), Some(6));
        assert_eq!(input.buffers[1].len(), 32);
        assert_eq!(VertexInput::new().index_count(), None);
    }

    #[test]
    fn test_input_kinds() {
        let transfer: Operation = TransferOperation::new().into();
        assert!(transfer.accepts_input(DescriptorKind::TransferSource));
        assert!(!transfer.accepts_input(DescriptorKind::UniformBuffer));

        let present: Operation = PresentOperation::new().into();
        assert!(present.accepts_input(DescriptorKind::PresentSource));
        assert!(!present.accepts_outputs());
        assert_eq!(present.input_layout(), ImageLayout::PresentSrc);
    }
}
