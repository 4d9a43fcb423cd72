//! Output of a render graph compile

use crate::backend::*;
use crate::config::{CommandBufferStrategy, GraphSettings};

use super::operation::OperationId;
use super::pass::Pass;

/// Device objects created for one operation
#[derive(Debug, Clone, Default)]
pub struct OperationState {
    pub descriptor_set_layout: Option<DescriptorSetLayoutHandle>,
    /// One per frame in flight, empty for operations without descriptors.
    pub descriptor_sets: Vec<DescriptorSetHandle>,
    pub pipeline: Option<PipelineHandle>,
    pub extent: Extent2d,
    /// Uploaded vertex data, one buffer per vertex layout.
    pub vertex_buffers: Vec<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
}

/// Passes, per-frame command buffers and per-operation state of a compiled graph
///
/// Nothing changes until the next compile replaces the whole result.
#[derive(Debug)]
pub struct CompileResult {
    settings: GraphSettings,
    passes: Vec<Pass>,
    frames: Vec<Vec<CommandBufferHandle>>,
    op_to_command_buffer: Vec<Option<usize>>,
    command_buffer_to_ops: Vec<Vec<OperationId>>,
    operations: Vec<OperationState>,
}

impl CompileResult {
    pub(crate) fn new(settings: GraphSettings, passes: Vec<Pass>, operation_count: usize) -> Self {
        let ordered: Vec<OperationId> = passes.iter().flat_map(|pass| pass.operations()).collect();
        let mut op_to_command_buffer = vec![None; operation_count];
        let command_buffer_to_ops = match settings.command_buffer_strategy {
            CommandBufferStrategy::Single => {
                for op in &ordered {
                    op_to_command_buffer[op.index()] = Some(0);
                }
                vec![ordered]
            }
            CommandBufferStrategy::PerOperation => {
                for (index, op) in ordered.iter().enumerate() {
                    op_to_command_buffer[op.index()] = Some(index);
                }
                ordered.into_iter().map(|op| vec![op]).collect()
            }
        };
        Self {
            settings,
            passes,
            frames: Vec::new(),
            op_to_command_buffer,
            command_buffer_to_ops,
            operations: vec![OperationState::default(); operation_count],
        }
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Pass index of an operation.
    pub fn pass_of(&self, operation: OperationId) -> Option<usize> {
        self.passes.iter().position(|pass| pass.contains(operation))
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn command_buffers(&self, frame: u32) -> Option<&[CommandBufferHandle]> {
        self.frames.get(frame as usize).map(Vec::as_slice)
    }

    /// Number of command buffers recorded per frame.
    pub fn command_buffers_per_frame(&self) -> usize {
        self.command_buffer_to_ops.len()
    }

    pub fn command_buffer_index(&self, operation: OperationId) -> Option<usize> {
        self.op_to_command_buffer.get(operation.index()).copied().flatten()
    }

    pub fn operations_in_command_buffer(&self, index: usize) -> &[OperationId] {
        self.command_buffer_to_ops
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn operation_state(&self, operation: OperationId) -> Option<&OperationState> {
        self.operations.get(operation.index())
    }

    pub(crate) fn operation_state_mut(&mut self, operation: OperationId) -> &mut OperationState {
        &mut self.operations[operation.index()]
    }

    pub(crate) fn push_frame(&mut self) -> &mut Vec<CommandBufferHandle> {
        self.frames.push(Vec::new());
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Free every device object this result owns.
    pub fn release(&mut self, device: &dyn GraphicsDevice) {
        for command_buffer in self.frames.drain(..).flatten() {
            device.free_command_buffer(command_buffer);
        }
        for state in &mut self.operations {
            for set in state.descriptor_sets.drain(..) {
                device.free_descriptor_set(set);
            }
            if let Some(pipeline) = state.pipeline.take() {
                device.destroy_pipeline(pipeline);
            }
            if let Some(layout) = state.descriptor_set_layout.take() {
                device.destroy_descriptor_set_layout(layout);
            }
            for buffer in state.vertex_buffers.drain(..).chain(state.index_buffer.take()) {
                device.destroy_buffer(buffer);
            }
        }
    }
}
