//! Render graph definition, compilation and submission

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::*;
use crate::config::GraphSettings;
use crate::error::GraphError;
use crate::renderer::event::Event;

use super::compile_result::CompileResult;
use super::connection::{ConnectionSet, InputBinding, InputEdge, OutputBinding, OutputEdge};
use super::operation::{
    Operation, OperationId, RecordContext, RenderOperation, ResolvedOutput, VertexInput,
};
use super::pass::{compute_passes, Pass};
use super::resource::{Resource, ResourceId};

/// Directed graph of resources and operations
///
/// The graph is built once, then compiled into per-frame command buffers. Compiling again
/// (after a resize or a topology change) replaces the previous [`CompileResult`].
pub struct RenderGraph {
    device: Arc<dyn GraphicsDevice>,
    resources: Vec<Resource>,
    operations: Vec<Operation>,
    connections: ConnectionSet,
    settings: GraphSettings,
    result: Option<CompileResult>,
    compiled: bool,
    compiled_event: Event<GraphSettings>,
}

impl RenderGraph {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device,
            resources: Vec::new(),
            operations: Vec::new(),
            connections: ConnectionSet::new(),
            settings: GraphSettings::default(),
            result: None,
            compiled: false,
            compiled_event: Event::new(),
        }
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn add_resource(&mut self, resource: impl Into<Resource>) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(resource.into());
        self.compiled = false;
        id
    }

    pub fn add_operation(&mut self, operation: impl Into<Operation>) -> OperationId {
        let id = OperationId(self.operations.len() as u32);
        self.operations.push(operation.into());
        self.compiled = false;
        id
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.index())
    }

    /// Changes to a compiled resource take effect on the next compile.
    pub fn resource_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id.index())
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> + '_ {
        self.resources
            .iter()
            .enumerate()
            .map(|(index, resource)| (ResourceId(index as u32), resource))
    }

    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.resources()
            .find(|(_, resource)| resource.name() == Some(name))
            .map(|(id, _)| id)
    }

    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id.index())
    }

    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &Operation)> + '_ {
        self.operations
            .iter()
            .enumerate()
            .map(|(index, operation)| (OperationId(index as u32), operation))
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    /// Connect `resource` as an input of `operation`.
    ///
    /// Panics when the binding kind does not fit the resource or the operation, or when the
    /// slot is already taken.
    pub fn create_input_connection(
        &mut self,
        operation: OperationId,
        resource: ResourceId,
        binding: InputBinding,
    ) {
        let op = self.expect_operation(operation);
        let res = self.expect_resource(resource);
        assert!(
            op.accepts_input(binding.kind),
            "{} operation cannot take a {:?} input",
            op.kind_name(),
            binding.kind
        );
        assert!(
            input_kind_matches(binding.kind, res),
            "{:?} input cannot be bound to a {} resource",
            binding.kind,
            res.kind_name()
        );
        self.connections.add_input(resource, operation, binding);
        self.compiled = false;
    }

    /// Add `stages` to an existing input binding. Returns false when there is none.
    pub(crate) fn merge_input_stages(
        &mut self,
        operation: OperationId,
        slot: u32,
        stages: ShaderStageFlags,
    ) -> bool {
        match self.connections.input_mut(operation, slot) {
            Some(edge) => {
                edge.binding.stages |= stages;
                self.compiled = false;
                true
            }
            None => false,
        }
    }

    /// Connect `resource` as output `slot` of `operation`, deriving the binding from the
    /// resource.
    pub fn create_output_connection(&mut self, operation: OperationId, slot: u32, resource: ResourceId) {
        let op = self.expect_operation(operation);
        let res = self.expect_resource(resource);
        let format = res
            .format()
            .unwrap_or_else(|| panic!("{} cannot be written by an operation", res.kind_name()));
        let final_layout = match res {
            Resource::SwapchainImage(_) => ImageLayout::PresentSrc,
            _ => ImageLayout::ColorAttachment,
        };
        let load_op = match op {
            Operation::Render(render) => LoadOp::Clear(render.clear_color.to_array()),
            _ => LoadOp::DontCare,
        };
        let binding = OutputBinding::new(slot, format)
            .with_final_layout(final_layout)
            .with_load_op(load_op)
            .with_layers(res.layers());
        self.create_output_connection_with(operation, resource, binding);
    }

    pub fn create_output_connection_with(
        &mut self,
        operation: OperationId,
        resource: ResourceId,
        binding: OutputBinding,
    ) {
        let op = self.expect_operation(operation);
        let res = self.expect_resource(resource);
        assert!(
            op.accepts_outputs(),
            "{} operation cannot have outputs",
            op.kind_name()
        );
        assert!(
            res.is_writable(),
            "{} resource cannot be written by an operation",
            res.kind_name()
        );
        assert_eq!(
            res.format(),
            Some(binding.format),
            "output binding format does not match {resource}"
        );
        self.connections.add_output(operation, resource, binding);
        self.compiled = false;
    }

    /// Create the physical backings of every resource.
    ///
    /// The device must be idle: previously recorded command buffers are released.
    pub fn compile_resources(&mut self, settings: &GraphSettings) -> Result<(), GraphError> {
        self.release_result();
        self.settings = *settings;
        self.compile_resources_inner(settings)
    }

    /// Compile the graph into per-frame command buffers.
    ///
    /// Waits for the device to go idle before touching anything, so it is safe to call while
    /// frames are in flight.
    pub fn compile(&mut self, settings: &GraphSettings) -> Result<(), GraphError> {
        self.device.wait_idle()?;
        self.device.wait_queue_idle()?;
        self.release_result();
        self.settings = *settings;

        match self.try_compile(settings) {
            Ok(result) => {
                log::info!(
                    "Compiled render graph: {} operations in {} passes, {} frames in flight",
                    self.operations.len(),
                    result.passes().len(),
                    settings.frames_in_flight
                );
                self.result = Some(result);
                self.compiled = true;
                self.compiled_event.fire(settings);
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to compile render graph: {}", err);
                Err(err)
            }
        }
    }

    /// Submit the command buffers of `frame`.
    ///
    /// Logs and does nothing when the graph is not compiled or `frame` is out of range.
    pub fn submit(
        &self,
        frame: u32,
        wait_semaphores: &[SemaphoreHandle],
        signal_semaphores: &[SemaphoreHandle],
        fence: Option<FenceHandle>,
    ) -> BackendResult<()> {
        let Some(result) = self.result.as_ref().filter(|_| self.compiled) else {
            log::error!("Submit of frame {} on a render graph that is not compiled", frame);
            return Ok(());
        };
        let Some(command_buffers) = result.command_buffers(frame) else {
            log::error!(
                "Frame {} is out of range for {} frames in flight",
                frame,
                result.frame_count()
            );
            return Ok(());
        };
        self.device.submit(&Submission {
            command_buffers,
            wait_semaphores,
            signal_semaphores,
            fence,
        })
    }

    /// Present a swapchain image rendered by this graph.
    pub fn present(
        &self,
        image_index: u32,
        swapchain: &dyn Swapchain,
        wait_semaphores: &[SemaphoreHandle],
    ) -> BackendResult<()> {
        assert!(
            swapchain.supports_presenting(),
            "present called with a swapchain that cannot present"
        );
        if !self.compiled {
            log::error!("Present of image {} on a render graph that is not compiled", image_index);
            return Ok(());
        }
        swapchain.present(image_index, wait_semaphores)
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Settings of the last compile.
    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub fn compile_result(&self) -> Option<&CompileResult> {
        self.result.as_ref().filter(|_| self.compiled)
    }

    pub fn passes(&self) -> &[Pass] {
        self.compile_result().map(CompileResult::passes).unwrap_or(&[])
    }

    /// Run `callback` after every successful compile.
    pub fn on_compiled(&mut self, callback: impl FnMut(&GraphSettings) + 'static) {
        self.compiled_event.subscribe(callback);
    }

    /// Debug name of an operation, or its kind and id.
    pub fn operation_label(&self, id: OperationId) -> String {
        match self.operation(id) {
            Some(op) => match op.name() {
                Some(name) => name.to_string(),
                None => format!("{} {}", op.kind_name(), id),
            },
            None => id.to_string(),
        }
    }

    pub fn resource_label(&self, id: ResourceId) -> String {
        match self.resource(id) {
            Some(resource) => match resource.name() {
                Some(name) => name.to_string(),
                None => format!("{} {}", resource.kind_name(), id),
            },
            None => id.to_string(),
        }
    }

    fn expect_operation(&self, id: OperationId) -> &Operation {
        self.operations
            .get(id.index())
            .unwrap_or_else(|| panic!("unknown {id}"))
    }

    fn expect_resource(&self, id: ResourceId) -> &Resource {
        self.resources
            .get(id.index())
            .unwrap_or_else(|| panic!("unknown {id}"))
    }

    fn release_result(&mut self) {
        if let Some(mut result) = self.result.take() {
            result.release(self.device.as_ref());
        }
        self.compiled = false;
    }

    fn compile_resources_inner(&mut self, settings: &GraphSettings) -> Result<(), GraphError> {
        let device = self.device.clone();
        for resource in &mut self.resources {
            resource.compile(device.as_ref(), settings)?;
        }
        log::debug!(
            "Compiled {} resources for {} frames in flight",
            self.resources.len(),
            settings.frames_in_flight
        );
        Ok(())
    }

    fn try_compile(&mut self, settings: &GraphSettings) -> Result<CompileResult, GraphError> {
        let passes = compute_passes(&self.operations, &self.connections)?;
        let mut result = CompileResult::new(*settings, passes, self.operations.len());
        let built = self
            .compile_resources_inner(settings)
            .and_then(|()| self.build(&mut result));
        if let Err(err) = built {
            result.release(self.device.as_ref());
            return Err(err);
        }
        Ok(result)
    }

    fn build(&self, result: &mut CompileResult) -> Result<(), GraphError> {
        let settings = *result.settings();
        for (id, operation) in self.operations() {
            let extent = self.operation_extent(id, operation, &settings)?;
            result.operation_state_mut(id).extent = extent;
            if let Operation::Render(render) = operation {
                self.build_render_state(id, render, result)?;
            }
        }

        let device = self.device.as_ref();
        for frame in 0..settings.frames_in_flight {
            let lists = self.record_frame(result, frame)?;
            let command_buffers = result.push_frame();
            for list in lists {
                let command_buffer = device.create_command_buffer()?;
                command_buffers.push(command_buffer);
                device.record_command_buffer(command_buffer, list.as_slice())?;
            }
        }
        Ok(())
    }

    fn resource_extent(&self, id: ResourceId) -> Result<Extent3d, GraphError> {
        self.resources[id.index()]
            .extent()
            .ok_or_else(|| GraphError::MissingBacking {
                resource: self.resource_label(id),
                frame: 0,
            })
    }

    fn operation_extent(
        &self,
        id: OperationId,
        operation: &Operation,
        settings: &GraphSettings,
    ) -> Result<Extent2d, GraphError> {
        let flatten = |extent: Extent3d| Extent2d::new(extent.width, extent.height);
        match operation {
            Operation::Render(_) => {
                let mut extent = None;
                for edge in self.connections.outputs_of(id) {
                    let output = flatten(self.resource_extent(edge.resource)?);
                    match extent {
                        None => extent = Some(output),
                        Some(first) if first != output => {
                            return Err(GraphError::InconsistentOutputExtents {
                                operation: self.operation_label(id),
                            });
                        }
                        Some(_) => {}
                    }
                }
                Ok(extent.unwrap_or_else(|| {
                    log::warn!(
                        "{} has no image outputs, using the {}x{} settings extent",
                        self.operation_label(id),
                        settings.width,
                        settings.height
                    );
                    settings.extent()
                }))
            }
            Operation::Transfer(_) => {
                let invalid = |reason: &str| GraphError::InvalidTransfer {
                    operation: self.operation_label(id),
                    reason: reason.to_string(),
                };
                let inputs: Vec<_> = self.connections.inputs_of(id).collect();
                let outputs: Vec<_> = self.connections.outputs_of(id).collect();
                if inputs.len() != 1 || outputs.len() != 1 {
                    return Err(invalid("needs exactly one input and one output"));
                }
                let src = self.resource_extent(inputs[0].resource)?;
                let dst = self.resource_extent(outputs[0].resource)?;
                if src != dst {
                    return Err(invalid("source and destination extents differ"));
                }
                let src_layers = self.resources[inputs[0].resource.index()].layers();
                let dst_layers = self.resources[outputs[0].resource.index()].layers();
                if src_layers != dst_layers {
                    return Err(invalid("source and destination layer counts differ"));
                }
                Ok(flatten(dst))
            }
            Operation::Present(_) => {
                let inputs: Vec<_> = self.connections.inputs_of(id).collect();
                if inputs.len() != 1 {
                    return Err(GraphError::InvalidPresent {
                        operation: self.operation_label(id),
                        reason: "needs exactly one swapchain image input".into(),
                    });
                }
                Ok(flatten(self.resource_extent(inputs[0].resource)?))
            }
        }
    }

    fn sorted_inputs(&self, id: OperationId) -> Vec<&InputEdge> {
        let mut edges: Vec<_> = self.connections.inputs_of(id).collect();
        edges.sort_by_key(|edge| edge.binding.slot);
        edges
    }

    fn sorted_outputs(&self, id: OperationId) -> Vec<&OutputEdge> {
        let mut edges: Vec<_> = self.connections.outputs_of(id).collect();
        edges.sort_by_key(|edge| edge.binding.slot);
        edges
    }

    fn build_render_state(
        &self,
        id: OperationId,
        render: &RenderOperation,
        result: &mut CompileResult,
    ) -> Result<(), GraphError> {
        let device = self.device.as_ref();
        let frames = result.settings().frames_in_flight;
        let inputs = self.sorted_inputs(id);

        let bindings: Vec<DescriptorBinding> = inputs
            .iter()
            .map(|edge| {
                if edge.binding.layer_count > self.resources[edge.resource.index()].layers() {
                    log::warn!(
                        "{} binds {} layers of {} which has fewer",
                        self.operation_label(id),
                        edge.binding.layer_count,
                        self.resource_label(edge.resource)
                    );
                }
                DescriptorBinding {
                    binding: edge.binding.slot,
                    kind: edge.binding.kind,
                    stages: edge.binding.stages,
                    count: 1,
                }
            })
            .collect();

        let layout = device.create_descriptor_set_layout(&bindings)?;
        result.operation_state_mut(id).descriptor_set_layout = Some(layout);

        if !bindings.is_empty() {
            for frame in 0..frames {
                let set = device.allocate_descriptor_set(layout)?;
                result.operation_state_mut(id).descriptor_sets.push(set);
                let writes = inputs
                    .iter()
                    .map(|edge| self.descriptor_write(edge, frame))
                    .collect::<Result<Vec<_>, _>>()?;
                device.write_descriptor_set(set, &writes)?;
            }
        }

        if let Some(input) = &render.vertex_input {
            self.upload_vertex_input(id, input, result)?;
        }

        let extent = result.operation_state_mut(id).extent;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: Some(self.operation_label(id)),
            shaders: render
                .pipeline
                .stages()
                .iter()
                .map(|shader| ShaderModuleDescriptor {
                    stage: shader.stage,
                    entry_point: shader.entry_point.clone(),
                    spirv: shader.spirv.clone(),
                })
                .collect(),
            descriptor_set_layout: layout,
            color_formats: self
                .sorted_outputs(id)
                .iter()
                .map(|edge| edge.binding.format)
                .collect(),
            topology: render.topology,
            vertex_buffers: render
                .vertex_input
                .as_ref()
                .map(|input| input.layouts.clone())
                .unwrap_or_default(),
            extent,
            alpha_blending: render.alpha_blending,
        })?;
        result.operation_state_mut(id).pipeline = Some(pipeline);
        Ok(())
    }

    /// Copy vertex and index data into host visible buffers owned by the compile result.
    fn upload_vertex_input(
        &self,
        id: OperationId,
        input: &VertexInput,
        result: &mut CompileResult,
    ) -> Result<(), GraphError> {
        let invalid = |reason: String| GraphError::InvalidVertexInput {
            operation: self.operation_label(id),
            reason,
        };
        if input.layouts.len() != input.buffers.len() {
            return Err(invalid(format!(
                "{} layouts for {} buffers",
                input.layouts.len(),
                input.buffers.len()
            )));
        }
        if let Some(index) = input.buffers.iter().position(Vec::is_empty) {
            return Err(invalid(format!("vertex buffer {index} is empty")));
        }
        if input.indices.as_ref().is_some_and(Vec::is_empty) {
            return Err(invalid("index buffer is empty".into()));
        }

        let device = self.device.as_ref();
        for (index, data) in input.buffers.iter().enumerate() {
            let buffer = device.create_buffer(&BufferDescriptor {
                label: Some(format!("{} vertices {index}", self.operation_label(id))),
                size: data.len() as u64,
                usage: BufferUsage::VERTEX,
            })?;
            result.operation_state_mut(id).vertex_buffers.push(buffer);
            device.write_buffer(buffer, 0, data)?;
        }
        if let Some(indices) = &input.indices {
            let bytes: &[u8] = bytemuck::cast_slice(indices);
            let buffer = device.create_buffer(&BufferDescriptor {
                label: Some(format!("{} indices", self.operation_label(id))),
                size: bytes.len() as u64,
                usage: BufferUsage::INDEX,
            })?;
            result.operation_state_mut(id).index_buffer = Some(buffer);
            device.write_buffer(buffer, 0, bytes)?;
        }
        log::debug!(
            "Uploaded {} vertex buffers{} for {}",
            input.buffers.len(),
            if input.indices.is_some() { " and indices" } else { "" },
            self.operation_label(id)
        );
        Ok(())
    }

    fn descriptor_write(&self, edge: &InputEdge, frame: u32) -> Result<DescriptorWrite, GraphError> {
        let resource = &self.resources[edge.resource.index()];
        let missing = || GraphError::MissingBacking {
            resource: self.resource_label(edge.resource),
            frame,
        };
        match edge.binding.kind {
            DescriptorKind::UniformBuffer => Ok(DescriptorWrite::UniformBuffer {
                binding: edge.binding.slot,
                buffer: resource.buffer(frame).ok_or_else(missing)?,
                size: resource.buffer_size().unwrap_or(0),
            }),
            DescriptorKind::SampledImage => Ok(DescriptorWrite::SampledImage {
                binding: edge.binding.slot,
                image: resource.image(frame).ok_or_else(missing)?,
            }),
            DescriptorKind::Sampler => Ok(DescriptorWrite::Sampler {
                binding: edge.binding.slot,
                sampler: resource.sampler().ok_or_else(missing)?,
            }),
            _ => Ok(DescriptorWrite::CombinedImageSampler {
                binding: edge.binding.slot,
                image: resource.image(frame).ok_or_else(missing)?,
                sampler: resource.sampler().ok_or_else(missing)?,
            }),
        }
    }

    /// Record one frame into one command list per command buffer.
    fn record_frame(&self, result: &CompileResult, frame: u32) -> Result<Vec<CommandList>, GraphError> {
        let mut lists = vec![CommandList::new(); result.command_buffers_per_frame()];
        let mut tracker = LayoutTracker::default();

        for (pass_index, pass) in result.passes().iter().enumerate() {
            for (position, id) in pass.operations().enumerate() {
                let Some(list) = result
                    .command_buffer_index(id)
                    .and_then(|index| lists.get_mut(index))
                else {
                    continue;
                };
                if pass_index > 0 && position == 0 {
                    list.push(Command::FullBarrier);
                }

                let operation = &self.operations[id.index()];
                let mut barriers = Vec::new();

                let mut inputs = Vec::new();
                let mut copy_extent = Extent3d::default();
                let mut layers = 1;
                for edge in self.sorted_inputs(id) {
                    let resource = &self.resources[edge.resource.index()];
                    if !resource.is_image() || !edge.binding.kind.reads_image() {
                        continue;
                    }
                    let image = self.frame_image(edge.resource, frame)?;
                    barriers.push(tracker.transition(image, resource, operation.input_layout()));
                    if inputs.is_empty() {
                        copy_extent = resource.extent().unwrap_or_default();
                        layers = resource.layers();
                    }
                    inputs.push(image);
                }

                let output_edges = self.sorted_outputs(id);
                let mut outputs = Vec::with_capacity(output_edges.len());
                for edge in &output_edges {
                    let resource = &self.resources[edge.resource.index()];
                    let image = self.frame_image(edge.resource, frame)?;
                    barriers.push(tracker.transition(image, resource, operation.output_layout()));
                    outputs.push(ResolvedOutput {
                        image,
                        load_op: edge.binding.load_op,
                        store_op: edge.binding.store_op,
                    });
                }
                list.transition(barriers);

                let state = result.operation_state(id);
                operation.record(
                    &RecordContext {
                        pipeline: state.and_then(|state| state.pipeline),
                        descriptor_set: state
                            .and_then(|state| state.descriptor_sets.get(frame as usize).copied()),
                        extent: state.map(|state| state.extent).unwrap_or_default(),
                        inputs: &inputs,
                        outputs: &outputs,
                        copy_extent,
                        layers,
                        vertex_buffers: state
                            .map(|state| state.vertex_buffers.as_slice())
                            .unwrap_or(&[]),
                        index_buffer: state.and_then(|state| state.index_buffer),
                    },
                    list,
                );

                let finals = output_edges
                    .iter()
                    .zip(&outputs)
                    .map(|(edge, output)| {
                        let resource = &self.resources[edge.resource.index()];
                        tracker.transition(output.image, resource, edge.binding.final_layout)
                    })
                    .collect::<Vec<_>>();
                list.transition(finals);
            }
        }

        if let Some(last) = lists.last_mut() {
            last.transition(tracker.restore_all());
        }
        Ok(lists)
    }

    fn frame_image(&self, id: ResourceId, frame: u32) -> Result<ImageHandle, GraphError> {
        self.resources[id.index()]
            .image(frame)
            .ok_or_else(|| GraphError::MissingBacking {
                resource: self.resource_label(id),
                frame,
            })
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::warn!("Failed to wait for device idle while dropping render graph: {}", err);
        }
        self.release_result();
        let device = self.device.clone();
        for resource in &mut self.resources {
            resource.release(device.as_ref());
        }
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("device", &self.device.name())
            .field("resources", &self.resources.len())
            .field("operations", &self.operations.len())
            .field("compiled", &self.compiled)
            .field("settings", &self.settings)
            .finish()
    }
}

fn input_kind_matches(kind: DescriptorKind, resource: &Resource) -> bool {
    match kind {
        DescriptorKind::UniformBuffer => matches!(resource, Resource::UniformBlock(_)),
        DescriptorKind::CombinedImageSampler
        | DescriptorKind::SampledImage
        | DescriptorKind::Sampler
        | DescriptorKind::TransferSource => {
            matches!(resource, Resource::Image(_) | Resource::ReadOnlyImage(_))
        }
        DescriptorKind::PresentSource => matches!(resource, Resource::SwapchainImage(_)),
    }
}

/// Current layout of every image a frame touches, in first-touch order
#[derive(Debug, Default)]
struct LayoutTracker {
    images: Vec<TrackedImage>,
    index: HashMap<ImageHandle, usize>,
}

#[derive(Debug)]
struct TrackedImage {
    image: ImageHandle,
    initial: ImageLayout,
    current: ImageLayout,
    layers: u32,
}

impl LayoutTracker {
    fn transition(&mut self, image: ImageHandle, resource: &Resource, layout: ImageLayout) -> ImageBarrier {
        let index = *self.index.entry(image).or_insert_with(|| {
            let initial = resource.initial_layout().unwrap_or(ImageLayout::Undefined);
            self.images.push(TrackedImage {
                image,
                initial,
                current: initial,
                layers: resource.layers(),
            });
            self.images.len() - 1
        });
        let tracked = &mut self.images[index];
        let barrier = ImageBarrier {
            image,
            old_layout: tracked.current,
            new_layout: layout,
            layers: tracked.layers,
        };
        tracked.current = layout;
        barrier
    }

    /// Barriers taking every touched image back to the layout it started the frame in.
    fn restore_all(&mut self) -> Vec<ImageBarrier> {
        self.images
            .iter_mut()
            .map(|tracked| {
                let barrier = ImageBarrier {
                    image: tracked.image,
                    old_layout: tracked.current,
                    new_layout: tracked.initial,
                    layers: tracked.layers,
                };
                tracked.current = tracked.initial;
                barrier
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::render_graph::operation::{DrawSpec, TransferOperation};
    use crate::render_graph::resource::{ImageResource, UniformBlockResource};
    use crate::shader::{CompiledShader, ShaderPipeline, ShaderReflection};

    fn stub_pipeline() -> ShaderPipeline {
        let stage = |stage| CompiledShader {
            stage,
            entry_point: "main".into(),
            spirv: vec![0x0723_0203],
            reflection: ShaderReflection::default(),
        };
        ShaderPipeline::new(vec![stage(ShaderStage::Vertex), stage(ShaderStage::Fragment)])
    }

    fn image(graph: &mut RenderGraph, name: &str) -> ResourceId {
        graph.add_resource(ImageResource::new(TextureFormat::Rgba8Unorm, ImageSize::surface()).named(name))
    }

    #[test]
    fn test_render_into_image_records_expected_commands() {
        let device = Arc::new(DummyDevice::new());
        let mut graph = RenderGraph::new(device.clone());
        let target = image(&mut graph, "target");
        let params = graph.add_resource(UniformBlockResource::new(16).named("params"));
        let op = graph.add_operation(RenderOperation::new(stub_pipeline(), DrawSpec::fullscreen_triangle()));
        graph.create_input_connection(op, params, InputBinding::uniform(0, ShaderStageFlags::FRAGMENT));
        graph.create_output_connection(op, 0, target);

        graph.compile(&GraphSettings::new(2, 8, 8)).unwrap();
        let result = graph.compile_result().unwrap();
        let state = result.operation_state(op).unwrap();
        assert_eq!(state.descriptor_sets.len(), 2);
        assert_eq!(state.extent, Extent2d::new(8, 8));

        let image = graph.resource(target).unwrap().image(1).unwrap();
        let commands = device
            .recorded_commands(result.command_buffers(1).unwrap()[0])
            .unwrap();
        assert_eq!(
            commands.first(),
            Some(&Command::ImageBarriers(vec![ImageBarrier {
                image,
                old_layout: ImageLayout::General,
                new_layout: ImageLayout::ColorAttachment,
                layers: 1,
            }]))
        );
        assert!(commands.contains(&Command::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }));
        assert_eq!(
            commands.last(),
            Some(&Command::ImageBarriers(vec![ImageBarrier {
                image,
                old_layout: ImageLayout::ColorAttachment,
                new_layout: ImageLayout::General,
                layers: 1,
            }]))
        );
    }

    #[test]
    fn test_inconsistent_output_extents() {
        let device = Arc::new(DummyDevice::new());
        let mut graph = RenderGraph::new(device.clone());
        let full = image(&mut graph, "full");
        let half = graph.add_resource(ImageResource::new(
            TextureFormat::Rgba8Unorm,
            ImageSize::Relative {
                width_scale: 0.5,
                height_scale: 0.5,
            },
        ));
        let op = graph.add_operation(RenderOperation::new(stub_pipeline(), DrawSpec::quad()).named("split"));
        graph.create_output_connection(op, 0, full);
        graph.create_output_connection(op, 1, half);

        let err = graph.compile(&GraphSettings::new(1, 64, 64)).unwrap_err();
        assert_eq!(
            err,
            GraphError::InconsistentOutputExtents {
                operation: "split".into()
            }
        );
        assert!(!graph.is_compiled());
        assert!(graph.compile_result().is_none());
    }

    #[test]
    fn test_transfer_needs_matching_extents() {
        let device = Arc::new(DummyDevice::new());
        let mut graph = RenderGraph::new(device);
        let src = image(&mut graph, "src");
        let dst = graph.add_resource(ImageResource::new(
            TextureFormat::Rgba8Unorm,
            ImageSize::Absolute { width: 3, height: 3 },
        ));
        let copy = graph.add_operation(TransferOperation::new());
        graph.create_input_connection(copy, src, InputBinding::transfer_source());
        graph.create_output_connection(copy, 0, dst);

        let err = graph.compile(&GraphSettings::new(1, 16, 16)).unwrap_err();
        assert!(matches!(err, GraphError::InvalidTransfer { .. }));
    }

    #[test]
    fn test_failed_compile_leaves_no_device_objects_behind() {
        let device = Arc::new(DummyDevice::new());
        let mut graph = RenderGraph::new(device.clone());
        let target = image(&mut graph, "target");
        let broken = ShaderPipeline::new(vec![CompiledShader {
            stage: ShaderStage::Vertex,
            entry_point: "main".into(),
            spirv: Vec::new(),
            reflection: ShaderReflection::default(),
        }]);
        let op = graph.add_operation(RenderOperation::new(broken, DrawSpec::quad()));
        graph.create_output_connection(op, 0, target);

        let err = graph.compile(&GraphSettings::new(1, 4, 4)).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Backend(BackendError::PipelineCreationFailed(_))
        ));
        // only the image backing and its sampler remain
        assert_eq!(device.live_object_count(), 2);
    }

    #[test]
    #[should_panic(expected = "cannot be bound to a uniform block resource")]
    fn test_sampled_input_on_uniform_block_panics() {
        let device = Arc::new(DummyDevice::new());
        let mut graph = RenderGraph::new(device);
        let block = graph.add_resource(UniformBlockResource::new(4));
        let op = graph.add_operation(RenderOperation::new(stub_pipeline(), DrawSpec::quad()));
        graph.create_input_connection(op, block, InputBinding::sampled(0, ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_on_compiled_fires_with_settings() {
        let device = Arc::new(DummyDevice::new());
        let mut graph = RenderGraph::new(device);
        let target = image(&mut graph, "target");
        let op = graph.add_operation(RenderOperation::new(stub_pipeline(), DrawSpec::quad()));
        graph.create_output_connection(op, 0, target);

        let seen = std::rc::Rc::new(std::cell::Cell::new(0));
        let counter = seen.clone();
        graph.on_compiled(move |settings| counter.set(settings.frames_in_flight));
        graph.compile(&GraphSettings::new(3, 4, 4)).unwrap();
        assert_eq!(seen.get(), 3);
    }
}
