//! Typed edges between resources and operations

use crate::backend::*;

use super::operation::OperationId;
use super::resource::ResourceId;

/// How an operation reads one of its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBinding {
    /// Descriptor binding for descriptor kinds, position otherwise.
    pub slot: u32,
    pub kind: DescriptorKind,
    pub stages: ShaderStageFlags,
    pub layer_count: u32,
}

impl InputBinding {
    pub fn new(slot: u32, kind: DescriptorKind, stages: ShaderStageFlags) -> Self {
        Self {
            slot,
            kind,
            stages,
            layer_count: 1,
        }
    }

    pub fn uniform(slot: u32, stages: ShaderStageFlags) -> Self {
        Self::new(slot, DescriptorKind::UniformBuffer, stages)
    }

    pub fn sampled(slot: u32, stages: ShaderStageFlags) -> Self {
        Self::new(slot, DescriptorKind::CombinedImageSampler, stages)
    }

    /// Texture binding sampled through a separately bound sampler.
    pub fn texture(slot: u32, stages: ShaderStageFlags) -> Self {
        Self::new(slot, DescriptorKind::SampledImage, stages)
    }

    /// Sampler binding fed from the sampler of the connected image.
    pub fn sampler(slot: u32, stages: ShaderStageFlags) -> Self {
        Self::new(slot, DescriptorKind::Sampler, stages)
    }

    pub fn transfer_source() -> Self {
        Self::new(0, DescriptorKind::TransferSource, ShaderStageFlags::NONE)
    }

    pub fn present_source() -> Self {
        Self::new(0, DescriptorKind::PresentSource, ShaderStageFlags::NONE)
    }

    pub fn with_layers(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }
}

/// How an operation writes one of its outputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputBinding {
    /// Color attachment index.
    pub slot: u32,
    pub format: TextureFormat,
    /// Layout the image is left in once the operation is done with it.
    pub final_layout: ImageLayout,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub layer_count: u32,
}

impl OutputBinding {
    pub fn new(slot: u32, format: TextureFormat) -> Self {
        Self {
            slot,
            format,
            final_layout: ImageLayout::ColorAttachment,
            load_op: LoadOp::default(),
            store_op: StoreOp::Store,
            layer_count: 1,
        }
    }

    pub fn with_final_layout(mut self, layout: ImageLayout) -> Self {
        self.final_layout = layout;
        self
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_layers(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEdge {
    pub resource: ResourceId,
    pub operation: OperationId,
    pub binding: InputBinding,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputEdge {
    pub operation: OperationId,
    pub resource: ResourceId,
    pub binding: OutputBinding,
}

/// All edges of a render graph in insertion order
#[derive(Debug, Clone, Default)]
pub struct ConnectionSet {
    inputs: Vec<InputEdge>,
    outputs: Vec<OutputEdge>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics when the operation already has an input at this slot.
    pub fn add_input(&mut self, resource: ResourceId, operation: OperationId, binding: InputBinding) {
        assert!(
            self.input(operation, binding.slot).is_none(),
            "{operation} already has an input at slot {}",
            binding.slot
        );
        self.inputs.push(InputEdge {
            resource,
            operation,
            binding,
        });
    }

    /// Panics when the operation already has an output at this slot.
    pub fn add_output(&mut self, operation: OperationId, resource: ResourceId, binding: OutputBinding) {
        assert!(
            self.output(operation, binding.slot).is_none(),
            "{operation} already has an output at slot {}",
            binding.slot
        );
        self.outputs.push(OutputEdge {
            operation,
            resource,
            binding,
        });
    }

    pub fn input(&self, operation: OperationId, slot: u32) -> Option<&InputEdge> {
        self.inputs
            .iter()
            .find(|edge| edge.operation == operation && edge.binding.slot == slot)
    }

    pub(crate) fn input_mut(&mut self, operation: OperationId, slot: u32) -> Option<&mut InputEdge> {
        self.inputs
            .iter_mut()
            .find(|edge| edge.operation == operation && edge.binding.slot == slot)
    }

    pub fn output(&self, operation: OperationId, slot: u32) -> Option<&OutputEdge> {
        self.outputs
            .iter()
            .find(|edge| edge.operation == operation && edge.binding.slot == slot)
    }

    pub fn input_edges(&self) -> &[InputEdge] {
        &self.inputs
    }

    pub fn output_edges(&self) -> &[OutputEdge] {
        &self.outputs
    }

    pub fn inputs_of(&self, operation: OperationId) -> impl Iterator<Item = &InputEdge> + '_ {
        self.inputs.iter().filter(move |edge| edge.operation == operation)
    }

    pub fn outputs_of(&self, operation: OperationId) -> impl Iterator<Item = &OutputEdge> + '_ {
        self.outputs.iter().filter(move |edge| edge.operation == operation)
    }

    /// Operations writing `resource`.
    pub fn producers_of(&self, resource: ResourceId) -> impl Iterator<Item = OperationId> + '_ {
        self.outputs
            .iter()
            .filter(move |edge| edge.resource == resource)
            .map(|edge| edge.operation)
    }

    /// Operations reading `resource`.
    pub fn consumers_of(&self, resource: ResourceId) -> impl Iterator<Item = OperationId> + '_ {
        self.inputs
            .iter()
            .filter(move |edge| edge.resource == resource)
            .map(|edge| edge.operation)
    }

    /// Other operations writing a resource that `operation` reads, sorted and deduplicated.
    pub fn pointing_here(&self, operation: OperationId) -> Vec<OperationId> {
        let mut ops: Vec<_> = self
            .inputs_of(operation)
            .flat_map(|edge| self.producers_of(edge.resource))
            .filter(|producer| *producer != operation)
            .collect();
        ops.sort();
        ops.dedup();
        ops
    }

    /// Other operations reading a resource that `operation` writes, sorted and deduplicated.
    pub fn pointing_to(&self, operation: OperationId) -> Vec<OperationId> {
        let mut ops: Vec<_> = self
            .outputs_of(operation)
            .flat_map(|edge| self.consumers_of(edge.resource))
            .filter(|consumer| *consumer != operation)
            .collect();
        ops.sort();
        ops.dedup();
        ops
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbour_queries() {
        let mut set = ConnectionSet::new();
        let (a, b, c) = (OperationId(0), OperationId(1), OperationId(2));
        let (r0, r1) = (ResourceId(0), ResourceId(1));

        set.add_output(a, r0, OutputBinding::new(0, TextureFormat::Rgba8Unorm));
        set.add_input(r0, b, InputBinding::sampled(0, ShaderStageFlags::FRAGMENT));
        set.add_input(r0, c, InputBinding::sampled(0, ShaderStageFlags::FRAGMENT));
        set.add_output(b, r1, OutputBinding::new(0, TextureFormat::Rgba8Unorm));
        set.add_input(r1, c, InputBinding::sampled(1, ShaderStageFlags::FRAGMENT));

        assert_eq!(set.pointing_here(c), vec![a, b]);
        assert_eq!(set.pointing_to(a), vec![b, c]);
        assert_eq!(set.consumers_of(r0).collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(set.producers_of(r1).collect::<Vec<_>>(), vec![b]);
        assert!(set.pointing_here(a).is_empty());
    }

    #[test]
    fn test_self_edges_are_not_neighbours() {
        let mut set = ConnectionSet::new();
        let op = OperationId(0);
        set.add_input(ResourceId(0), op, InputBinding::sampled(0, ShaderStageFlags::FRAGMENT));
        set.add_output(op, ResourceId(0), OutputBinding::new(0, TextureFormat::Rgba8Unorm));
        assert!(set.pointing_here(op).is_empty());
        assert!(set.pointing_to(op).is_empty());
    }

    #[test]
    #[should_panic(expected = "already has an input at slot 2")]
    fn test_duplicate_input_slot_panics() {
        let mut set = ConnectionSet::new();
        let op = OperationId(0);
        set.add_input(ResourceId(0), op, InputBinding::uniform(2, ShaderStageFlags::VERTEX));
        set.add_input(ResourceId(1), op, InputBinding::uniform(2, ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_same_slot_on_different_operations() {
        let mut set = ConnectionSet::new();
        set.add_output(OperationId(0), ResourceId(0), OutputBinding::new(0, TextureFormat::R8Unorm));
        set.add_output(OperationId(1), ResourceId(1), OutputBinding::new(0, TextureFormat::R8Unorm));
        assert_eq!(set.output_edges().len(), 2);
    }
}
