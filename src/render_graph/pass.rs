//! Pass layering
//!
//! Operations are grouped into passes: every operation of a pass only depends on operations
//! of earlier passes, so a full barrier between consecutive passes is enough to order the
//! whole frame.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::GraphError;

use super::connection::ConnectionSet;
use super::operation::{Operation, OperationId};
use super::resource::ResourceId;

/// Resources an operation touches within a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationIo {
    pub inputs: BTreeSet<ResourceId>,
    pub outputs: BTreeSet<ResourceId>,
}

impl OperationIo {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

/// Operations touching a resource within a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIo {
    pub readers: BTreeSet<OperationId>,
    pub writers: BTreeSet<OperationId>,
}

impl ResourceIo {
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty() && self.writers.is_empty()
    }
}

/// Set of operations that may run without ordering between them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pass {
    operations: BTreeMap<OperationId, OperationIo>,
    resources: BTreeMap<ResourceId, ResourceIo>,
}

impl Pass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation even if it has no IO yet.
    pub fn add_operation(&mut self, operation: OperationId) {
        self.operations.entry(operation).or_default();
    }

    pub fn add_input(&mut self, operation: OperationId, resource: ResourceId) {
        self.operations.entry(operation).or_default().inputs.insert(resource);
        self.resources.entry(resource).or_default().readers.insert(operation);
    }

    pub fn add_output(&mut self, operation: OperationId, resource: ResourceId) {
        self.operations.entry(operation).or_default().outputs.insert(resource);
        self.resources.entry(resource).or_default().writers.insert(operation);
    }

    pub fn remove_input(&mut self, operation: OperationId, resource: ResourceId) {
        if let Some(io) = self.operations.get_mut(&operation) {
            io.inputs.remove(&resource);
        }
        if let Some(io) = self.resources.get_mut(&resource) {
            io.readers.remove(&operation);
        }
        self.prune(operation, resource);
    }

    pub fn remove_output(&mut self, operation: OperationId, resource: ResourceId) {
        if let Some(io) = self.operations.get_mut(&operation) {
            io.outputs.remove(&resource);
        }
        if let Some(io) = self.resources.get_mut(&resource) {
            io.writers.remove(&operation);
        }
        self.prune(operation, resource);
    }

    fn prune(&mut self, operation: OperationId, resource: ResourceId) {
        if self.operations.get(&operation).is_some_and(OperationIo::is_empty) {
            self.operations.remove(&operation);
        }
        if self.resources.get(&resource).is_some_and(ResourceIo::is_empty) {
            self.resources.remove(&resource);
        }
    }

    /// Operations in id order.
    pub fn operations(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.operations.keys().copied()
    }

    pub fn resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.resources.keys().copied()
    }

    pub fn contains(&self, operation: OperationId) -> bool {
        self.operations.contains_key(&operation)
    }

    pub fn operation_io(&self, operation: OperationId) -> Option<&OperationIo> {
        self.operations.get(&operation)
    }

    pub fn resource_io(&self, resource: ResourceId) -> Option<&ResourceIo> {
        self.resources.get(&resource)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Layer the operations of a graph into passes.
///
/// Pass 0 holds every operation whose inputs no other operation writes. Pass `k + 1` holds
/// every remaining operation whose producers are all placed, at least one of them in pass `k`.
pub fn compute_passes(
    operations: &[Operation],
    connections: &ConnectionSet,
) -> Result<Vec<Pass>, GraphError> {
    let ids: Vec<OperationId> = (0..operations.len() as u32).map(OperationId).collect();
    let producers: Vec<Vec<OperationId>> = ids
        .iter()
        .map(|&op| connections.pointing_here(op))
        .collect();

    let mut assigned: Vec<Option<usize>> = vec![None; ids.len()];
    let mut layers: Vec<Vec<OperationId>> = Vec::new();

    let first: Vec<_> = ids
        .iter()
        .copied()
        .filter(|op| producers[op.index()].is_empty())
        .collect();
    if first.is_empty() {
        return Err(GraphError::BadGraphLayout(
            "no operation qualifies for the first pass".into(),
        ));
    }
    for op in &first {
        assigned[op.index()] = Some(0);
    }
    layers.push(first);

    loop {
        let current = layers.len() - 1;
        let next: Vec<_> = ids
            .iter()
            .copied()
            .filter(|op| assigned[op.index()].is_none())
            .filter(|op| {
                let deps = &producers[op.index()];
                deps.iter().all(|dep| assigned[dep.index()].is_some())
                    && deps.iter().any(|dep| assigned[dep.index()] == Some(current))
            })
            .collect();
        if next.is_empty() {
            break;
        }
        for op in &next {
            assigned[op.index()] = Some(current + 1);
        }
        layers.push(next);
    }

    let unassigned: Vec<String> = ids
        .iter()
        .filter(|op| assigned[op.index()].is_none())
        .map(|op| op.to_string())
        .collect();
    if !unassigned.is_empty() {
        return Err(GraphError::BadGraphLayout(format!(
            "operations can never be scheduled: {}",
            unassigned.join(", ")
        )));
    }

    let passes = layers
        .into_iter()
        .map(|layer| {
            let mut pass = Pass::new();
            for op in layer {
                pass.add_operation(op);
                for edge in connections.inputs_of(op) {
                    pass.add_input(op, edge.resource);
                }
                for edge in connections.outputs_of(op) {
                    pass.add_output(op, edge.resource);
                }
            }
            pass
        })
        .collect::<Vec<_>>();

    log::debug!(
        "Layered {} operations into {} passes",
        operations.len(),
        passes.len()
    );
    Ok(passes)
}
