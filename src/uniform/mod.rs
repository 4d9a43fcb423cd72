//! Host side uniform staging driven by shader reflection
//!
//! [`UniformReflection`] walks the render operations of a graph, creates a uniform block
//! resource for every reflected block and connects it at the block's binding. Values are
//! written into one contiguous staging buffer through [`UniformView`]s and copied into the
//! frame's mapped buffers by [`UniformReflection::flush`].

pub mod image_map;
pub mod view;

pub use image_map::{create_empty_image_resources, ImageCreateParams, ImageMap};
pub use view::UniformView;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::ops::Range;
use std::sync::Arc;

use crate::backend::*;
use crate::error::UniformError;
use crate::render_graph::{
    FrameBuffers, InputBinding, OperationId, RenderGraph, Resource, ResourceId,
    UniformBlockResource,
};
use crate::shader::UniformBlockLayout;

#[derive(Debug, Clone)]
struct BlockEntry {
    layout: UniformBlockLayout,
    resource: ResourceId,
    range: Range<usize>,
}

/// Reflected blocks of one shader stage
#[derive(Debug, Clone, Default)]
struct StageUniforms {
    blocks: Vec<BlockEntry>,
}

#[derive(Debug, Clone, Default)]
struct OperationUniforms {
    stages: BTreeMap<ShaderStage, StageUniforms>,
}

/// Staging range copied into a resource's buffer on flush
#[derive(Debug, Clone)]
struct StagingCopy {
    buffers: FrameBuffers,
    range: Range<usize>,
}

/// Staged uniform values of every render operation in a graph
pub struct UniformReflection {
    device: Arc<dyn GraphicsDevice>,
    staging: Vec<u8>,
    copies: Vec<StagingCopy>,
    operations: BTreeMap<OperationId, OperationUniforms>,
}

impl UniformReflection {
    /// Reflect every block, creating resources with the default creator.
    pub fn with_defaults(graph: &mut RenderGraph) -> Self {
        Self::new(
            graph,
            |_, _, _| false,
            |_, _, block| UniformBlockResource::new(block.size as u64).into(),
        )
    }

    /// Reflect the uniform blocks of every render operation in `graph`.
    ///
    /// `filter` returns true for blocks to leave alone. `creator` builds the resource backing
    /// a block and must return a uniform block at least as large as the reflected size.
    pub fn new(
        graph: &mut RenderGraph,
        mut filter: impl FnMut(OperationId, ShaderStage, &UniformBlockLayout) -> bool,
        mut creator: impl FnMut(OperationId, ShaderStage, &UniformBlockLayout) -> Resource,
    ) -> Self {
        let blocks: Vec<(OperationId, ShaderStage, UniformBlockLayout)> = graph
            .operations()
            .filter_map(|(id, op)| op.as_render().map(|render| (id, render)))
            .flat_map(|(id, render)| {
                render.pipeline.stages().iter().flat_map(move |shader| {
                    shader
                        .reflection
                        .blocks
                        .iter()
                        .map(move |block| (id, shader.stage, block.clone()))
                })
            })
            .collect();

        let mut reflection = Self {
            device: graph.device().clone(),
            staging: Vec::new(),
            copies: Vec::new(),
            operations: BTreeMap::new(),
        };
        let mut shared: HashMap<(OperationId, u32), (ResourceId, Range<usize>)> = HashMap::new();

        for (op, stage, layout) in blocks {
            if filter(op, stage, &layout) {
                log::debug!(
                    "Skipping uniform block {} of {} ({} stage)",
                    layout.name,
                    graph.operation_label(op),
                    stage
                );
                continue;
            }
            if layout.group != 0 {
                log::warn!(
                    "Uniform block {} is in group {}, only group 0 is bound",
                    layout.name,
                    layout.group
                );
            }

            let (resource, range) = match shared.get(&(op, layout.binding)) {
                Some((resource, range)) => {
                    assert_eq!(
                        range.len(),
                        layout.size as usize,
                        "uniform block at binding {} has different sizes across stages",
                        layout.binding
                    );
                    graph.merge_input_stages(op, layout.binding, stage.flag());
                    (*resource, range.clone())
                }
                None => {
                    let resource = creator(op, stage, &layout);
                    let buffers = match &resource {
                        Resource::UniformBlock(block) => {
                            assert!(
                                block.size >= layout.size as u64,
                                "uniform block resource for {} is smaller than the reflected block",
                                layout.name
                            );
                            block.buffers().clone()
                        }
                        other => panic!(
                            "uniform resource creator returned a {} resource",
                            other.kind_name()
                        ),
                    };
                    let resource = match resource {
                        Resource::UniformBlock(block) if block.name.is_none() => block
                            .named(format!(
                                "{}/{}/{}",
                                graph.operation_label(op),
                                stage,
                                layout.name
                            ))
                            .into(),
                        other => other,
                    };
                    let id = graph.add_resource(resource);
                    graph.create_input_connection(
                        op,
                        id,
                        InputBinding::uniform(layout.binding, stage.flag()),
                    );

                    let start = reflection.staging.len();
                    let range = start..start + layout.size as usize;
                    reflection.staging.resize(range.end, 0);
                    reflection.copies.push(StagingCopy {
                        buffers,
                        range: range.clone(),
                    });
                    shared.insert((op, layout.binding), (id, range.clone()));
                    (id, range)
                }
            };

            reflection
                .operations
                .entry(op)
                .or_default()
                .stages
                .entry(stage)
                .or_default()
                .blocks
                .push(BlockEntry {
                    layout,
                    resource,
                    range,
                });
        }

        log::debug!(
            "Reflected {} uniform blocks into {} staged bytes",
            reflection.copies.len(),
            reflection.staging.len()
        );
        reflection
    }

    /// Start an accessor chain at a render operation.
    pub fn get(&mut self, operation: OperationId) -> Result<OperationSelector<'_>, UniformError> {
        let uniforms = self
            .operations
            .get(&operation)
            .ok_or(UniformError::UnknownOperation(operation.0))?;
        Ok(OperationSelector {
            uniforms,
            staging: &mut self.staging,
        })
    }

    /// Resource backing a block, if the block was reflected.
    pub fn resource(&self, operation: OperationId, stage: ShaderStage, block: &str) -> Option<ResourceId> {
        self.operations
            .get(&operation)?
            .stages
            .get(&stage)?
            .blocks
            .iter()
            .find(|entry| entry.layout.matches(block))
            .map(|entry| entry.resource)
    }

    /// Copy the staging buffer into the buffers of `frame`.
    pub fn flush(&self, frame: u32) -> Result<(), UniformError> {
        for copy in &self.copies {
            let buffer = copy
                .buffers
                .get(frame)
                .ok_or(UniformError::MissingBuffer(frame))?;
            self.device
                .write_buffer(buffer, 0, &self.staging[copy.range.clone()])?;
        }
        Ok(())
    }

    pub fn staged_bytes(&self) -> usize {
        self.staging.len()
    }

    /// Number of distinct uniform resources created.
    pub fn resource_count(&self) -> usize {
        self.copies.len()
    }

    /// Every operation, stage and block with its staged bytes.
    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        for (op, uniforms) in &self.operations {
            let _ = writeln!(out, "{op}");
            for (stage, stage_uniforms) in &uniforms.stages {
                let _ = writeln!(out, "  {stage}");
                for entry in &stage_uniforms.blocks {
                    let _ = writeln!(
                        out,
                        "    {} (binding {}, {} bytes, {})",
                        entry.layout.name,
                        entry.layout.binding,
                        entry.layout.size,
                        entry.resource
                    );
                    let bytes = &self.staging[entry.range.clone()];
                    for chunk in bytes.chunks(16) {
                        let line: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                        let _ = writeln!(out, "      {}", line.join(" "));
                    }
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for UniformReflection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformReflection")
            .field("operations", &self.operations.len())
            .field("resources", &self.copies.len())
            .field("staged_bytes", &self.staging.len())
            .finish()
    }
}

/// Uniforms of one operation
#[derive(Debug)]
pub struct OperationSelector<'a> {
    uniforms: &'a OperationUniforms,
    staging: &'a mut [u8],
}

impl<'a> OperationSelector<'a> {
    pub fn stage(self, stage: ShaderStage) -> Result<StageSelector<'a>, UniformError> {
        let uniforms = self
            .uniforms
            .stages
            .get(&stage)
            .ok_or(UniformError::UnknownStage(stage))?;
        Ok(StageSelector {
            uniforms,
            staging: self.staging,
        })
    }
}

/// Uniform blocks of one shader stage
#[derive(Debug)]
pub struct StageSelector<'a> {
    uniforms: &'a StageUniforms,
    staging: &'a mut [u8],
}

impl<'a> StageSelector<'a> {
    /// Root view spanning the whole block, looked up by variable or type name.
    pub fn block(self, name: &str) -> Result<UniformView<'a>, UniformError> {
        let entry = self
            .uniforms
            .blocks
            .iter()
            .find(|entry| entry.layout.matches(name))
            .ok_or_else(|| UniformError::UnknownBlock(name.to_string()))?;
        Ok(UniformView::block(
            &entry.layout.name,
            &mut self.staging[entry.range.clone()],
            &entry.layout.fields,
        ))
    }

    pub fn block_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.uniforms.blocks.iter().map(|entry| entry.layout.name.as_str())
    }
}
