//! Backend independent command lists
//!
//! The render graph records every frame into a flat list of [`Command`]s once per compile.
//! Backends translate the list into their native command buffers.

use super::traits::{BufferHandle, DescriptorSetHandle, ImageHandle, PipelineHandle};
use super::types::{Extent2d, Extent3d, ImageLayout, LoadOp, StoreOp};

/// Layout transition for every layer of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub layers: u32,
}

/// Color attachment used by a rendering scope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTarget {
    pub image: ImageHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ImageBarriers(Vec<ImageBarrier>),
    /// All prior commands complete before any later command starts.
    FullBarrier,
    BeginRendering {
        targets: Vec<ColorTarget>,
        extent: Extent2d,
    },
    BindPipeline(PipelineHandle),
    BindDescriptorSet {
        pipeline: PipelineHandle,
        set: DescriptorSetHandle,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    /// Buffers bound from `first_binding` on, each at offset 0.
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<BufferHandle>,
    },
    /// 16-bit indices at offset 0.
    BindIndexBuffer(BufferHandle),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    EndRendering,
    CopyImage {
        src: ImageHandle,
        dst: ImageHandle,
        extent: Extent3d,
        layers: u32,
    },
}

impl Command {
    pub fn is_barrier(&self) -> bool {
        matches!(self, Command::ImageBarriers(_) | Command::FullBarrier)
    }
}

/// Append-only command list with barrier batching
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Emit a barrier batch, skipping no-op transitions.
    pub fn transition(&mut self, barriers: impl IntoIterator<Item = ImageBarrier>) {
        let barriers: Vec<_> = barriers
            .into_iter()
            .filter(|b| b.old_layout != b.new_layout)
            .collect();
        if !barriers.is_empty() {
            self.commands.push(Command::ImageBarriers(barriers));
        }
    }

    pub fn extend(&mut self, other: CommandList) {
        self.commands.extend(other.commands);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn as_slice(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_vec(self) -> Vec<Command> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_skips_noop_barriers() {
        let mut list = CommandList::new();
        list.transition([ImageBarrier {
            image: ImageHandle(1),
            old_layout: ImageLayout::General,
            new_layout: ImageLayout::General,
            layers: 1,
        }]);
        assert!(list.is_empty());

        list.transition([
            ImageBarrier {
                image: ImageHandle(1),
                old_layout: ImageLayout::General,
                new_layout: ImageLayout::ShaderReadOnly,
                layers: 1,
            },
            ImageBarrier {
                image: ImageHandle(2),
                old_layout: ImageLayout::TransferDst,
                new_layout: ImageLayout::TransferDst,
                layers: 1,
            },
        ]);
        assert_eq!(list.len(), 1);
        match &list.as_slice()[0] {
            Command::ImageBarriers(barriers) => {
                assert_eq!(barriers.len(), 1);
                assert_eq!(barriers[0].image, ImageHandle(1));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
