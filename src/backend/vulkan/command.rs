//! Translation of recorded [`Command`] lists into Vulkan command buffers.

use ash::vk;

use crate::backend::command::{ColorTarget, Command, ImageBarrier};
use crate::backend::traits::BackendResult;
use crate::backend::types::{Extent2d, Extent3d};

use super::conversion::{
    convert_extent, convert_layout, convert_load_op, convert_store_op, dst_access_mask, dst_stage,
    src_access_mask, src_stage,
};
use super::Tables;

fn color_range(layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers.max(1),
    }
}

/// Encodes commands into an already begun command buffer
pub(super) struct Encoder<'a> {
    pub device: &'a ash::Device,
    pub tables: &'a Tables,
    pub cmd: vk::CommandBuffer,
}

impl Encoder<'_> {
    pub fn encode(&self, commands: &[Command]) -> BackendResult<()> {
        for command in commands {
            match command {
                Command::ImageBarriers(barriers) => self.image_barriers(barriers)?,
                Command::FullBarrier => self.full_barrier(),
                Command::BeginRendering { targets, extent } => {
                    self.begin_rendering(targets, *extent)?
                }
                Command::BindPipeline(pipeline) => {
                    let pipeline = self.tables.pipeline(*pipeline)?;
                    unsafe {
                        self.device.cmd_bind_pipeline(
                            self.cmd,
                            vk::PipelineBindPoint::GRAPHICS,
                            pipeline.pipeline,
                        )
                    };
                }
                Command::BindDescriptorSet { pipeline, set } => {
                    let layout = self.tables.pipeline(*pipeline)?.layout;
                    let set = self.tables.set(*set)?.set;
                    unsafe {
                        self.device.cmd_bind_descriptor_sets(
                            self.cmd,
                            vk::PipelineBindPoint::GRAPHICS,
                            layout,
                            0,
                            &[set],
                            &[],
                        )
                    };
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => unsafe {
                    self.device.cmd_draw(
                        self.cmd,
                        *vertex_count,
                        *instance_count,
                        *first_vertex,
                        *first_instance,
                    )
                },
                Command::BindVertexBuffers {
                    first_binding,
                    buffers,
                } => {
                    let buffers = buffers
                        .iter()
                        .map(|buffer| self.tables.buffer(*buffer))
                        .collect::<BackendResult<Vec<_>>>()?;
                    let offsets = vec![0; buffers.len()];
                    unsafe {
                        self.device
                            .cmd_bind_vertex_buffers(self.cmd, *first_binding, &buffers, &offsets)
                    };
                }
                Command::BindIndexBuffer(buffer) => {
                    let buffer = self.tables.buffer(*buffer)?;
                    unsafe {
                        self.device
                            .cmd_bind_index_buffer(self.cmd, buffer, 0, vk::IndexType::UINT16)
                    };
                }
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                } => unsafe {
                    self.device
                        .cmd_draw_indexed(self.cmd, *index_count, *instance_count, 0, 0, 0)
                },
                Command::EndRendering => unsafe { self.device.cmd_end_rendering(self.cmd) },
                Command::CopyImage {
                    src,
                    dst,
                    extent,
                    layers,
                } => self.copy_image(*src, *dst, *extent, *layers)?,
            }
        }
        Ok(())
    }

    fn image_barriers(&self, barriers: &[ImageBarrier]) -> BackendResult<()> {
        let mut src_stages = vk::PipelineStageFlags::empty();
        let mut dst_stages = vk::PipelineStageFlags::empty();
        let mut image_barriers = Vec::with_capacity(barriers.len());
        for barrier in barriers {
            let image = self.tables.image(barrier.image)?;
            src_stages |= src_stage(barrier.old_layout);
            dst_stages |= dst_stage(barrier.new_layout);
            image_barriers.push(
                vk::ImageMemoryBarrier::default()
                    .old_layout(convert_layout(barrier.old_layout))
                    .new_layout(convert_layout(barrier.new_layout))
                    .src_access_mask(src_access_mask(barrier.old_layout))
                    .dst_access_mask(dst_access_mask(barrier.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.image)
                    .subresource_range(color_range(barrier.layers)),
            );
        }
        if image_barriers.is_empty() {
            return Ok(());
        }
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &image_barriers,
            )
        };
        Ok(())
    }

    fn full_barrier(&self) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            )
        };
    }

    fn begin_rendering(&self, targets: &[ColorTarget], extent: Extent2d) -> BackendResult<()> {
        let attachments = targets
            .iter()
            .map(|target| {
                let image = self.tables.image(target.image)?;
                let (load_op, clear_value) = convert_load_op(target.load_op);
                Ok(vk::RenderingAttachmentInfo::default()
                    .image_view(image.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(load_op)
                    .store_op(convert_store_op(target.store_op))
                    .clear_value(clear_value))
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(area)
            .layer_count(1)
            .color_attachments(&attachments);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device.cmd_begin_rendering(self.cmd, &rendering_info);
            self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(self.cmd, 0, &[area]);
        }
        Ok(())
    }

    fn copy_image(
        &self,
        src: crate::backend::ImageHandle,
        dst: crate::backend::ImageHandle,
        extent: Extent3d,
        layers: u32,
    ) -> BackendResult<()> {
        let src = self.tables.image(src)?.image;
        let dst = self.tables.image(dst)?.image;
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: layers.max(1),
        };
        let region = vk::ImageCopy::default()
            .src_subresource(subresource)
            .dst_subresource(subresource)
            .extent(convert_extent(extent));
        unsafe {
            self.device.cmd_copy_image(
                self.cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
        Ok(())
    }
}

/// Transition every layer of `image` with a single barrier.
pub(super) fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    layers: u32,
    old: crate::backend::ImageLayout,
    new: crate::backend::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(convert_layout(old))
        .new_layout(convert_layout(new))
        .src_access_mask(src_access_mask(old))
        .dst_access_mask(dst_access_mask(new))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range(layers));
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage(old),
            dst_stage(new),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        )
    };
}
