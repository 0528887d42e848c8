//! Replaying recorded command lists into Vulkan command buffers

use ash::vk;

use super::{convert, unknown, VulkanDevice, VulkanState};
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};

fn recording(what: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |e| convert::vk_error(e, what, RenderError::ResourceCreationFailed)
}

/// Access mask that completes or waits on work in `layout`
fn layout_access(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            vk::AccessFlags::SHADER_READ
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        _ => vk::AccessFlags::empty(),
    }
}

impl VulkanDevice {
    /// Record, submit and wait for a one-off command buffer.
    ///
    /// Used for uploads and initial layout transitions. Blocks until the
    /// queue drains.
    pub(super) fn immediate(&self, state: &VulkanState, record: impl FnOnce(vk::CommandBuffer)) -> RenderResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(state.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cb = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(recording("allocate command buffer"))?
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::ResourceCreationFailed("no command buffer allocated".into()))?;

        let result = unsafe {
            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cb, &begin_info)
                .map_err(recording("begin command buffer"))
                .and_then(|()| {
                    record(cb);
                    self.device.end_command_buffer(cb).map_err(recording("end command buffer"))
                })
                .and_then(|()| {
                    let command_buffers = [cb];
                    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                    self.device
                        .queue_submit(state.queue, &[submit_info], vk::Fence::null())
                        .map_err(recording("queue submit"))
                })
                .and_then(|()| self.device.queue_wait_idle(state.queue).map_err(recording("queue wait")))
        };
        unsafe { self.device.free_command_buffers(state.command_pool, &[cb]) };
        result
    }

    /// Full-image layout transition with a conservative execution dependency.
    pub(super) fn transition(
        &self,
        cb: vk::CommandBuffer,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        layers: u32,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(layout_access(old_layout))
            .dst_access_mask(layout_access(new_layout))
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: layers,
            });
        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Reset `cb` and translate every command of `commands` into it.
    pub(super) fn record_commands(
        &self,
        state: &VulkanState,
        cb: vk::CommandBuffer,
        commands: &CommandList,
    ) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(recording("reset command buffer"))?;
            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cb, &begin_info)
                .map_err(recording("begin command buffer"))?;
        }

        for command in commands.commands() {
            self.record_command(state, cb, command)?;
        }

        unsafe { self.device.end_command_buffer(cb) }.map_err(recording("end command buffer"))
    }

    fn record_command(&self, state: &VulkanState, cb: vk::CommandBuffer, command: &Command) -> RenderResult<()> {
        let pipeline = |handle: PipelineHandle| {
            state
                .pipelines
                .get(&handle.0)
                .ok_or_else(|| unknown("pipeline", handle.0))
        };
        unsafe {
            match command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear_values,
                } => {
                    let render_pass = state
                        .render_passes
                        .get(&render_pass.0)
                        .copied()
                        .ok_or_else(|| unknown("render pass", render_pass.0))?;
                    let framebuffer = state
                        .framebuffers
                        .get(&framebuffer.0)
                        .copied()
                        .ok_or_else(|| unknown("framebuffer", framebuffer.0))?;
                    let clear_values: Vec<_> = clear_values.iter().map(|v| convert::clear_value(*v)).collect();
                    let begin_info = vk::RenderPassBeginInfo::default()
                        .render_pass(render_pass)
                        .framebuffer(framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent: vk::Extent2D {
                                width: extent.width,
                                height: extent.height,
                            },
                        })
                        .clear_values(&clear_values);
                    self.device
                        .cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
                }
                Command::NextSubpass => self.device.cmd_next_subpass(cb, vk::SubpassContents::INLINE),
                Command::EndRenderPass => self.device.cmd_end_render_pass(cb),
                Command::BindPipeline(handle) => {
                    let pipeline = pipeline(*handle)?;
                    self.device
                        .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
                }
                Command::BindDescriptorSet {
                    pipeline: handle,
                    index,
                    set,
                    dynamic_offsets,
                } => {
                    let layout = pipeline(*handle)?.layout;
                    let set = state
                        .descriptor_sets
                        .get(&set.0)
                        .map(|s| s.set)
                        .ok_or_else(|| unknown("descriptor set", set.0))?;
                    self.device.cmd_bind_descriptor_sets(
                        cb,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        *index,
                        &[set],
                        dynamic_offsets,
                    );
                }
                Command::BindVertexBuffer { buffer, offset, .. } => {
                    let buffer = state.buffer(*buffer)?.buffer;
                    self.device.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[*offset]);
                }
                Command::BindIndexBuffer { buffer, offset, .. } => {
                    let buffer = state.buffer(*buffer)?.buffer;
                    self.device
                        .cmd_bind_index_buffer(cb, buffer, *offset, vk::IndexType::UINT32);
                }
                Command::SetViewport(viewport) => {
                    // Negative height keeps +Y up in clip space.
                    let viewport = vk::Viewport {
                        x: viewport.x,
                        y: viewport.y + viewport.height,
                        width: viewport.width,
                        height: -viewport.height,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    self.device.cmd_set_viewport(cb, 0, &[viewport]);
                }
                Command::SetScissor(rect) => {
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D {
                            x: rect.x as i32,
                            y: rect.y as i32,
                        },
                        extent: vk::Extent2D {
                            width: rect.width,
                            height: rect.height,
                        },
                    };
                    self.device.cmd_set_scissor(cb, 0, &[scissor]);
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => self
                    .device
                    .cmd_draw(cb, *vertex_count, *instance_count, *first_vertex, *first_instance),
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => self.device.cmd_draw_indexed(
                    cb,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                ),
                Command::CopyTextureToBuffer {
                    texture,
                    x,
                    y,
                    buffer,
                    buffer_offset,
                } => {
                    let source = state.texture(*texture)?;
                    let destination = state.buffer(*buffer)?.buffer;
                    let region = vk::BufferImageCopy {
                        buffer_offset: *buffer_offset,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: convert::aspect(source.desc.format),
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                        image_offset: vk::Offset3D {
                            x: *x as i32,
                            y: *y as i32,
                            z: 0,
                        },
                        image_extent: vk::Extent3D {
                            width: 1,
                            height: 1,
                            depth: 1,
                        },
                    };
                    self.device.cmd_copy_image_to_buffer(
                        cb,
                        source.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        destination,
                        &[region],
                    );
                    // Make the copy visible to host reads after the fence.
                    let barrier = vk::MemoryBarrier::default()
                        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .dst_access_mask(vk::AccessFlags::HOST_READ);
                    self.device.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::HOST,
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_access_masks() {
        assert_eq!(
            layout_access(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            layout_access(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::AccessFlags::SHADER_READ
        );
        assert!(layout_access(vk::ImageLayout::UNDEFINED).is_empty());
    }
}
