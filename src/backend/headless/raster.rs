//! Command replay for the headless device
//!
//! Clears are applied lazily, texture-to-buffer copies are performed, and
//! draws through the id-buffer pipeline are rasterized on the CPU so picking
//! can be tested end to end. Everything else only moves binding state.

use bytemuck::Pod;
use glam::{Vec3, Vec4};

use super::HeadlessState;
use crate::backend::types::*;
use crate::pipeline::shaders::ShaderProgram;

#[derive(Default)]
struct ReplayState {
    pass: Option<(RenderPassHandle, FramebufferHandle, u32)>,
    pipeline: Option<PipelineHandle>,
    sets: [Option<(DescriptorSetHandle, Vec<u32>)>; 4],
    vertex: Option<(BufferHandle, u64)>,
    index: Option<(BufferHandle, u64)>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
}

#[derive(Clone, Copy)]
struct IndexedDraw {
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    vertex_offset: i32,
    first_instance: u32,
}

/// Edge function; positive when `p` lies left of `a -> b`
fn edge(a: Vec3, b: Vec3, p: (f32, f32)) -> f32 {
    (b.x - a.x) * (p.1 - a.y) - (b.y - a.y) * (p.0 - a.x)
}

impl HeadlessState {
    pub(super) fn execute(&mut self, commands: &CommandList) -> Result<(), String> {
        let mut replay = ReplayState::default();
        for command in commands.commands() {
            match command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    clear_values,
                    ..
                } => {
                    self.begin_pass(*render_pass, *framebuffer, clear_values)?;
                    replay.pass = Some((*render_pass, *framebuffer, 0));
                }
                Command::NextSubpass => {
                    if let Some(pass) = replay.pass.as_mut() {
                        pass.2 += 1;
                    }
                }
                Command::EndRenderPass => replay.pass = None,
                Command::BindPipeline(pipeline) => replay.pipeline = Some(*pipeline),
                Command::BindDescriptorSet {
                    index,
                    set,
                    dynamic_offsets,
                    ..
                } => {
                    if let Some(slot) = replay.sets.get_mut(*index as usize) {
                        *slot = Some((*set, dynamic_offsets.clone()));
                    }
                }
                Command::BindVertexBuffer { buffer, offset, .. } => {
                    replay.vertex = Some((*buffer, *offset));
                }
                Command::BindIndexBuffer { buffer, offset, .. } => {
                    replay.index = Some((*buffer, *offset));
                }
                Command::SetViewport(viewport) => replay.viewport = Some(*viewport),
                Command::SetScissor(scissor) => replay.scissor = Some(*scissor),
                Command::Draw { .. } => {}
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => {
                    let writes_ids = replay
                        .pipeline
                        .and_then(|p| self.pipelines.get(&p))
                        .is_some_and(|desc| desc.program == ShaderProgram::PickId);
                    if writes_ids {
                        self.rasterize_ids(
                            &replay,
                            IndexedDraw {
                                index_count: *index_count,
                                instance_count: *instance_count,
                                first_index: *first_index,
                                vertex_offset: *vertex_offset,
                                first_instance: *first_instance,
                            },
                        )?;
                    }
                }
                Command::CopyTextureToBuffer {
                    texture,
                    x,
                    y,
                    buffer,
                    buffer_offset,
                } => self.copy_texel(*texture, *x, *y, *buffer, *buffer_offset)?,
            }
        }
        Ok(())
    }

    fn begin_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        clear_values: &[ClearValue],
    ) -> Result<(), String> {
        let pass = self
            .render_passes
            .get(&render_pass)
            .ok_or("render pass destroyed before execution")?
            .clone();
        let views = self
            .framebuffers
            .get(&framebuffer)
            .ok_or("framebuffer destroyed before execution")?
            .attachments
            .clone();

        for (i, attachment) in pass.attachments.iter().enumerate() {
            if attachment.load_op != LoadOp::Clear {
                continue;
            }
            let (Some(view), Some(value)) = (views.get(i), clear_values.get(i)) else {
                continue;
            };
            let Some(texture) = self.textures.get_mut(&view.texture) else {
                continue;
            };
            match view.layer {
                Some(layer) => texture.clear_layer(layer as usize, *value),
                None => {
                    for layer in 0..texture.layers.len() {
                        texture.clear_layer(layer, *value);
                    }
                }
            }
        }
        Ok(())
    }

    fn read_pod<T: Pod>(&self, buffer: BufferHandle, offset: u64) -> Result<T, String> {
        let source = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| format!("buffer {:?} destroyed before execution", buffer))?;
        let start = offset as usize;
        let end = start + std::mem::size_of::<T>();
        let bytes = source
            .data
            .get(start..end)
            .ok_or_else(|| format!("read {}..{} past the end of '{}'", start, end, source.desc.label))?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Buffer and start offset bound at `binding` of descriptor set `index`
    fn bound_buffer(&self, replay: &ReplayState, index: usize, binding: u32) -> Result<(BufferHandle, u64), String> {
        let (set, offsets) = replay
            .sets
            .get(index)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| format!("descriptor set {} not bound", index))?;
        self.bound_ranges(*set, offsets)
            .into_iter()
            .find(|(b, _)| *b == binding)
            .map(|(_, r)| (r.buffer, r.range.start))
            .ok_or_else(|| format!("set {} binding {} is not a buffer", index, binding))
    }

    fn rasterize_ids(&mut self, replay: &ReplayState, draw: IndexedDraw) -> Result<(), String> {
        let (render_pass, framebuffer, subpass) = replay.pass.ok_or("draw outside a render pass")?;
        let subpass_desc = self
            .render_passes
            .get(&render_pass)
            .and_then(|p| p.subpasses.get(subpass as usize))
            .cloned()
            .ok_or("missing subpass")?;
        let fb = self
            .framebuffers
            .get(&framebuffer)
            .cloned()
            .ok_or("missing framebuffer")?;
        let color_view = subpass_desc
            .colors
            .first()
            .and_then(|c| fb.attachments.get(c.attachment as usize))
            .copied()
            .ok_or("id pass has no color attachment")?;
        let depth_view = subpass_desc
            .depth
            .and_then(|d| fb.attachments.get(d.attachment as usize))
            .copied();

        let (camera_buffer, camera_offset) = self.bound_buffer(replay, 0, 0)?;
        let camera: CameraUniform = self.read_pod(camera_buffer, camera_offset)?;
        let (instance_buffer, instance_offset) = self.bound_buffer(replay, 1, 0)?;
        let (vertex_buffer, vertex_base) = replay.vertex.ok_or("no vertex buffer bound")?;
        let (index_buffer, index_base) = replay.index.ok_or("no index buffer bound")?;

        let viewport = replay.viewport.unwrap_or(Viewport::full(fb.extent));
        let scissor = replay.scissor.unwrap_or(ScissorRect::full(fb.extent));
        let stride = VertexLayout::Mesh.stride() as u64;
        let instance_size = std::mem::size_of::<InstanceData>() as u64;

        let mut triangles = Vec::new();
        for instance in draw.first_instance..draw.first_instance + draw.instance_count {
            let data: InstanceData =
                self.read_pod(instance_buffer, instance_offset + instance as u64 * instance_size)?;
            let mvp = camera.view_proj * data.model;
            'triangle: for triangle in 0..draw.index_count / 3 {
                let mut screen = [Vec3::ZERO; 3];
                for (corner, point) in screen.iter_mut().enumerate() {
                    let slot = draw.first_index + triangle * 3 + corner as u32;
                    let index: u32 = self.read_pod(index_buffer, index_base + slot as u64 * 4)?;
                    let vertex = (index as i64 + draw.vertex_offset as i64).max(0) as u64;
                    let position: [f32; 3] = self.read_pod(vertex_buffer, vertex_base + vertex * stride)?;
                    let clip = mvp * Vec4::new(position[0], position[1], position[2], 1.0);
                    // No near-plane clipping: triangles crossing w = 0 are dropped.
                    if clip.w <= f32::EPSILON {
                        continue 'triangle;
                    }
                    let ndc = clip.truncate() / clip.w;
                    *point = Vec3::new(
                        viewport.x + (ndc.x * 0.5 + 0.5) * viewport.width,
                        viewport.y + (0.5 - ndc.y * 0.5) * viewport.height,
                        ndc.z,
                    );
                }
                triangles.push((screen, data.instance_id));
            }
        }

        let mut depth: Option<Vec<f32>> = match depth_view {
            Some(view) => {
                let texture = self.textures.get_mut(&view.texture).ok_or("missing depth target")?;
                let layer = texture.layer_mut(view.layer.unwrap_or(0) as usize);
                Some(
                    layer
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                )
            }
            None => None,
        };

        let target = self.textures.get_mut(&color_view.texture).ok_or("missing id target")?;
        let width = target.desc.width;
        let height = target.desc.height;
        let ids = target.layer_mut(color_view.layer.unwrap_or(0) as usize);

        let x_end = (scissor.x + scissor.width).min(width).min(fb.extent.width);
        let y_end = (scissor.y + scissor.height).min(height).min(fb.extent.height);

        for (tri, id) in triangles {
            let [a, b, c] = tri;
            let area = edge(a, b, (c.x, c.y));
            if area.abs() <= f32::EPSILON {
                continue;
            }
            let min_x = a.x.min(b.x).min(c.x).floor().max(scissor.x as f32) as u32;
            let min_y = a.y.min(b.y).min(c.y).floor().max(scissor.y as f32) as u32;
            let max_x = (a.x.max(b.x).max(c.x).ceil().max(0.0) as u32).min(x_end);
            let max_y = (a.y.max(b.y).max(c.y).ceil().max(0.0) as u32).min(y_end);

            for py in min_y..max_y {
                for px in min_x..max_x {
                    let p = (px as f32 + 0.5, py as f32 + 0.5);
                    let w0 = edge(b, c, p) / area;
                    let w1 = edge(c, a, p) / area;
                    let w2 = edge(a, b, p) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }
                    let z = w0 * a.z + w1 * b.z + w2 * c.z;
                    if !(0.0..=1.0).contains(&z) {
                        continue;
                    }
                    let texel = (py * width + px) as usize;
                    if let Some(depth) = depth.as_mut() {
                        if z >= depth[texel] {
                            continue;
                        }
                        depth[texel] = z;
                    }
                    ids[texel * 4..texel * 4 + 4].copy_from_slice(&id.to_le_bytes());
                }
            }
        }

        if let (Some(view), Some(depth)) = (depth_view, depth) {
            if let Some(texture) = self.textures.get_mut(&view.texture) {
                let layer = texture.layer_mut(view.layer.unwrap_or(0) as usize);
                for (chunk, value) in layer.chunks_exact_mut(4).zip(depth) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn copy_texel(
        &mut self,
        texture: TextureHandle,
        x: u32,
        y: u32,
        buffer: BufferHandle,
        buffer_offset: u64,
    ) -> Result<(), String> {
        let source = self.textures.get_mut(&texture).ok_or("copy from a destroyed texture")?;
        if x >= source.desc.width || y >= source.desc.height {
            return Err(format!("copy texel ({}, {}) outside '{}'", x, y, source.desc.label));
        }
        let bpp = source.desc.format.bytes_per_pixel() as usize;
        let start = (y * source.desc.width + x) as usize * bpp;
        let texel = source.layer_mut(0)[start..start + bpp].to_vec();

        let target = self.buffers.get_mut(&buffer).ok_or("copy into a destroyed buffer")?;
        let offset = buffer_offset as usize;
        let destination = target
            .data
            .get_mut(offset..offset + bpp)
            .ok_or("copy past the end of the readback buffer")?;
        destination.copy_from_slice(&texel);
        Ok(())
    }
}
