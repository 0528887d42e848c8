//! UI subpass
//!
//! Draws egui's tessellated meshes into the UI layer, which the combine stage
//! composites over the scene. Vertices and indices are streamed through the
//! frame's ring region; font and image textures are owned here and updated
//! from egui's texture deltas.

use std::collections::HashMap;

use egui::epaint::{ClippedPrimitive, ImageDelta, Primitive};
use egui::{TextureId, TexturesDelta};
use glam::Vec4;

use super::shaders::ShaderProgram;
use super::uniforms::UiUniform;
use super::PipelineState;
use crate::backend::{
    BlendState, Command, CullMode, DescriptorResource, DescriptorSetHandle, DescriptorWrite, Extent2d, GpuDevice, Owned,
    OwnedExt, PipelineHandle, ScissorRect, TextureDescriptor, TextureFormat, TextureHandle, TextureRegion,
    TextureUsage, UiVertex, VertexLayout,
};
use crate::error::{RenderError, RenderResult};
use crate::render_graph::{ring_binding, GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

/// UI output of one frame
#[derive(Debug, Clone)]
pub struct UiFrame {
    pub primitives: Vec<ClippedPrimitive>,
    pub textures_delta: TexturesDelta,
    pub pixels_per_point: f32,
}

impl Default for UiFrame {
    fn default() -> Self {
        Self {
            primitives: Vec::new(),
            textures_delta: TexturesDelta::default(),
            pixels_per_point: 1.0,
        }
    }
}

impl UiFrame {
    pub fn new(primitives: Vec<ClippedPrimitive>, textures_delta: TexturesDelta, pixels_per_point: f32) -> Self {
        Self {
            primitives,
            textures_delta,
            pixels_per_point,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty() && self.textures_delta.is_empty()
    }
}

fn delta_pixels(delta: &ImageDelta) -> Vec<u8> {
    match &delta.image {
        egui::ImageData::Color(image) => image.pixels.iter().flat_map(|c| c.to_array()).collect(),
        egui::ImageData::Font(font) => font.srgba_pixels(None).flat_map(|c| c.to_array()).collect(),
    }
}

/// Convert a clip rectangle in points to pixels, clamped to `extent`.
fn scissor_for(clip: egui::Rect, pixels_per_point: f32, extent: Extent2d) -> Option<ScissorRect> {
    let min_x = (clip.min.x * pixels_per_point).round().max(0.0) as u32;
    let min_y = (clip.min.y * pixels_per_point).round().max(0.0) as u32;
    let max_x = ((clip.max.x * pixels_per_point).round().max(0.0) as u32).min(extent.width);
    let max_y = ((clip.max.y * pixels_per_point).round().max(0.0) as u32).min(extent.height);
    (max_x > min_x && max_y > min_y).then(|| ScissorRect {
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
    })
}

struct UiTexture<D: GpuDevice> {
    set: Owned<D, DescriptorSetHandle>,
    texture: Owned<D, TextureHandle>,
    width: u32,
    height: u32,
}

pub struct UiPass<D: GpuDevice> {
    textures: HashMap<TextureId, UiTexture<D>>,
    /// Replaced or freed textures, kept until the frame that last used them
    /// completes
    retired: Vec<(u64, UiTexture<D>)>,
    uniform_set: Owned<D, DescriptorSetHandle>,
    pipeline: Owned<D, PipelineHandle>,
}

impl<D: GpuDevice> UiPass<D> {
    /// Number of resident egui textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn create_texture(&self, ctx: &RenderContext<D>, id: TextureId, delta: &ImageDelta) -> RenderResult<UiTexture<D>> {
        let [width, height] = delta.image.size();
        let device = ctx.device();
        let texture = device.owned_texture(&TextureDescriptor {
            label: format!("egui texture {:?}", id),
            width: width as u32,
            height: height as u32,
            layers: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        })?;
        device.write_texture(
            texture.handle(),
            TextureRegion::full(width as u32, height as u32),
            &delta_pixels(delta),
        )?;
        let set = device.owned_descriptor_set(
            ctx.layouts().ui_texture.handle(),
            &[
                DescriptorWrite {
                    binding: 0,
                    resource: DescriptorResource::Texture(texture.handle()),
                },
                DescriptorWrite {
                    binding: 1,
                    resource: DescriptorResource::Sampler(ctx.samplers().ui.handle()),
                },
            ],
        )?;
        Ok(UiTexture {
            set,
            texture,
            width: width as u32,
            height: height as u32,
        })
    }

    fn apply_deltas(&mut self, ctx: &RenderContext<D>, delta: &TexturesDelta) -> RenderResult<()> {
        let frame = ctx.frame_index();
        for (id, image) in &delta.set {
            match (image.pos, self.textures.get(id)) {
                (Some([x, y]), Some(resident)) => {
                    let [width, height] = image.image.size();
                    let region = TextureRegion {
                        x: x as u32,
                        y: y as u32,
                        width: width as u32,
                        height: height as u32,
                        layer: 0,
                    };
                    if region.x + region.width > resident.width || region.y + region.height > resident.height {
                        return Err(RenderError::ResourceCreationFailed(format!(
                            "egui update of {:?} exceeds the texture",
                            id
                        )));
                    }
                    ctx.device()
                        .write_texture(resident.texture.handle(), region, &delta_pixels(image))?;
                }
                (Some(_), None) => {
                    log::warn!("Partial update for unknown egui texture {:?}", id);
                }
                (None, _) => {
                    let texture = self.create_texture(ctx, *id, image)?;
                    if let Some(previous) = self.textures.insert(*id, texture) {
                        self.retired.push((frame, previous));
                    }
                }
            }
        }
        Ok(())
    }

    fn free_textures(&mut self, ctx: &RenderContext<D>, delta: &TexturesDelta) {
        let frame = ctx.frame_index();
        for id in &delta.free {
            if let Some(texture) = self.textures.remove(id) {
                self.retired.push((frame, texture));
            }
        }
        if let Some(completed) = ctx.completed_frame() {
            self.retired.retain(|(used, _)| *used > completed);
        }
    }
}

impl<D: GpuDevice> RenderPass<D> for UiPass<D> {
    const NAME: &'static str = "UI";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let layouts = ctx.layouts();
        let pipeline = PipelineState {
            program: ShaderProgram::Ui,
            vertex_layout: VertexLayout::Ui,
            set_layouts: vec![layouts.ui_uniform.handle(), layouts.ui_texture.handle()],
            blend: Some(BlendState::premultiplied_alpha()),
            depth: None,
            cull_mode: CullMode::None,
        }
        .for_subpass(ctx, targets, SubpassId::Ui)?;
        let uniform_set = ctx.device().owned_descriptor_set(
            layouts.ui_uniform.handle(),
            &[ring_binding(
                ctx.allocator().buffer(),
                0,
                std::mem::size_of::<UiUniform>() as u64,
            )],
        )?;
        Ok(Self {
            textures: HashMap::new(),
            retired: Vec::new(),
            uniform_set,
            pipeline,
        })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let ui = inputs.ui;
        self.apply_deltas(ctx, &ui.textures_delta)?;

        let extent = ctx.extent();
        let pixels_per_point = if ui.pixels_per_point > 0.0 { ui.pixels_per_point } else { 1.0 };
        let meshes: Vec<_> = ui
            .primitives
            .iter()
            .filter_map(|clipped| match &clipped.primitive {
                Primitive::Mesh(mesh) if !mesh.indices.is_empty() && !mesh.vertices.is_empty() => {
                    Some((clipped.clip_rect, mesh))
                }
                Primitive::Mesh(_) => None,
                Primitive::Callback(_) => {
                    log::warn!("egui paint callbacks are not supported");
                    None
                }
            })
            .collect();

        if !meshes.is_empty() {
            let pipeline = self.pipeline.handle();
            let screen = UiUniform {
                screen_size: Vec4::new(
                    extent.width as f32 / pixels_per_point,
                    extent.height as f32 / pixels_per_point,
                    0.0,
                    0.0,
                ),
            };
            let screen_offset = ctx.push_uniform(&screen)?;
            ctx.record(Command::BindPipeline(pipeline));
            ctx.record(Command::BindDescriptorSet {
                pipeline,
                index: 0,
                set: self.uniform_set.handle(),
                dynamic_offsets: vec![screen_offset],
            });

            let ring = ctx.allocator().buffer();
            for (clip, mesh) in meshes {
                let Some(scissor) = scissor_for(clip, pixels_per_point, extent) else {
                    continue;
                };
                let Some(texture) = self.textures.get(&mesh.texture_id) else {
                    log::warn!("Missing egui texture {:?}", mesh.texture_id);
                    continue;
                };

                let vertices: Vec<UiVertex> = mesh
                    .vertices
                    .iter()
                    .map(|v| UiVertex {
                        position: [v.pos.x, v.pos.y],
                        uv: [v.uv.x, v.uv.y],
                        color: v.color.to_array(),
                    })
                    .collect();
                let vertex_alloc = ctx.allocator_mut().push_slice(&vertices, 4)?;
                let index_alloc = ctx.allocator_mut().push_slice(&mesh.indices, 4)?;

                ctx.record(Command::SetScissor(scissor));
                ctx.record(Command::BindDescriptorSet {
                    pipeline,
                    index: 1,
                    set: texture.set.handle(),
                    dynamic_offsets: Vec::new(),
                });
                ctx.record(Command::BindVertexBuffer {
                    buffer: ring,
                    offset: vertex_alloc.offset,
                    size: vertex_alloc.size,
                });
                ctx.record(Command::BindIndexBuffer {
                    buffer: ring,
                    offset: index_alloc.offset,
                    size: index_alloc.size,
                });
                ctx.draw(Command::DrawIndexed {
                    index_count: mesh.indices.len() as u32,
                    instance_count: 1,
                    first_index: 0,
                    vertex_offset: 0,
                    first_instance: 0,
                })?;
            }
            ctx.record(Command::SetScissor(ScissorRect::full(extent)));
        }

        self.free_textures(ctx, &ui.textures_delta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{pos2, Rect};

    #[test]
    fn test_scissor_scales_and_clamps() {
        let extent = Extent2d::new(200, 100);
        let clip = Rect::from_min_max(pos2(10.0, 5.0), pos2(500.0, 40.0));
        let scissor = scissor_for(clip, 2.0, extent).unwrap();
        assert_eq!(
            scissor,
            ScissorRect {
                x: 20,
                y: 10,
                width: 180,
                height: 70
            }
        );
    }

    #[test]
    fn test_empty_scissor_is_skipped() {
        let extent = Extent2d::new(200, 100);
        let clip = Rect::from_min_max(pos2(300.0, 5.0), pos2(400.0, 40.0));
        assert!(scissor_for(clip, 1.0, extent).is_none());
    }
}
