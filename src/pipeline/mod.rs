//! Deferred rendering pipeline
//!
//! One pass per stage of the frame:
//! 1. Shadow depth - sun map and point light cube faces, in their own passes
//! 2. G-Buffer - opaque geometry into albedo, normal and material targets
//! 3. Deferred lighting - full-screen shading from the G-buffer
//! 4. Forward lighting - transparent meshes and particles over the lit image
//! 5. Post-processing - tone mapping, color grading, pixelation
//! 6. UI - egui meshes into their own layer, then combined into the swapchain
//!
//! Picking renders instance ids off-screen on request.

pub mod forward;
pub mod gbuffer;
pub mod layouts;
pub mod lighting;
pub mod pick;
pub mod postprocess;
pub mod shaders;
pub mod shadow;
pub mod ui;
pub mod uniforms;

pub use forward::ForwardLightingPass;
pub use gbuffer::GBufferPass;
pub use lighting::DeferredLightingPass;
pub use pick::PickPass;
pub use postprocess::{
    ColorGradingPass, ColorGradingSettings, CombineUiPass, PixelationPass, PixelationSettings, ToneMapSettings,
    ToneMappingPass, TonemapOperator,
};
pub use shadow::{PointShadowPass, SunShadowPass};
pub use ui::{UiFrame, UiPass};

use crate::backend::{
    BlendState, Command, CullMode, DepthState, DescriptorSetLayoutHandle, GpuDevice, Owned, OwnedExt,
    PipelineDescriptor, PipelineHandle, RenderPassHandle, Vertex, VertexLayout,
};
use crate::culling::DrawBatch;
use crate::error::{RenderError, RenderResult};
use crate::render_graph::{FramePacket, GraphTargets, RenderContext, SubpassId};
use crate::resources::GpuResourceCache;
use shaders::ShaderProgram;

/// Fixed-function state of one pipeline, completed with the render pass it
/// runs in.
#[derive(Debug, Clone)]
pub(crate) struct PipelineState {
    pub program: ShaderProgram,
    pub vertex_layout: VertexLayout,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub blend: Option<BlendState>,
    pub depth: Option<DepthState>,
    pub cull_mode: CullMode,
}

impl PipelineState {
    /// Full-screen triangle, no depth, no blending
    pub fn fullscreen(program: ShaderProgram, set_layouts: Vec<DescriptorSetLayoutHandle>) -> Self {
        Self {
            program,
            vertex_layout: VertexLayout::None,
            set_layouts,
            blend: None,
            depth: None,
            cull_mode: CullMode::None,
        }
    }

    /// Instanced meshes
    pub fn mesh(program: ShaderProgram, set_layouts: Vec<DescriptorSetLayoutHandle>) -> Self {
        Self {
            program,
            vertex_layout: VertexLayout::Mesh,
            set_layouts,
            blend: None,
            depth: None,
            cull_mode: CullMode::Back,
        }
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Pipeline for one subpass of the main render pass
    pub fn for_subpass<D: GpuDevice>(
        self,
        ctx: &RenderContext<D>,
        targets: &GraphTargets<D>,
        subpass: SubpassId,
    ) -> RenderResult<Owned<D, PipelineHandle>> {
        let colors = targets.layout.color_count(subpass);
        self.create(ctx, targets.passes.main.handle(), subpass.index(), colors)
    }

    /// Pipeline for a single-subpass render pass
    pub fn create<D: GpuDevice>(
        self,
        ctx: &RenderContext<D>,
        render_pass: RenderPassHandle,
        subpass: u32,
        color_count: usize,
    ) -> RenderResult<Owned<D, PipelineHandle>> {
        let desc = PipelineDescriptor {
            label: format!("{} pipeline", self.program.label()),
            program: self.program,
            vertex_layout: self.vertex_layout,
            set_layouts: self.set_layouts,
            render_pass,
            subpass,
            color_targets: vec![self.blend; color_count],
            depth: self.depth,
            cull_mode: self.cull_mode,
        };
        log::debug!("Creating {}", desc.label);
        ctx.device().owned_pipeline(&desc)
    }
}

/// Bind group 0 (frame) and group 1 (instances) for a view using `camera`.
pub(crate) fn bind_scene_sets<D: GpuDevice>(
    ctx: &mut RenderContext<D>,
    pipeline: PipelineHandle,
    packet: &FramePacket,
    camera: u32,
) {
    let frame_set = ctx.frame_set();
    let instance_set = ctx.instance_set();
    ctx.record(Command::BindDescriptorSet {
        pipeline,
        index: 0,
        set: frame_set,
        dynamic_offsets: packet.frame_offsets(camera),
    });
    ctx.record(Command::BindDescriptorSet {
        pipeline,
        index: 1,
        set: instance_set,
        dynamic_offsets: packet.instance_offsets(),
    });
}

/// Issue one instanced draw per batch.
///
/// With `bind_materials` the material set is bound at group 2 whenever the
/// material changes; batches arrive sorted by material so each is bound once.
pub(crate) fn draw_batches<'a, D: GpuDevice>(
    ctx: &mut RenderContext<D>,
    cache: &GpuResourceCache<D>,
    pipeline: PipelineHandle,
    batches: impl IntoIterator<Item = &'a DrawBatch>,
    bind_materials: bool,
) -> RenderResult<()> {
    let mut bound_material = None;
    let mut bound_mesh = None;
    for batch in batches {
        if bind_materials && bound_material != Some(batch.material) {
            let material = cache
                .material(batch.material)
                .ok_or_else(|| RenderError::InvalidHandle(format!("material {:?} is not resident", batch.material)))?;
            ctx.record(Command::BindDescriptorSet {
                pipeline,
                index: 2,
                set: material.set.handle(),
                dynamic_offsets: Vec::new(),
            });
            bound_material = Some(batch.material);
        }

        let mesh = cache
            .mesh(batch.mesh)
            .ok_or_else(|| RenderError::InvalidHandle(format!("mesh {:?} is not resident", batch.mesh)))?;
        if bound_mesh != Some(batch.mesh) {
            ctx.record(Command::BindVertexBuffer {
                buffer: mesh.vertex_buffer.handle(),
                offset: 0,
                size: mesh.vertex_count as u64 * std::mem::size_of::<Vertex>() as u64,
            });
            ctx.record(Command::BindIndexBuffer {
                buffer: mesh.index_buffer.handle(),
                offset: 0,
                size: mesh.index_count as u64 * 4,
            });
            bound_mesh = Some(batch.mesh);
        }

        ctx.draw(Command::DrawIndexed {
            index_count: mesh.index_count,
            instance_count: batch.instance_count,
            first_index: 0,
            vertex_offset: 0,
            first_instance: batch.first_instance,
        })?;
    }
    Ok(())
}

/// Full-screen triangle generated from the vertex index
pub(crate) fn draw_fullscreen<D: GpuDevice>(ctx: &mut RenderContext<D>) -> RenderResult<()> {
    ctx.draw(Command::Draw {
        vertex_count: 3,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    })
}
