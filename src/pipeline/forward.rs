//! Forward lighting subpass
//!
//! Draws what the G-buffer cannot hold over the lit HDR image: alpha-blended
//! meshes, shaded with the same lights and shadow maps as the deferred path,
//! and camera-facing particles. Depth is tested against the opaque scene but
//! never written.

use super::lighting::create_shadow_set;
use super::shaders::ShaderProgram;
use super::{bind_scene_sets, draw_batches, PipelineState};
use crate::backend::{
    BlendState, Command, CompareFunction, CullMode, DepthState, DescriptorSetHandle, GpuDevice, Owned,
    PipelineHandle,
};
use crate::error::RenderResult;
use crate::render_graph::{GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

const READ_ONLY_DEPTH: DepthState = DepthState {
    write: false,
    compare: CompareFunction::Less,
    bias: None,
};

pub struct ForwardLightingPass<D: GpuDevice> {
    shadow_set: Owned<D, DescriptorSetHandle>,
    transparent: Owned<D, PipelineHandle>,
    particles: Owned<D, PipelineHandle>,
}

impl<D: GpuDevice> ForwardLightingPass<D> {
    fn draw_transparent(&self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let packet = inputs.packet;
        let pipeline = self.transparent.handle();
        ctx.record(Command::BindPipeline(pipeline));
        bind_scene_sets(ctx, pipeline, packet, packet.main_camera);
        ctx.record(Command::BindDescriptorSet {
            pipeline,
            index: 3,
            set: self.shadow_set.handle(),
            dynamic_offsets: Vec::new(),
        });
        draw_batches(ctx, inputs.cache, pipeline, &packet.transparent, true)
    }

    fn draw_particles(&self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let packet = inputs.packet;
        let pipeline = self.particles.handle();
        let frame_set = ctx.frame_set();
        let particle_set = ctx.particle_set();
        ctx.record(Command::BindPipeline(pipeline));
        ctx.record(Command::BindDescriptorSet {
            pipeline,
            index: 0,
            set: frame_set,
            dynamic_offsets: packet.frame_offsets(packet.main_camera),
        });
        ctx.record(Command::BindDescriptorSet {
            pipeline,
            index: 1,
            set: particle_set,
            dynamic_offsets: vec![packet.particles],
        });
        // Two triangles per particle, one instance each
        ctx.draw(Command::Draw {
            vertex_count: 6,
            instance_count: packet.particle_count,
            first_vertex: 0,
            first_instance: 0,
        })
    }
}

impl<D: GpuDevice> RenderPass<D> for ForwardLightingPass<D> {
    const NAME: &'static str = "Forward Lighting";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let layouts = ctx.layouts();
        let transparent = PipelineState::mesh(
            ShaderProgram::ForwardLighting,
            vec![
                layouts.frame.handle(),
                layouts.instance.handle(),
                layouts.material.handle(),
                layouts.shadow.handle(),
            ],
        )
        .with_blend(BlendState::alpha_blending())
        .with_depth(READ_ONLY_DEPTH)
        .for_subpass(ctx, targets, SubpassId::ForwardLighting)?;

        let particles = PipelineState::fullscreen(
            ShaderProgram::Particles,
            vec![layouts.frame.handle(), layouts.particle.handle()],
        )
        .with_blend(BlendState::premultiplied_alpha())
        .with_depth(READ_ONLY_DEPTH)
        .with_cull_mode(CullMode::None)
        .for_subpass(ctx, targets, SubpassId::ForwardLighting)?;

        Ok(Self {
            shadow_set: create_shadow_set(ctx, targets)?,
            transparent,
            particles,
        })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        if !inputs.packet.transparent.is_empty() {
            self.draw_transparent(ctx, inputs)?;
        }
        if inputs.packet.particle_count > 0 {
            self.draw_particles(ctx, inputs)?;
        }
        Ok(())
    }
}
