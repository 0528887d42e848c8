//! G-Buffer generation subpass
//!
//! Renders opaque geometry to multiple render targets:
//! - Albedo (base color, alpha = occlusion)
//! - Normals (world space, encoded)
//! - Material properties (metallic, roughness, emissive strength)
//! - Depth

use super::shaders::ShaderProgram;
use super::{bind_scene_sets, draw_batches, PipelineState};
use crate::backend::{Command, CompareFunction, DepthState, GpuDevice, Owned, PipelineHandle};
use crate::error::RenderResult;
use crate::render_graph::{GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

pub struct GBufferPass<D: GpuDevice> {
    pipeline: Owned<D, PipelineHandle>,
}

impl<D: GpuDevice> RenderPass<D> for GBufferPass<D> {
    const NAME: &'static str = "G-Buffer";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let layouts = ctx.layouts();
        let pipeline = PipelineState::mesh(
            ShaderProgram::GBuffer,
            vec![
                layouts.frame.handle(),
                layouts.instance.handle(),
                layouts.material.handle(),
            ],
        )
        .with_depth(DepthState {
            write: true,
            compare: CompareFunction::Less,
            bias: None,
        })
        .for_subpass(ctx, targets, SubpassId::GBuffer)?;
        Ok(Self { pipeline })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let packet = inputs.packet;
        if packet.opaque.is_empty() {
            return Ok(());
        }
        let pipeline = self.pipeline.handle();
        ctx.record(Command::BindPipeline(pipeline));
        bind_scene_sets(ctx, pipeline, packet, packet.main_camera);
        draw_batches(ctx, inputs.cache, pipeline, &packet.opaque, true)
    }
}
