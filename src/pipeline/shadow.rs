//! Shadow depth passes
//!
//! Each shadow view gets its own single-subpass render pass, recorded before
//! the main pass: the sun renders one orthographic map, every shadowed point
//! light renders six cube faces into consecutive layers of one depth array.

use super::shaders::ShaderProgram;
use super::{bind_scene_sets, draw_batches, PipelineState};
use crate::backend::{
    ClearValue, Command, CompareFunction, CullMode, DepthState, Extent2d, FramebufferHandle, GpuDevice, Owned,
    PipelineHandle, ScissorRect, Viewport,
};
use crate::culling::DrawBatch;
use crate::error::RenderResult;
use crate::render_graph::{FramePacket, GraphTargets, PassInputs, RenderContext, RenderPass};

/// Constant and slope-scaled bias against acne
const DEPTH_BIAS: (i32, u32) = (4, 2);

fn depth_pipeline<D: GpuDevice>(
    ctx: &RenderContext<D>,
    targets: &GraphTargets<D>,
) -> RenderResult<Owned<D, PipelineHandle>> {
    let layouts = ctx.layouts();
    PipelineState::mesh(
        ShaderProgram::ShadowDepth,
        vec![layouts.frame.handle(), layouts.instance.handle()],
    )
    .with_depth(DepthState {
        write: true,
        compare: CompareFunction::Less,
        bias: Some(DEPTH_BIAS),
    })
    .with_cull_mode(CullMode::None)
    .create(ctx, targets.passes.shadow.handle(), 0, 0)
}

/// One depth-only view
struct ShadowView<'a> {
    framebuffer: FramebufferHandle,
    extent: Extent2d,
    camera: u32,
    casters: &'a [DrawBatch],
}

fn record_view<D: GpuDevice>(
    ctx: &mut RenderContext<D>,
    inputs: &PassInputs<'_, D>,
    pipeline: PipelineHandle,
    view: ShadowView<'_>,
) -> RenderResult<()> {
    let packet: &FramePacket = inputs.packet;
    ctx.record(Command::BeginRenderPass {
        render_pass: inputs.targets.passes.shadow.handle(),
        framebuffer: view.framebuffer,
        extent: view.extent,
        clear_values: vec![ClearValue::Depth(1.0)],
    });
    ctx.record(Command::SetViewport(Viewport::full(view.extent)));
    ctx.record(Command::SetScissor(ScissorRect::full(view.extent)));
    if !view.casters.is_empty() {
        ctx.record(Command::BindPipeline(pipeline));
        bind_scene_sets(ctx, pipeline, packet, view.camera);
        draw_batches(ctx, inputs.cache, pipeline, view.casters, false)?;
    }
    ctx.record(Command::EndRenderPass);
    Ok(())
}

/// Directional light shadow map
pub struct SunShadowPass<D: GpuDevice> {
    pipeline: Owned<D, PipelineHandle>,
}

impl<D: GpuDevice> RenderPass<D> for SunShadowPass<D> {
    const NAME: &'static str = "Sun Shadow";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        Ok(Self {
            pipeline: depth_pipeline(ctx, targets)?,
        })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let Some(sun) = &inputs.packet.sun else {
            return Ok(());
        };
        let shadows = &inputs.targets.shadows;
        let view = ShadowView {
            framebuffer: shadows.sun_framebuffer(),
            extent: shadows.sun_extent(),
            camera: sun.camera,
            casters: &sun.casters,
        };
        record_view(ctx, inputs, self.pipeline.handle(), view)
    }
}

/// Cube shadows of point lights, six layers per light
pub struct PointShadowPass<D: GpuDevice> {
    pipeline: Owned<D, PipelineHandle>,
}

impl<D: GpuDevice> RenderPass<D> for PointShadowPass<D> {
    const NAME: &'static str = "Point Shadows";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        Ok(Self {
            pipeline: depth_pipeline(ctx, targets)?,
        })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let shadows = &inputs.targets.shadows;
        for light in &inputs.packet.point_shadows {
            for (face, camera) in light.cameras.iter().enumerate() {
                let view = ShadowView {
                    framebuffer: shadows.point_framebuffer(light.first_layer + face as u32)?,
                    extent: shadows.point_extent(),
                    camera: *camera,
                    casters: &light.casters,
                };
                record_view(ctx, inputs, self.pipeline.handle(), view)?;
            }
        }
        Ok(())
    }
}
