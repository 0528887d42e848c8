//! Instance-id picking
//!
//! Renders the main view's visible instances into an `R32Uint` id buffer,
//! scissored to the requested pixel, and copies that one texel into a
//! host-visible readback buffer. Background stays at [`NO_INSTANCE`].
//!
//! [`NO_INSTANCE`]: crate::scene::NO_INSTANCE

use super::shaders::ShaderProgram;
use super::{bind_scene_sets, draw_batches, PipelineState};
use crate::backend::{
    ClearValue, Command, CompareFunction, DepthState, GpuDevice, Owned, PipelineHandle, ScissorRect, Viewport,
};
use crate::error::RenderResult;
use crate::render_graph::{GraphTargets, PassInputs, RenderContext, RenderPass};

pub struct PickPass<D: GpuDevice> {
    pipeline: Owned<D, PipelineHandle>,
    pixel: Option<(u32, u32)>,
}

impl<D: GpuDevice> PickPass<D> {
    /// Pixel the next `draw` renders and reads back. Cleared by `draw`.
    pub fn request(&mut self, x: u32, y: u32) {
        self.pixel = Some((x, y));
    }
}

impl<D: GpuDevice> RenderPass<D> for PickPass<D> {
    const NAME: &'static str = "Pick";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let layouts = ctx.layouts();
        let pipeline = PipelineState::mesh(
            ShaderProgram::PickId,
            vec![layouts.frame.handle(), layouts.instance.handle()],
        )
        .with_depth(DepthState {
            write: true,
            compare: CompareFunction::Less,
            bias: None,
        })
        .create(ctx, targets.passes.pick.handle(), 0, 1)?;
        Ok(Self { pipeline, pixel: None })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let Some((x, y)) = self.pixel.take() else {
            return Ok(());
        };
        let targets = &inputs.targets.swapchain;
        let extent = targets.extent();
        let packet = inputs.packet;
        let pipeline = self.pipeline.handle();

        ctx.record(Command::BeginRenderPass {
            render_pass: inputs.targets.passes.pick.handle(),
            framebuffer: targets.pick_framebuffer(),
            extent,
            clear_values: vec![ClearValue::ColorUint([0; 4]), ClearValue::Depth(1.0)],
        });
        ctx.record(Command::SetViewport(Viewport::full(extent)));
        ctx.record(Command::SetScissor(ScissorRect {
            x,
            y,
            width: 1,
            height: 1,
        }));
        ctx.record(Command::BindPipeline(pipeline));
        bind_scene_sets(ctx, pipeline, packet, packet.main_camera);
        draw_batches(ctx, inputs.cache, pipeline, packet.visible_batches(), false)?;
        ctx.record(Command::EndRenderPass);

        ctx.record(Command::CopyTextureToBuffer {
            texture: targets.pick_ids(),
            x,
            y,
            buffer: inputs.targets.readback(),
            buffer_offset: 0,
        });
        Ok(())
    }
}
