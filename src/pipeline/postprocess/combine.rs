//! Composites the UI layer over the scene into the swapchain image

use super::PostStage;
use crate::backend::GpuDevice;
use crate::error::RenderResult;
use crate::pipeline::shaders::ShaderProgram;
use crate::render_graph::{AttachmentId, GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

/// Final subpass. Encodes to sRGB in the shader when the swapchain format
/// does not do it on store.
pub struct CombineUiPass<D: GpuDevice> {
    stage: PostStage<D>,
}

impl<D: GpuDevice> RenderPass<D> for CombineUiPass<D> {
    const NAME: &'static str = "Combine UI";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let stage = PostStage::new(
            ctx,
            targets,
            ShaderProgram::CombineUi,
            SubpassId::CombineUi,
            AttachmentId::Pixelated,
            Some(AttachmentId::Ui),
        )?;
        Ok(Self { stage })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        self.stage.draw(ctx, inputs.packet)
    }

    fn on_swapchain_rebuilt(&mut self, ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<()> {
        self.stage.rebuild(ctx, targets)
    }
}
