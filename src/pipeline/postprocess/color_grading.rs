//! Lift/gamma/gain color grading with saturation and contrast

use glam::Vec3;

use super::PostStage;
use crate::backend::GpuDevice;
use crate::error::RenderResult;
use crate::pipeline::shaders::ShaderProgram;
use crate::render_graph::{AttachmentId, GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

#[derive(Debug, Clone, PartialEq)]
pub struct ColorGradingSettings {
    /// Added to shadows
    pub lift: Vec3,
    /// Midtone power
    pub gamma: Vec3,
    /// Highlight multiplier
    pub gain: Vec3,
    pub saturation: f32,
    pub contrast: f32,
}

impl Default for ColorGradingSettings {
    /// Identity grade
    fn default() -> Self {
        Self {
            lift: Vec3::ZERO,
            gamma: Vec3::ONE,
            gain: Vec3::ONE,
            saturation: 1.0,
            contrast: 1.0,
        }
    }
}

pub struct ColorGradingPass<D: GpuDevice> {
    stage: PostStage<D>,
}

impl<D: GpuDevice> RenderPass<D> for ColorGradingPass<D> {
    const NAME: &'static str = "Color Grading";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let stage = PostStage::new(
            ctx,
            targets,
            ShaderProgram::ColorGrading,
            SubpassId::ColorGrading,
            AttachmentId::Ldr,
            None,
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
