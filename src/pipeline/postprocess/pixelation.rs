//! Pixelation with optional palette reduction and ordered dithering

use super::PostStage;
use crate::backend::GpuDevice;
use crate::error::RenderResult;
use crate::pipeline::shaders::ShaderProgram;
use crate::render_graph::{AttachmentId, GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelationSettings {
    /// Edge of one output block in pixels; 1 disables pixelation
    pub block_size: u32,
    /// Quantization levels per channel; 0 or 1 keeps full precision
    pub palette_levels: u32,
    /// 4x4 Bayer dither before quantizing
    pub dither: bool,
}

impl Default for PixelationSettings {
    fn default() -> Self {
        Self {
            block_size: 1,
            palette_levels: 0,
            dither: false,
        }
    }
}

impl PixelationSettings {
    pub fn is_identity(&self) -> bool {
        self.block_size <= 1 && self.palette_levels <= 1
    }
}

pub struct PixelationPass<D: GpuDevice> {
    stage: PostStage<D>,
}

impl<D: GpuDevice> RenderPass<D> for PixelationPass<D> {
    const NAME: &'static str = "Pixelation";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let stage = PostStage::new(
            ctx,
            targets,
            ShaderProgram::Pixelation,
            SubpassId::Pixelation,
            AttachmentId::Graded,
            None,
        )?;
        Ok(Self { stage })
    }

    // Runs even when the settings are identity: the subpass must still write
    // its attachment for the combine stage.
    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        self.stage.draw(ctx, inputs.packet)
    }

    fn on_swapchain_rebuilt(&mut self, ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<()> {
        self.stage.rebuild(ctx, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_settings() {
        assert!(PixelationSettings::default().is_identity());
        let blocky = PixelationSettings {
            block_size: 4,
            ..Default::default()
        };
        assert!(!blocky.is_identity());
        let posterized = PixelationSettings {
            palette_levels: 8,
            ..Default::default()
        };
        assert!(!posterized.is_identity());
    }
}
