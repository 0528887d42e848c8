//! Tone mapping: HDR to display range

use super::PostStage;
use crate::backend::GpuDevice;
use crate::error::RenderResult;
use crate::pipeline::shaders::ShaderProgram;
use crate::render_graph::{AttachmentId, GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

/// Tone mapping operator
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard = 0,
    #[default]
    Aces = 1,
    /// Clamp only
    None = 2,
}

impl TonemapOperator {
    /// Parse an operator name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "reinhard" => Some(TonemapOperator::Reinhard),
            "aces" => Some(TonemapOperator::Aces),
            "none" | "clamp" => Some(TonemapOperator::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToneMapSettings {
    pub operator: TonemapOperator,
    /// Linear multiplier applied before the operator
    pub exposure: f32,
    /// Display gamma; 1.0 leaves encoding to the sRGB stage
    pub gamma: f32,
}

impl Default for ToneMapSettings {
    fn default() -> Self {
        Self {
            operator: TonemapOperator::Aces,
            exposure: 1.0,
            gamma: 1.0,
        }
    }
}

pub struct ToneMappingPass<D: GpuDevice> {
    stage: PostStage<D>,
}

impl<D: GpuDevice> RenderPass<D> for ToneMappingPass<D> {
    const NAME: &'static str = "Tone Mapping";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let stage = PostStage::new(
            ctx,
            targets,
            ShaderProgram::ToneMapping,
            SubpassId::ToneMapping,
            AttachmentId::Hdr,
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

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::reinhard("Reinhard", Some(TonemapOperator::Reinhard))]
    #[case::aces("aces", Some(TonemapOperator::Aces))]
    #[case::clamp("clamp", Some(TonemapOperator::None))]
    #[case::unknown("filmic", None)]
    fn test_operator_names(#[case] name: &str, #[case] expected: Option<TonemapOperator>) {
        assert_eq!(TonemapOperator::from_name(name), expected);
    }

    #[test]
    fn test_operator_matches_shader_switch() {
        assert_eq!(TonemapOperator::Reinhard as u32, 0);
        assert_eq!(TonemapOperator::Aces as u32, 1);
        assert_eq!(TonemapOperator::None as u32, 2);
    }
}
