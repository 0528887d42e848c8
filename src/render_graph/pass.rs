//! Render pass capability interface and the closed set of pass kinds

use super::context::RenderContext;
use super::packet::FramePacket;
use super::subpass::SubpassId;
use super::targets::GraphTargets;
use crate::backend::GpuDevice;
use crate::error::RenderResult;
use crate::pipeline::{
    ColorGradingPass, CombineUiPass, DeferredLightingPass, ForwardLightingPass, GBufferPass, PickPass,
    PixelationPass, PointShadowPass, SunShadowPass, ToneMappingPass, UiFrame, UiPass,
};
use crate::resources::GpuResourceCache;

/// Read-only inputs for recording one frame
pub struct PassInputs<'a, D: GpuDevice> {
    pub packet: &'a FramePacket,
    pub cache: &'a GpuResourceCache<D>,
    pub targets: &'a GraphTargets<D>,
    pub ui: &'a UiFrame,
    pub image_index: u32,
}

/// What every pass can do
///
/// `initialize` creates pipelines and descriptor sets, `draw` records into the
/// context's command list, and `on_swapchain_rebuilt` refreshes whatever refers
/// to swapchain-sized targets.
pub trait RenderPass<D: GpuDevice>: Sized {
    const NAME: &'static str;

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self>;

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()>;

    fn on_swapchain_rebuilt(&mut self, _ctx: &RenderContext<D>, _targets: &GraphTargets<D>) -> RenderResult<()> {
        Ok(())
    }
}

/// Where a pass records its work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStage {
    /// Own render pass, recorded before the main pass
    Shadow,
    /// One subpass of the main render pass
    Subpass(SubpassId),
    /// Recorded on demand, never as part of a frame
    Offscreen,
}

/// Tag naming each pass kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    ShadowDirectional,
    ShadowPoint,
    GBuffer,
    DeferredLighting,
    ForwardLighting,
    ToneMapping,
    ColorGrading,
    Pixelation,
    Ui,
    CombineUi,
    Pick,
}

impl PassId {
    /// Every pass in recording order
    pub const ALL: [PassId; 11] = [
        PassId::ShadowDirectional,
        PassId::ShadowPoint,
        PassId::GBuffer,
        PassId::DeferredLighting,
        PassId::ForwardLighting,
        PassId::ToneMapping,
        PassId::ColorGrading,
        PassId::Pixelation,
        PassId::Ui,
        PassId::CombineUi,
        PassId::Pick,
    ];

    pub fn stage(self) -> PassStage {
        match self {
            PassId::ShadowDirectional | PassId::ShadowPoint => PassStage::Shadow,
            PassId::GBuffer => PassStage::Subpass(SubpassId::GBuffer),
            PassId::DeferredLighting => PassStage::Subpass(SubpassId::DeferredLighting),
            PassId::ForwardLighting => PassStage::Subpass(SubpassId::ForwardLighting),
            PassId::ToneMapping => PassStage::Subpass(SubpassId::ToneMapping),
            PassId::ColorGrading => PassStage::Subpass(SubpassId::ColorGrading),
            PassId::Pixelation => PassStage::Subpass(SubpassId::Pixelation),
            PassId::Ui => PassStage::Subpass(SubpassId::Ui),
            PassId::CombineUi => PassStage::Subpass(SubpassId::CombineUi),
            PassId::Pick => PassStage::Offscreen,
        }
    }
}

/// Tagged union over every pass; dispatch is a match, not a vtable.
pub enum PassKind<D: GpuDevice> {
    ShadowDirectional(SunShadowPass<D>),
    ShadowPoint(PointShadowPass<D>),
    GBuffer(GBufferPass<D>),
    DeferredLighting(DeferredLightingPass<D>),
    ForwardLighting(ForwardLightingPass<D>),
    ToneMapping(ToneMappingPass<D>),
    ColorGrading(ColorGradingPass<D>),
    Pixelation(PixelationPass<D>),
    Ui(UiPass<D>),
    CombineUi(CombineUiPass<D>),
    Pick(PickPass<D>),
}

macro_rules! dispatch {
    ($self:expr, $pass:ident => $body:expr) => {
        match $self {
            PassKind::ShadowDirectional($pass) => $body,
            PassKind::ShadowPoint($pass) => $body,
            PassKind::GBuffer($pass) => $body,
            PassKind::DeferredLighting($pass) => $body,
            PassKind::ForwardLighting($pass) => $body,
            PassKind::ToneMapping($pass) => $body,
            PassKind::ColorGrading($pass) => $body,
            PassKind::Pixelation($pass) => $body,
            PassKind::Ui($pass) => $body,
            PassKind::CombineUi($pass) => $body,
            PassKind::Pick($pass) => $body,
        }
    };
}

impl<D: GpuDevice> PassKind<D> {
    pub fn initialize(id: PassId, ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        log::debug!("Initializing {:?} pass", id);
        Ok(match id {
            PassId::ShadowDirectional => PassKind::ShadowDirectional(SunShadowPass::initialize(ctx, targets)?),
            PassId::ShadowPoint => PassKind::ShadowPoint(PointShadowPass::initialize(ctx, targets)?),
            PassId::GBuffer => PassKind::GBuffer(GBufferPass::initialize(ctx, targets)?),
            PassId::DeferredLighting => PassKind::DeferredLighting(DeferredLightingPass::initialize(ctx, targets)?),
            PassId::ForwardLighting => PassKind::ForwardLighting(ForwardLightingPass::initialize(ctx, targets)?),
            PassId::ToneMapping => PassKind::ToneMapping(ToneMappingPass::initialize(ctx, targets)?),
            PassId::ColorGrading => PassKind::ColorGrading(ColorGradingPass::initialize(ctx, targets)?),
            PassId::Pixelation => PassKind::Pixelation(PixelationPass::initialize(ctx, targets)?),
            PassId::Ui => PassKind::Ui(UiPass::initialize(ctx, targets)?),
            PassId::CombineUi => PassKind::CombineUi(CombineUiPass::initialize(ctx, targets)?),
            PassId::Pick => PassKind::Pick(PickPass::initialize(ctx, targets)?),
        })
    }

    pub fn id(&self) -> PassId {
        match self {
            PassKind::ShadowDirectional(_) => PassId::ShadowDirectional,
            PassKind::ShadowPoint(_) => PassId::ShadowPoint,
            PassKind::GBuffer(_) => PassId::GBuffer,
            PassKind::DeferredLighting(_) => PassId::DeferredLighting,
            PassKind::ForwardLighting(_) => PassId::ForwardLighting,
            PassKind::ToneMapping(_) => PassId::ToneMapping,
            PassKind::ColorGrading(_) => PassId::ColorGrading,
            PassKind::Pixelation(_) => PassId::Pixelation,
            PassKind::Ui(_) => PassId::Ui,
            PassKind::CombineUi(_) => PassId::CombineUi,
            PassKind::Pick(_) => PassId::Pick,
        }
    }

    pub fn name(&self) -> &'static str {
        fn name_of<D: GpuDevice, P: RenderPass<D>>(_: &P) -> &'static str {
            P::NAME
        }
        dispatch!(self, pass => name_of::<D, _>(pass))
    }

    pub fn stage(&self) -> PassStage {
        self.id().stage()
    }

    pub fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        dispatch!(self, pass => pass.draw(ctx, inputs))
    }

    pub fn on_swapchain_rebuilt(&mut self, ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<()> {
        dispatch!(self, pass => pass.on_swapchain_rebuilt(ctx, targets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_cover_every_subpass_once() {
        let subpasses: Vec<SubpassId> = PassId::ALL
            .iter()
            .filter_map(|id| match id.stage() {
                PassStage::Subpass(subpass) => Some(subpass),
                _ => None,
            })
            .collect();
        assert_eq!(subpasses, SubpassId::ALL.to_vec());
    }

    #[test]
    fn test_shadows_record_first() {
        let first_subpass = PassId::ALL
            .iter()
            .position(|id| matches!(id.stage(), PassStage::Subpass(_)))
            .unwrap();
        assert!(PassId::ALL[..first_subpass]
            .iter()
            .all(|id| id.stage() == PassStage::Shadow));
    }
}
