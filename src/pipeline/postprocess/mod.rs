//! Post-processing subpasses
//!
//! Every stage is a full-screen triangle reading the previous stage's output
//! at the fragment's own pixel (pixelation reads its block centre) and writing
//! the next attachment of the main render pass. All stages share the frame's
//! [`PostUniform`](super::uniforms::PostUniform).

mod color_grading;
mod combine;
mod pixelation;
mod tonemapping;

pub use color_grading::{ColorGradingPass, ColorGradingSettings};
pub use combine::CombineUiPass;
pub use pixelation::{PixelationPass, PixelationSettings};
pub use tonemapping::{ToneMapSettings, ToneMappingPass, TonemapOperator};

use super::shaders::ShaderProgram;
use super::uniforms::PostUniform;
use super::{draw_fullscreen, PipelineState};
use crate::backend::{
    Command, DescriptorResource, DescriptorSetHandle, DescriptorWrite, GpuDevice, Owned, OwnedExt, PipelineHandle,
};
use crate::error::RenderResult;
use crate::render_graph::{ring_binding, AttachmentId, FramePacket, GraphTargets, RenderContext, SubpassId};

/// Pipeline and input set of one post stage
struct PostStage<D: GpuDevice> {
    set: Owned<D, DescriptorSetHandle>,
    pipeline: Owned<D, PipelineHandle>,
    input: AttachmentId,
    overlay: AttachmentId,
}

impl<D: GpuDevice> PostStage<D> {
    fn new(
        ctx: &RenderContext<D>,
        targets: &GraphTargets<D>,
        program: ShaderProgram,
        subpass: SubpassId,
        input: AttachmentId,
        overlay: Option<AttachmentId>,
    ) -> RenderResult<Self> {
        let pipeline = PipelineState::fullscreen(program, vec![ctx.layouts().post.handle()])
            .for_subpass(ctx, targets, subpass)?;
        // Stages without an overlay bind their input twice.
        let overlay = overlay.unwrap_or(input);
        Ok(Self {
            set: Self::create_set(ctx, targets, input, overlay)?,
            pipeline,
            input,
            overlay,
        })
    }

    fn create_set(
        ctx: &RenderContext<D>,
        targets: &GraphTargets<D>,
        input: AttachmentId,
        overlay: AttachmentId,
    ) -> RenderResult<Owned<D, DescriptorSetHandle>> {
        let ring = ctx.allocator().buffer();
        ctx.device().owned_descriptor_set(
            ctx.layouts().post.handle(),
            &[
                ring_binding(ring, 0, std::mem::size_of::<PostUniform>() as u64),
                DescriptorWrite {
                    binding: 1,
                    resource: DescriptorResource::Texture(targets.swapchain.attachment(input)?),
                },
                DescriptorWrite {
                    binding: 2,
                    resource: DescriptorResource::Texture(targets.swapchain.attachment(overlay)?),
                },
            ],
        )
    }

    fn draw(&self, ctx: &mut RenderContext<D>, packet: &FramePacket) -> RenderResult<()> {
        let pipeline = self.pipeline.handle();
        ctx.record(Command::BindPipeline(pipeline));
        ctx.record(Command::BindDescriptorSet {
            pipeline,
            index: 0,
            set: self.set.handle(),
            dynamic_offsets: vec![packet.post],
        });
        draw_fullscreen(ctx)
    }

    fn rebuild(&mut self, ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<()> {
        self.set = Self::create_set(ctx, targets, self.input, self.overlay)?;
        Ok(())
    }
}
