//! Deferred lighting subpass
//!
//! Full-screen pass that reads the G-buffer at each fragment's own pixel and
//! accumulates the sun, every point light and the ambient term into the HDR
//! target. Shadow maps rendered earlier in the frame are sampled with depth
//! comparison.

use super::shaders::ShaderProgram;
use super::{draw_fullscreen, PipelineState};
use crate::backend::{
    Command, DescriptorResource, DescriptorSetHandle, DescriptorWrite, GpuDevice, Owned, OwnedExt, PipelineHandle,
};
use crate::error::RenderResult;
use crate::render_graph::{AttachmentId, GraphTargets, PassInputs, RenderContext, RenderPass, SubpassId};

/// Sun map, point shadow array and comparison sampler
pub(crate) fn create_shadow_set<D: GpuDevice>(
    ctx: &RenderContext<D>,
    targets: &GraphTargets<D>,
) -> RenderResult<Owned<D, DescriptorSetHandle>> {
    ctx.device().owned_descriptor_set(
        ctx.layouts().shadow.handle(),
        &[
            DescriptorWrite {
                binding: 0,
                resource: DescriptorResource::Texture(targets.shadows.sun()),
            },
            DescriptorWrite {
                binding: 1,
                resource: DescriptorResource::Texture(targets.shadows.points()),
            },
            DescriptorWrite {
                binding: 2,
                resource: DescriptorResource::Sampler(ctx.samplers().shadow.handle()),
            },
        ],
    )
}

fn create_gbuffer_set<D: GpuDevice>(
    ctx: &RenderContext<D>,
    targets: &GraphTargets<D>,
) -> RenderResult<Owned<D, DescriptorSetHandle>> {
    let inputs = [
        AttachmentId::GBufferAlbedo,
        AttachmentId::GBufferNormal,
        AttachmentId::GBufferMaterial,
        AttachmentId::Depth,
    ];
    let writes = inputs
        .iter()
        .enumerate()
        .map(|(binding, id)| {
            Ok(DescriptorWrite {
                binding: binding as u32,
                resource: DescriptorResource::Texture(targets.swapchain.attachment(*id)?),
            })
        })
        .collect::<RenderResult<Vec<_>>>()?;
    ctx.device().owned_descriptor_set(ctx.layouts().gbuffer.handle(), &writes)
}

pub struct DeferredLightingPass<D: GpuDevice> {
    gbuffer_set: Owned<D, DescriptorSetHandle>,
    shadow_set: Owned<D, DescriptorSetHandle>,
    pipeline: Owned<D, PipelineHandle>,
}

impl<D: GpuDevice> RenderPass<D> for DeferredLightingPass<D> {
    const NAME: &'static str = "Deferred Lighting";

    fn initialize(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Self> {
        let layouts = ctx.layouts();
        let pipeline = PipelineState::fullscreen(
            ShaderProgram::DeferredLighting,
            vec![
                layouts.frame.handle(),
                layouts.gbuffer.handle(),
                layouts.shadow.handle(),
            ],
        )
        .for_subpass(ctx, targets, SubpassId::DeferredLighting)?;

        Ok(Self {
            gbuffer_set: create_gbuffer_set(ctx, targets)?,
            shadow_set: create_shadow_set(ctx, targets)?,
            pipeline,
        })
    }

    fn draw(&mut self, ctx: &mut RenderContext<D>, inputs: &PassInputs<'_, D>) -> RenderResult<()> {
        let packet = inputs.packet;
        let pipeline = self.pipeline.handle();
        let frame_set = ctx.frame_set();
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
            set: self.gbuffer_set.handle(),
            dynamic_offsets: Vec::new(),
        });
        ctx.record(Command::BindDescriptorSet {
            pipeline,
            index: 2,
            set: self.shadow_set.handle(),
            dynamic_offsets: Vec::new(),
        });
        draw_fullscreen(ctx)
    }

    fn on_swapchain_rebuilt(&mut self, ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<()> {
        self.gbuffer_set = create_gbuffer_set(ctx, targets)?;
        Ok(())
    }
}
