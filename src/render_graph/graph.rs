//! Frame recording over the fixed pass set

use super::context::RenderContext;
use super::packet::FramePacket;
use super::pass::{PassId, PassInputs, PassKind, PassStage};
use super::subpass::RenderPassLayout;
use super::targets::{GraphTargets, SwapchainTargets};
use crate::backend::{Command, CommandList, GpuDevice, ScissorRect, SwapchainInfo, TextureFormat, Viewport};
use crate::culling::CulledViews;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::UiFrame;
use crate::resources::GpuResourceCache;

/// Owns every pass and the targets they render into.
///
/// Shadow passes record first, each in its own render pass. The main render
/// pass then runs the subpasses in declaration order with a `NextSubpass`
/// between neighbours. Picking records separately, on demand.
pub struct RenderGraph<D: GpuDevice> {
    // Dropped before the targets their descriptor sets point at
    passes: Vec<PassKind<D>>,
    targets: GraphTargets<D>,
    format: TextureFormat,
}

impl<D: GpuDevice> RenderGraph<D> {
    pub fn new(ctx: &RenderContext<D>) -> RenderResult<Self> {
        let layout = RenderPassLayout::deferred();
        let targets = GraphTargets::new(ctx.device(), &layout, ctx.swapchain(), ctx.config())?;
        let passes = initialize_passes(ctx, &targets)?;
        log::info!(
            "Render graph ready: {} passes, {} subpasses, {:?} output",
            passes.len(),
            layout.subpasses().len(),
            ctx.swapchain_format()
        );
        Ok(Self {
            passes,
            targets,
            format: ctx.swapchain_format(),
        })
    }

    pub fn targets(&self) -> &GraphTargets<D> {
        &self.targets
    }

    pub fn layout(&self) -> &RenderPassLayout {
        &self.targets.layout
    }

    pub fn pass_ids(&self) -> impl Iterator<Item = PassId> + '_ {
        self.passes.iter().map(PassKind::id)
    }

    /// Stream the culled views of the current frame.
    pub fn prepare(&self, ctx: &mut RenderContext<D>, views: &CulledViews) -> RenderResult<FramePacket> {
        FramePacket::prepare(ctx, views)
    }

    /// Record one frame targeting swapchain image `image_index`.
    pub fn record_frame(
        &mut self,
        ctx: &mut RenderContext<D>,
        packet: &FramePacket,
        cache: &GpuResourceCache<D>,
        ui: &UiFrame,
        image_index: u32,
    ) -> RenderResult<CommandList> {
        let framebuffer = self.targets.swapchain.framebuffer(image_index)?;
        let extent = self.targets.swapchain.extent();
        if extent != ctx.extent() {
            return Err(RenderError::InvalidGraph(format!(
                "targets are {}x{} but the swapchain is {}x{}",
                extent.width,
                extent.height,
                ctx.extent().width,
                ctx.extent().height
            )));
        }
        let inputs = PassInputs {
            packet,
            cache,
            targets: &self.targets,
            ui,
            image_index,
        };

        for pass in self.passes.iter_mut().filter(|p| p.stage() == PassStage::Shadow) {
            pass.draw(ctx, &inputs)?;
        }

        ctx.record(Command::BeginRenderPass {
            render_pass: self.targets.passes.main.handle(),
            framebuffer,
            extent,
            clear_values: GraphTargets::<D>::main_clear_values(),
        });
        ctx.record(Command::SetViewport(Viewport::full(extent)));
        ctx.record(Command::SetScissor(ScissorRect::full(extent)));

        let mut first = true;
        for pass in self.passes.iter_mut() {
            if !matches!(pass.stage(), PassStage::Subpass(_)) {
                continue;
            }
            if !first {
                ctx.record(Command::NextSubpass);
            }
            first = false;
            log::trace!("Recording {}", pass.name());
            pass.draw(ctx, &inputs)?;
        }
        ctx.record(Command::EndRenderPass);

        Ok(ctx.take_commands())
    }

    /// Record a main pass with no draws, which only clears swapchain image
    /// `image_index` and leaves it ready to present. Drops whatever a failed
    /// recording left behind.
    pub fn record_blank(&self, ctx: &mut RenderContext<D>, image_index: u32) -> RenderResult<CommandList> {
        ctx.take_commands();
        let framebuffer = self.targets.swapchain.framebuffer(image_index)?;
        let extent = self.targets.swapchain.extent();
        ctx.record(Command::BeginRenderPass {
            render_pass: self.targets.passes.main.handle(),
            framebuffer,
            extent,
            clear_values: GraphTargets::<D>::main_clear_values(),
        });
        for _ in 1..self.layout().subpasses().len() {
            ctx.record(Command::NextSubpass);
        }
        ctx.record(Command::EndRenderPass);
        Ok(ctx.take_commands())
    }

    /// Record the id render and one-texel readback at pixel (`x`, `y`).
    pub fn record_pick(
        &mut self,
        ctx: &mut RenderContext<D>,
        packet: &FramePacket,
        cache: &GpuResourceCache<D>,
        x: u32,
        y: u32,
    ) -> RenderResult<CommandList> {
        let extent = self.targets.swapchain.extent();
        if x >= extent.width || y >= extent.height {
            return Err(RenderError::InvalidHandle(format!(
                "pick pixel ({}, {}) outside {}x{}",
                x, y, extent.width, extent.height
            )));
        }
        let ui = UiFrame::default();
        let inputs = PassInputs {
            packet,
            cache,
            targets: &self.targets,
            ui: &ui,
            image_index: 0,
        };
        let pass = self
            .passes
            .iter_mut()
            .find(|p| p.id() == PassId::Pick)
            .ok_or_else(|| RenderError::InvalidGraph("no pick pass".into()))?;
        if let PassKind::Pick(pick) = pass {
            pick.request(x, y);
        }
        pass.draw(ctx, &inputs)?;
        Ok(ctx.take_commands())
    }

    /// Follow a recreated swapchain. The GPU must be idle.
    ///
    /// A size change rebuilds the swapchain-sized targets and lets each pass
    /// refresh its descriptor sets. A format change also invalidates the main
    /// render pass, so every pass is created again.
    pub fn rebuild(&mut self, ctx: &mut RenderContext<D>, swapchain: SwapchainInfo) -> RenderResult<()> {
        ctx.set_swapchain(swapchain);
        if swapchain.format != self.format {
            log::info!(
                "Swapchain format changed from {:?} to {:?}, rebuilding every pass",
                self.format,
                swapchain.format
            );
            self.passes.clear();
            self.targets = GraphTargets::new(ctx.device(), &self.targets.layout, &swapchain, ctx.config())?;
            self.passes = initialize_passes(ctx, &self.targets)?;
            self.format = swapchain.format;
            return Ok(());
        }

        self.targets.swapchain = SwapchainTargets::new(ctx.device(), &self.targets.passes, &swapchain)?;
        for pass in &mut self.passes {
            pass.on_swapchain_rebuilt(ctx, &self.targets)?;
        }
        log::debug!(
            "Render graph rebuilt for {}x{} (generation {})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.generation
        );
        Ok(())
    }
}

fn initialize_passes<D: GpuDevice>(ctx: &RenderContext<D>, targets: &GraphTargets<D>) -> RenderResult<Vec<PassKind<D>>> {
    PassId::ALL
        .iter()
        .map(|id| PassKind::initialize(*id, ctx, targets))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::config::RendererConfig;
    use std::sync::Arc;

    fn context() -> RenderContext<HeadlessDevice> {
        let device = Arc::new(HeadlessDevice::default());
        let config = RendererConfig::default()
            .with_streaming_region_size(1024 * 1024)
            .with_max_instances(512);
        RenderContext::new(&device, &config).unwrap()
    }

    #[test]
    fn test_passes_follow_declared_order() {
        let ctx = context();
        let graph = RenderGraph::new(&ctx).unwrap();
        assert_eq!(graph.pass_ids().collect::<Vec<_>>(), PassId::ALL.to_vec());
    }

    #[test]
    fn test_empty_frame_walks_every_subpass() {
        let mut ctx = context();
        let mut graph = RenderGraph::new(&ctx).unwrap();
        let cache = GpuResourceCache::new(
            ctx.device(),
            ctx.layouts().material.handle(),
            ctx.samplers().material.handle(),
            16,
            8,
        )
        .unwrap();

        let packet = FramePacket::default();
        let commands = graph
            .record_frame(&mut ctx, &packet, &cache, &UiFrame::default(), 0)
            .unwrap();
        assert_eq!(commands.subpass_transitions(), graph.layout().subpasses().len() - 1);
        assert!(matches!(commands.commands().last(), Some(Command::EndRenderPass)));
    }

    #[test]
    fn test_blank_frame_discards_partial_recording() {
        let mut ctx = context();
        let graph = RenderGraph::new(&ctx).unwrap();
        ctx.record(Command::SetViewport(Viewport::full(ctx.extent())));

        let commands = graph.record_blank(&mut ctx, 0).unwrap();
        assert!(matches!(commands.commands().first(), Some(Command::BeginRenderPass { .. })));
        assert!(matches!(commands.commands().last(), Some(Command::EndRenderPass)));
        assert_eq!(commands.subpass_transitions(), graph.layout().subpasses().len() - 1);
        assert_eq!(commands.draw_calls(), 0);
    }

    #[test]
    fn test_rebuild_tracks_new_extent() {
        let mut ctx = context();
        let mut graph = RenderGraph::new(&ctx).unwrap();
        let device = Arc::clone(ctx.device());
        let extent = crate::backend::Extent2d::new(64, 48);
        device.set_surface_extent(extent);
        let info = device.recreate_swapchain(extent).unwrap();
        graph.rebuild(&mut ctx, info).unwrap();
        assert_eq!(graph.targets().swapchain.extent(), extent);
        assert_eq!(graph.targets().swapchain.generation(), info.generation);
        assert_eq!(ctx.extent(), extent);
    }
}
