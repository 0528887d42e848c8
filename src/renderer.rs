//! Renderer front end
//!
//! Ties the device, frame scheduler, culler, resource cache and render graph
//! together behind the four operations callers use: initialize, render a
//! frame, resize and pick.

use std::borrow::Cow;
use std::sync::Arc;

use egui::TexturesDelta;
use glam::Vec2;

use crate::backend::{CommandList, Extent2d, GpuDevice};
use crate::config::RendererConfig;
use crate::culling::{CulledViews, VisibilityCuller};
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameScheduler, FrameToken};
use crate::pipeline::UiFrame;
use crate::render_graph::{RenderContext, RenderGraph};
use crate::resources::{CacheStats, GpuResourceCache, ReleaseToken, ResourceCache};
use crate::scene::{SceneSnapshot, SharedScene, NO_INSTANCE};

pub struct Renderer<D: GpuDevice> {
    // Field order is drop order: everything holding descriptor sets goes
    // before the context that owns their layouts and the ring.
    graph: RenderGraph<D>,
    cache: GpuResourceCache<D>,
    culler: VisibilityCuller,
    scheduler: FrameScheduler<D>,
    ctx: RenderContext<D>,
    device: Arc<D>,
    suspended: bool,
    /// Scene of the last rendered frame, replayed by `pick`
    last_scene: Option<SceneSnapshot>,
    /// egui texture updates of frames that never reached the UI pass
    pending_textures: TexturesDelta,
}

impl<D: GpuDevice> Renderer<D> {
    /// Build every device object, the render graph and the caches, and upload
    /// whatever the initial scene references.
    pub fn initialize(device: Arc<D>, config: RendererConfig, initial_scene: &SceneSnapshot) -> RenderResult<Self> {
        config.validate()?;
        let extent = device.swapchain().extent;
        if extent.is_empty() {
            return Err(RenderError::InitializationFailed(
                "the surface has no area; initialize once the window is visible".into(),
            ));
        }

        let ctx = RenderContext::new(&device, &config)?;
        let scheduler = FrameScheduler::new(&device, config.frames_in_flight)?;
        let mut cache = GpuResourceCache::new(
            &device,
            ctx.layouts().material.handle(),
            ctx.samplers().material.handle(),
            config.max_materials,
            config.eviction_age_frames,
        )?;
        let graph = RenderGraph::new(&ctx)?;
        let culler = VisibilityCuller::new(&config);

        // Uploads are tagged with the first frame so their release tokens
        // come back once it completes.
        culler.cull(initial_scene, &mut cache, scheduler.frame_index(), extent)?;

        log::info!(
            "Renderer initialized on {} ({}x{}, {} frames in flight, {} meshes and {} materials resident)",
            device.name(),
            extent.width,
            extent.height,
            config.frames_in_flight,
            cache.stats().meshes,
            cache.stats().materials
        );

        Ok(Self {
            graph,
            cache,
            culler,
            scheduler,
            ctx,
            device,
            suspended: false,
            last_scene: None,
            pending_textures: TexturesDelta::default(),
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        self.ctx.config()
    }

    pub fn extent(&self) -> Extent2d {
        self.ctx.extent()
    }

    /// Whether a zero-area resize paused rendering
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn scheduler(&self) -> &FrameScheduler<D> {
        &self.scheduler
    }

    pub fn graph(&self) -> &RenderGraph<D> {
        &self.graph
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Render and present one frame of `scene`.
    ///
    /// Returns release tokens for every upload whose frame has completed. A
    /// stale surface is recovered internally. Other errors are returned once
    /// the acquired image has been presented blank.
    pub fn render_frame(&mut self, scene: &SceneSnapshot, ui: &UiFrame) -> RenderResult<Vec<ReleaseToken>> {
        let ui = self.with_pending_textures(ui);
        let Some((token, image)) = self.begin_with_image()? else {
            self.defer_textures(&ui);
            return Ok(Vec::new());
        };
        self.last_scene = Some(scene.clone());
        let views = self.cull(&token, scene);
        self.finish_frame(token, image, views, &ui)
    }

    /// Like [`Renderer::render_frame`], holding the scene lock only while
    /// the scene is culled and its assets synced.
    pub fn render_shared(&mut self, scene: &SharedScene, ui: &UiFrame) -> RenderResult<Vec<ReleaseToken>> {
        let ui = self.with_pending_textures(ui);
        let Some((token, image)) = self.begin_with_image()? else {
            self.defer_textures(&ui);
            return Ok(Vec::new());
        };
        let views = {
            let scene = scene.lock();
            self.last_scene = Some(scene.clone());
            self.cull(&token, &scene)
        };
        self.finish_frame(token, image, views, &ui)
    }

    /// Follow a new surface size.
    ///
    /// Repeating the current size does nothing. A zero-area size suspends
    /// rendering until a non-zero size arrives.
    pub fn resize(&mut self, extent: Extent2d) -> RenderResult<()> {
        if extent.is_empty() {
            if !self.suspended {
                log::info!("Surface has no area, rendering suspended");
            }
            self.suspended = true;
            return Ok(());
        }
        if extent == self.ctx.extent() {
            if self.suspended {
                log::info!("Rendering resumed at {}x{}", extent.width, extent.height);
                self.suspended = false;
            }
            return Ok(());
        }
        self.rebuild(extent)
    }

    /// Instance id under `uv` (0..1, origin top-left) in the last rendered
    /// scene, or [`NO_INSTANCE`].
    ///
    /// Fully synchronous: waits for every frame in flight, renders the ids
    /// off-screen and waits again for the readback.
    pub fn pick(&mut self, uv: Vec2) -> RenderResult<u32> {
        if self.suspended || !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            return Ok(NO_INSTANCE);
        }
        let Some(scene) = self.last_scene.take() else {
            return Ok(NO_INSTANCE);
        };
        let extent = self.ctx.extent();
        let x = ((uv.x * extent.width as f32) as u32).min(extent.width - 1);
        let y = ((uv.y * extent.height as f32) as u32).min(extent.height - 1);

        self.scheduler.wait_idle()?;
        let token = self.scheduler.begin_frame(self.ctx.allocator_mut())?;
        let recorded = self.record_pick(&token, &scene, x, y);
        self.last_scene = Some(scene);
        let commands = match recorded {
            Ok(commands) => commands,
            Err(e) => {
                self.scheduler.abandon_frame(token);
                return Err(e);
            }
        };
        self.scheduler.submit_offscreen(token, &commands)?;
        self.scheduler.wait_idle()?;

        let mut texel = [0u8; 4];
        self.device
            .read_buffer(self.graph.targets().readback(), 0, &mut texel)?;
        let id = u32::from_le_bytes(texel);
        log::debug!("Pick at ({}, {}) hit instance {}", x, y, id);
        Ok(id)
    }

    fn record_pick(&mut self, token: &FrameToken, scene: &SceneSnapshot, x: u32, y: u32) -> RenderResult<CommandList> {
        let views = self.cull(token, scene)?;
        let packet = self.graph.prepare(&mut self.ctx, &views)?;
        self.graph.record_pick(&mut self.ctx, &packet, &self.cache, x, y)
    }

    /// Begin a frame and acquire its image, rebuilding once on a stale
    /// surface. `None` skips the frame.
    fn begin_with_image(&mut self) -> RenderResult<Option<(FrameToken, u32)>> {
        for attempt in 0..2 {
            if self.suspended {
                return Ok(None);
            }
            let token = self.scheduler.begin_frame(self.ctx.allocator_mut())?;
            if let Some(image) = self.scheduler.acquire_image(&token)? {
                return Ok(Some((token, image)));
            }
            self.scheduler.abandon_frame(token);
            if attempt == 0 {
                self.recover_surface()?;
            }
        }
        log::warn!("Surface still stale after recreation, skipping frame");
        Ok(None)
    }

    fn cull(&mut self, token: &FrameToken, scene: &SceneSnapshot) -> RenderResult<CulledViews> {
        self.ctx.begin_frame(token.frame_index(), token.completed_frame());
        self.culler
            .cull(scene, &mut self.cache, token.frame_index(), self.ctx.extent())
    }

    fn finish_frame(
        &mut self,
        token: FrameToken,
        image: u32,
        views: RenderResult<CulledViews>,
        ui: &UiFrame,
    ) -> RenderResult<Vec<ReleaseToken>> {
        let recorded = views.and_then(|views| {
            let packet = self.graph.prepare(&mut self.ctx, &views)?;
            self.graph
                .record_frame(&mut self.ctx, &packet, &self.cache, ui, image)
        });
        let commands = match recorded {
            Ok(commands) => commands,
            Err(e) => {
                self.defer_textures(ui);
                if let Err(release) = self.present_blank(token, image) {
                    log::error!("Failed to release swapchain image {}: {}", image, release);
                }
                return Err(e);
            }
        };

        let frame = token.frame_index();
        let outcome = self.scheduler.end_frame(token, image, &commands)?;
        if outcome.needs_rebuild() {
            log::warn!("Frame {} presented to a {:?} surface, recreating", frame, outcome);
            self.recover_surface()?;
        }

        let completed = self.scheduler.completed_frame();
        let evicted = self.cache.evict(frame + 1, completed);
        if evicted > 0 {
            log::debug!("Evicted {} cached resources after frame {}", evicted, frame);
        }
        Ok(self.cache.collect_released(completed))
    }

    /// Hand an acquired image back through a frame without draws, so the
    /// slot's acquire semaphore is consumed and the image is presented.
    fn present_blank(&mut self, token: FrameToken, image: u32) -> RenderResult<()> {
        let commands = match self.graph.record_blank(&mut self.ctx, image) {
            Ok(commands) => commands,
            Err(e) => {
                self.scheduler.abandon_frame(token);
                return Err(e);
            }
        };
        if self.scheduler.end_frame(token, image, &commands)?.needs_rebuild() {
            self.recover_surface()?;
        }
        Ok(())
    }

    /// Fold texture updates held back from skipped frames into `ui`.
    fn with_pending_textures<'a>(&mut self, ui: &'a UiFrame) -> Cow<'a, UiFrame> {
        if self.pending_textures.is_empty() {
            return Cow::Borrowed(ui);
        }
        let mut textures_delta = std::mem::take(&mut self.pending_textures);
        textures_delta.append(ui.textures_delta.clone());
        Cow::Owned(UiFrame {
            primitives: ui.primitives.clone(),
            textures_delta,
            pixels_per_point: ui.pixels_per_point,
        })
    }

    /// Keep texture updates of a frame that was not drawn for the next one.
    ///
    /// Re-applying updates the UI pass already saw rewrites the same texels.
    fn defer_textures(&mut self, ui: &UiFrame) {
        if !ui.textures_delta.is_empty() {
            self.pending_textures.append(ui.textures_delta.clone());
        }
    }

    /// Rebuild against whatever size the surface reports now.
    fn recover_surface(&mut self) -> RenderResult<()> {
        let extent = self.device.current_surface_extent()?;
        if extent.is_empty() {
            log::info!("Surface has no area, rendering suspended");
            self.suspended = true;
            return Ok(());
        }
        self.rebuild(extent)
    }

    fn rebuild(&mut self, extent: Extent2d) -> RenderResult<()> {
        self.scheduler.wait_idle()?;
        self.device.wait_idle()?;
        let swapchain = self.device.recreate_swapchain(extent)?;
        self.graph.rebuild(&mut self.ctx, swapchain)?;
        self.suspended = false;
        log::info!(
            "Swapchain recreated at {}x{} (generation {})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.generation
        );
        Ok(())
    }
}

#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
impl Renderer<crate::backend::vulkan::VulkanDevice> {
    /// Create a Vulkan device presenting to `window` and initialize on it.
    pub fn with_window(
        window: Arc<winit::window::Window>,
        config: RendererConfig,
        initial_scene: &SceneSnapshot,
    ) -> RenderResult<Self> {
        let device = crate::backend::vulkan::VulkanDevice::new(window, &config)?;
        Self::initialize(Arc::new(device), config, initial_scene)
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.scheduler.wait_idle().and_then(|_| self.device.wait_idle()) {
            log::error!("Failed to idle the device on shutdown: {}", e);
        }
        log::info!("Renderer shut down after {} frames", self.scheduler.frame_index());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::scene::Camera;
    use glam::Vec3;

    fn renderer() -> Renderer<HeadlessDevice> {
        let device = Arc::new(HeadlessDevice::default());
        let config = RendererConfig::default()
            .with_streaming_region_size(1024 * 1024)
            .with_max_instances(512);
        let scene = SceneSnapshot::new(Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
        Renderer::initialize(device, config, &scene).unwrap()
    }

    #[test]
    fn test_surface_losing_area_suspends() {
        let mut renderer = renderer();
        let scene = SceneSnapshot::default();
        renderer.device().set_surface_extent(Extent2d::new(0, 0));
        assert!(renderer.render_frame(&scene, &UiFrame::default()).unwrap().is_empty());
        assert!(renderer.is_suspended());

        renderer.device().set_surface_extent(Extent2d::new(64, 64));
        renderer.resize(Extent2d::new(64, 64)).unwrap();
        assert!(!renderer.is_suspended());
        assert_eq!(renderer.extent(), Extent2d::new(64, 64));
    }

    #[test]
    fn test_pick_without_frame_is_none() {
        let mut renderer = renderer();
        assert_eq!(renderer.pick(Vec2::new(0.5, 0.5)).unwrap(), NO_INSTANCE);
    }

    #[test]
    fn test_pick_outside_uv_range_is_none() {
        let mut renderer = renderer();
        let scene = SceneSnapshot::default();
        renderer.render_frame(&scene, &UiFrame::default()).unwrap();
        assert_eq!(renderer.pick(Vec2::new(1.5, 0.5)).unwrap(), NO_INSTANCE);
    }
}
