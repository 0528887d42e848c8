//! GPU images and framebuffers owned by the render graph
//!
//! Swapchain-sized targets are rebuilt as one unit whenever the swapchain
//! changes. Shadow maps and the pick readback buffer have fixed sizes and live
//! as long as the graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::attachment::AttachmentId;
use super::subpass::RenderPassLayout;
use crate::backend::{
    AccessScope, AttachmentDescriptor, AttachmentReference, AttachmentView, BufferDescriptor, BufferHandle,
    BufferUsage, ClearValue, Extent2d, FramebufferDescriptor, FramebufferHandle, GpuDevice, ImageLayout, LoadOp,
    MemoryLocation, Owned, OwnedExt, RenderPassDescriptor, RenderPassHandle, StoreOp, SubpassDependency,
    SubpassDescriptor, SwapchainInfo, TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
};
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};

/// Format of the pick id buffer
pub const PICK_ID_FORMAT: TextureFormat = TextureFormat::R32Uint;

fn shadow_render_pass_descriptor() -> RenderPassDescriptor {
    RenderPassDescriptor {
        label: "Shadow Depth Pass".into(),
        attachments: vec![AttachmentDescriptor {
            format: TextureFormat::Depth32Float,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::ShaderReadOnly,
        }],
        subpasses: vec![SubpassDescriptor {
            inputs: Vec::new(),
            colors: Vec::new(),
            depth: Some(AttachmentReference {
                attachment: 0,
                layout: ImageLayout::DepthAttachment,
            }),
        }],
        dependencies: vec![SubpassDependency {
            src: Some(0),
            dst: None,
            src_access: AccessScope::DEPTH_WRITE,
            dst_access: AccessScope::SHADER_READ,
            by_region: false,
        }],
    }
}

fn pick_render_pass_descriptor() -> RenderPassDescriptor {
    RenderPassDescriptor {
        label: "Pick Pass".into(),
        attachments: vec![
            AttachmentDescriptor {
                format: PICK_ID_FORMAT,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::TransferSrc,
            },
            AttachmentDescriptor {
                format: TextureFormat::Depth32Float,
                load_op: LoadOp::Clear,
                store_op: StoreOp::DontCare,
                initial_layout: ImageLayout::Undefined,
                final_layout: ImageLayout::DepthAttachment,
            },
        ],
        subpasses: vec![SubpassDescriptor {
            inputs: Vec::new(),
            colors: vec![AttachmentReference {
                attachment: 0,
                layout: ImageLayout::ColorAttachment,
            }],
            depth: Some(AttachmentReference {
                attachment: 1,
                layout: ImageLayout::DepthAttachment,
            }),
        }],
        dependencies: vec![SubpassDependency {
            src: Some(0),
            dst: None,
            src_access: AccessScope::COLOR_WRITE,
            dst_access: AccessScope::TRANSFER_READ,
            by_region: false,
        }],
    }
}

/// Render passes, created once per swapchain format
pub struct RenderPasses<D: GpuDevice> {
    pub main: Owned<D, RenderPassHandle>,
    pub shadow: Owned<D, RenderPassHandle>,
    pub pick: Owned<D, RenderPassHandle>,
}

impl<D: GpuDevice> RenderPasses<D> {
    pub fn new(device: &Arc<D>, layout: &RenderPassLayout, swapchain_format: TextureFormat) -> RenderResult<Self> {
        layout.validate()?;
        Ok(Self {
            main: device.owned_render_pass(&layout.descriptor(swapchain_format))?,
            shadow: device.owned_render_pass(&shadow_render_pass_descriptor())?,
            pick: device.owned_render_pass(&pick_render_pass_descriptor())?,
        })
    }
}

/// Attachments and framebuffers sized to the swapchain
pub struct SwapchainTargets<D: GpuDevice> {
    extent: Extent2d,
    generation: u64,
    framebuffers: Vec<Owned<D, FramebufferHandle>>,
    pick_framebuffer: Owned<D, FramebufferHandle>,
    attachments: BTreeMap<AttachmentId, Owned<D, TextureHandle>>,
    pick_ids: Owned<D, TextureHandle>,
    pick_depth: Owned<D, TextureHandle>,
}

impl<D: GpuDevice> SwapchainTargets<D> {
    pub fn new(device: &Arc<D>, passes: &RenderPasses<D>, swapchain: &SwapchainInfo) -> RenderResult<Self> {
        let extent = swapchain.extent;
        if extent.is_empty() {
            return Err(RenderError::InvalidGraph("cannot size render targets for an empty extent".into()));
        }

        let mut attachments = BTreeMap::new();
        for id in AttachmentId::ALL.into_iter().filter(|a| a.is_transient()) {
            let texture = device.owned_texture(&TextureDescriptor {
                label: id.label().into(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                format: id.format(swapchain.format),
                usage: id.usage(),
            })?;
            attachments.insert(id, texture);
        }

        let mut framebuffers = Vec::with_capacity(swapchain.image_count as usize);
        for image in 0..swapchain.image_count {
            let swapchain_texture = device.swapchain_texture(image)?;
            let views = AttachmentId::ALL
                .iter()
                .map(|id| match attachments.get(id) {
                    Some(texture) => AttachmentView::from(texture.handle()),
                    None => AttachmentView::from(swapchain_texture),
                })
                .collect();
            framebuffers.push(device.owned_framebuffer(&FramebufferDescriptor {
                label: format!("Main Framebuffer {}", image),
                render_pass: passes.main.handle(),
                attachments: views,
                extent,
            })?);
        }

        let pick_ids = device.owned_texture(&TextureDescriptor {
            label: "Pick Ids".into(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            format: PICK_ID_FORMAT,
            usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::COPY_SRC,
        })?;
        let pick_depth = device.owned_texture(&TextureDescriptor {
            label: "Pick Depth".into(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::DEPTH_ATTACHMENT,
        })?;
        let pick_framebuffer = device.owned_framebuffer(&FramebufferDescriptor {
            label: "Pick Framebuffer".into(),
            render_pass: passes.pick.handle(),
            attachments: vec![pick_ids.handle().into(), pick_depth.handle().into()],
            extent,
        })?;

        log::debug!(
            "Render targets built for {}x{} ({} swapchain images)",
            extent.width,
            extent.height,
            swapchain.image_count
        );

        Ok(Self {
            extent,
            generation: swapchain.generation,
            framebuffers,
            pick_framebuffer,
            attachments,
            pick_ids,
            pick_depth,
        })
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Swapchain generation the targets were built against
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Texture behind a transient attachment
    pub fn attachment(&self, id: AttachmentId) -> RenderResult<TextureHandle> {
        self.attachments
            .get(&id)
            .map(Owned::handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{} is not owned by the graph", id.label())))
    }

    pub fn framebuffer(&self, image_index: u32) -> RenderResult<FramebufferHandle> {
        self.framebuffers
            .get(image_index as usize)
            .map(Owned::handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("no framebuffer for swapchain image {}", image_index)))
    }

    pub fn pick_framebuffer(&self) -> FramebufferHandle {
        self.pick_framebuffer.handle()
    }

    pub fn pick_ids(&self) -> TextureHandle {
        self.pick_ids.handle()
    }

    pub fn pick_depth(&self) -> TextureHandle {
        self.pick_depth.handle()
    }
}

/// Directional shadow map and point shadow cube array
pub struct ShadowTargets<D: GpuDevice> {
    sun_framebuffer: Owned<D, FramebufferHandle>,
    point_framebuffers: Vec<Owned<D, FramebufferHandle>>,
    sun: Owned<D, TextureHandle>,
    points: Owned<D, TextureHandle>,
    sun_extent: Extent2d,
    point_extent: Extent2d,
}

impl<D: GpuDevice> ShadowTargets<D> {
    pub fn new(device: &Arc<D>, passes: &RenderPasses<D>, config: &RendererConfig) -> RenderResult<Self> {
        let usage = TextureUsage::DEPTH_ATTACHMENT | TextureUsage::SAMPLED;
        let sun_extent = Extent2d::new(config.shadow_map_size, config.shadow_map_size);
        let point_extent = Extent2d::new(config.point_shadow_size, config.point_shadow_size);
        // The array is bound even without point shadows, so it keeps one cube.
        let layers = config.max_point_shadows.max(1) * 6;

        let sun = device.owned_texture(&TextureDescriptor {
            label: "Sun Shadow Map".into(),
            width: sun_extent.width,
            height: sun_extent.height,
            layers: 1,
            format: TextureFormat::Depth32Float,
            usage,
        })?;
        let points = device.owned_texture(&TextureDescriptor {
            label: "Point Shadow Maps".into(),
            width: point_extent.width,
            height: point_extent.height,
            layers,
            format: TextureFormat::Depth32Float,
            usage,
        })?;

        let sun_framebuffer = device.owned_framebuffer(&FramebufferDescriptor {
            label: "Sun Shadow Framebuffer".into(),
            render_pass: passes.shadow.handle(),
            attachments: vec![sun.handle().into()],
            extent: sun_extent,
        })?;
        let point_framebuffers = (0..config.max_point_shadows * 6)
            .map(|layer| {
                device.owned_framebuffer(&FramebufferDescriptor {
                    label: format!("Point Shadow Layer {}", layer),
                    render_pass: passes.shadow.handle(),
                    attachments: vec![AttachmentView {
                        texture: points.handle(),
                        layer: Some(layer),
                    }],
                    extent: point_extent,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            sun_framebuffer,
            point_framebuffers,
            sun,
            points,
            sun_extent,
            point_extent,
        })
    }

    pub fn sun(&self) -> TextureHandle {
        self.sun.handle()
    }

    pub fn points(&self) -> TextureHandle {
        self.points.handle()
    }

    pub fn sun_framebuffer(&self) -> FramebufferHandle {
        self.sun_framebuffer.handle()
    }

    pub fn sun_extent(&self) -> Extent2d {
        self.sun_extent
    }

    pub fn point_extent(&self) -> Extent2d {
        self.point_extent
    }

    pub fn point_framebuffer(&self, layer: u32) -> RenderResult<FramebufferHandle> {
        self.point_framebuffers
            .get(layer as usize)
            .map(Owned::handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("no point shadow layer {}", layer)))
    }
}

/// Everything a pass may bind: render passes, swapchain-sized attachments,
/// shadow maps and the pick readback buffer.
pub struct GraphTargets<D: GpuDevice> {
    pub layout: RenderPassLayout,
    pub swapchain: SwapchainTargets<D>,
    pub shadows: ShadowTargets<D>,
    readback: Owned<D, BufferHandle>,
    pub passes: RenderPasses<D>,
}

impl<D: GpuDevice> GraphTargets<D> {
    pub fn new(
        device: &Arc<D>,
        layout: &RenderPassLayout,
        swapchain: &SwapchainInfo,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let passes = RenderPasses::new(device, layout, swapchain.format)?;
        let shadows = ShadowTargets::new(device, &passes, config)?;
        let swapchain = SwapchainTargets::new(device, &passes, swapchain)?;
        let readback = device.owned_buffer(&BufferDescriptor {
            label: "Pick Readback".into(),
            size: PICK_ID_FORMAT.bytes_per_pixel() as u64,
            usage: BufferUsage::COPY_DST,
            location: MemoryLocation::HostVisible,
        })?;
        Ok(Self {
            layout: layout.clone(),
            swapchain,
            shadows,
            readback,
            passes,
        })
    }

    pub fn readback(&self) -> BufferHandle {
        self.readback.handle()
    }

    /// Clear values for the main render pass, one per attachment
    pub fn main_clear_values() -> Vec<ClearValue> {
        AttachmentId::ALL.iter().map(|a| a.clear_value()).collect()
    }
}
