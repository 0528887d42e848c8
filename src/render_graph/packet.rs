//! Per-frame data uploaded before recording
//!
//! Culling output is turned into instanced draws and every array the shaders
//! read is streamed into the active ring region. What remains are dynamic
//! offsets and draw lists, so recording never touches the scene.

use glam::Mat4;

use super::context::RenderContext;
use crate::backend::{CameraUniform, Extent2d, GpuDevice};
use crate::culling::{build_batches, CulledViews, DrawBatch, InstanceStream};
use crate::error::RenderResult;
use crate::pipeline::uniforms::{LightingUniform, PostUniform};

/// Depth-only draws of the directional shadow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SunShadowDraws {
    pub camera: u32,
    pub casters: Vec<DrawBatch>,
}

/// Depth-only draws of one point shadow cube
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointShadowDraws {
    pub first_layer: u32,
    /// Camera offset of each face, +X, -X, +Y, -Y, +Z, -Z
    pub cameras: [u32; 6],
    pub casters: Vec<DrawBatch>,
}

/// Dynamic offsets and draw lists of one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramePacket {
    pub frame_index: u64,
    pub main_camera: u32,
    pub point_lights: u32,
    pub lighting: u32,
    pub shadow_matrices: u32,
    pub instances: u32,
    pub joints: u32,
    pub particles: u32,
    pub particle_count: u32,
    /// Shared by every full-screen post subpass
    pub post: u32,
    pub opaque: Vec<DrawBatch>,
    /// Alpha-blended draws, batched like the opaque ones
    pub transparent: Vec<DrawBatch>,
    pub sun: Option<SunShadowDraws>,
    pub point_shadows: Vec<PointShadowDraws>,
}

impl FramePacket {
    /// Batch the culled views and stream their data for `ctx.frame_index()`.
    pub fn prepare<D: GpuDevice>(ctx: &mut RenderContext<D>, views: &CulledViews) -> RenderResult<Self> {
        let config = ctx.config().clone();
        let per_draw = config.max_instances_per_draw;
        let mut stream = InstanceStream::new(config.max_instances, config.max_joints);

        let opaque = build_batches(views.main.opaque(), per_draw, &mut stream)?;
        let transparent = build_batches(views.main.transparent(), per_draw, &mut stream)?;

        let main_camera = ctx.push_uniform(&views.camera)?;

        let sun = match &views.directional {
            Some(shadow) => {
                let casters = build_batches(&shadow.casters.nodes, per_draw, &mut stream)?;
                let eye = shadow.view.inverse().w_axis.truncate();
                let camera = CameraUniform::new(
                    shadow.view,
                    shadow.projection,
                    eye,
                    0.0,
                    1.0,
                    Extent2d::new(config.shadow_map_size, config.shadow_map_size),
                );
                Some(SunShadowDraws {
                    camera: ctx.push_uniform(&camera)?,
                    casters,
                })
            }
            None => None,
        };

        let mut point_shadows = Vec::with_capacity(views.point_shadows.len());
        for shadow in &views.point_shadows {
            let casters = build_batches(&shadow.casters.nodes, per_draw, &mut stream)?;
            let mut cameras = [0; 6];
            for (face, view_projection) in shadow.face_view_projections.iter().enumerate() {
                let camera = CameraUniform::new(
                    Mat4::IDENTITY,
                    *view_projection,
                    shadow.position,
                    0.0,
                    shadow.radius,
                    Extent2d::new(config.point_shadow_size, config.point_shadow_size),
                );
                cameras[face] = ctx.push_uniform(&camera)?;
            }
            point_shadows.push(PointShadowDraws {
                first_layer: shadow.first_layer,
                cameras,
                casters,
            });
        }

        let lighting = LightingUniform::new(
            views.sun.as_ref(),
            views.directional.is_some(),
            views.point_lights.len() as u32,
            config.ambient,
            config.clear_color,
        );

        let post = PostUniform::new(
            &config.tone_map,
            &config.color_grading,
            &config.pixelation,
            !ctx.swapchain_format().is_srgb(),
        );

        let packet = Self {
            frame_index: ctx.frame_index(),
            main_camera,
            point_lights: ctx.push_array("point lights", &views.point_lights, config.max_point_lights)?,
            lighting: ctx.push_uniform(&lighting)?,
            shadow_matrices: ctx.push_array(
                "shadow matrices",
                &views.shadow_matrices(),
                config.shadow_matrix_count(),
            )?,
            instances: ctx.push_array("instances", stream.instances(), config.max_instances)?,
            joints: ctx.push_array("joint matrices", stream.joints(), config.max_joints)?,
            particles: ctx.push_array("particles", &views.particles.particles, config.max_particles)?,
            particle_count: views.particles.particles.len() as u32,
            post: ctx.push_uniform(&post)?,
            opaque,
            transparent,
            sun,
            point_shadows,
        };

        log::trace!(
            "Frame {} packet: {} instances, {} opaque + {} transparent draws, {} point shadows",
            packet.frame_index,
            stream.len(),
            packet.opaque.len(),
            packet.transparent.len(),
            packet.point_shadows.len()
        );
        Ok(packet)
    }

    /// Dynamic offsets of the frame set for a view using `camera`
    pub fn frame_offsets(&self, camera: u32) -> Vec<u32> {
        vec![camera, self.point_lights, self.lighting, self.shadow_matrices]
    }

    pub fn instance_offsets(&self) -> Vec<u32> {
        vec![self.instances, self.joints]
    }

    /// Draws of every node visible to the main camera
    pub fn visible_batches(&self) -> impl Iterator<Item = &DrawBatch> {
        self.opaque.iter().chain(self.transparent.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::config::RendererConfig;
    use crate::culling::{ViewKind, VisibleNode, VisibleNodeList};
    use crate::resources::{MaterialHandle, MeshHandle};
    use crate::scene::ParticleBatch;
    use std::sync::Arc;

    fn node(id: u32, blend: bool) -> VisibleNode {
        VisibleNode {
            mesh: MeshHandle { index: 0, generation: 0 },
            material: MaterialHandle {
                index: blend as u32,
                generation: 0,
            },
            transform: Mat4::IDENTITY,
            instance_id: id,
            joints: None,
            blend,
        }
    }

    fn views(nodes: Vec<VisibleNode>) -> CulledViews {
        CulledViews {
            camera: CameraUniform::new(
                Mat4::IDENTITY,
                Mat4::IDENTITY,
                glam::Vec3::ZERO,
                0.1,
                10.0,
                Extent2d::new(4, 4),
            ),
            sun: None,
            main: VisibleNodeList {
                view: ViewKind::Main,
                nodes,
            },
            directional: None,
            point_shadows: Vec::new(),
            point_lights: Vec::new(),
            particles: ParticleBatch::default(),
        }
    }

    #[test]
    fn test_packet_splits_opaque_and_transparent() {
        let device = Arc::new(HeadlessDevice::default());
        let config = RendererConfig::default()
            .with_streaming_region_size(1024 * 1024)
            .with_max_instances(512);
        let mut ctx = RenderContext::new(&device, &config).unwrap();

        let packet = FramePacket::prepare(&mut ctx, &views(vec![node(1, false), node(2, true), node(3, false)])).unwrap();
        assert_eq!(packet.opaque.len(), 1);
        assert_eq!(packet.opaque[0].instance_count, 2);
        assert_eq!(packet.transparent.len(), 1);
        assert_eq!(packet.transparent[0].first_instance, 2);
        assert_eq!(packet.visible_batches().count(), 2);
        assert_eq!(packet.frame_offsets(packet.main_camera).len(), 4);

        let alignment = ctx.allocator().alignment() as u32;
        for offset in [packet.main_camera, packet.lighting, packet.instances, packet.particles] {
            assert_eq!(offset % alignment, 0);
        }
    }
}
