//! Visibility culling
//!
//! Builds one [`VisibleNodeList`] per view: the main camera, the directional
//! light and every shadow-casting point light that got a shadow slot. Nodes are
//! copied out of the scene with resolved cache handles, so nothing borrowed
//! from the scene outlives the call.

mod batch;
mod frustum;

pub use batch::{build_batches, DrawBatch, InstanceStream};
pub use frustum::{Aabb, Frustum};

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::backend::{CameraUniform, Extent2d};
use crate::config::RendererConfig;
use crate::error::RenderResult;
use crate::pipeline::uniforms::GpuPointLight;
use crate::resources::{AssetId, MaterialHandle, MeshHandle, ResourceCache};
use crate::scene::{DirectionalLight, MeshInstance, ParticleBatch, SceneSnapshot};

/// Which view a node list was culled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Main,
    Directional,
    /// Index into the frame's point light array
    Point(u32),
}

/// A draw instance copied out of the scene
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleNode {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub transform: Mat4,
    pub instance_id: u32,
    pub joints: Option<Arc<[Mat4]>>,
    /// Alpha-blended; drawn in the forward subpass
    pub blend: bool,
}

/// Nodes visible from one view
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleNodeList {
    pub view: ViewKind,
    pub nodes: Vec<VisibleNode>,
}

impl VisibleNodeList {
    fn new(view: ViewKind) -> Self {
        Self {
            view,
            nodes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Instance ids as a sorted set, for membership comparisons
    pub fn instance_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.nodes.iter().map(|n| n.instance_id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn opaque(&self) -> impl Iterator<Item = &VisibleNode> {
        self.nodes.iter().filter(|n| !n.blend)
    }

    pub fn transparent(&self) -> impl Iterator<Item = &VisibleNode> {
        self.nodes.iter().filter(|n| n.blend)
    }
}

/// Directional shadow view
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalShadow {
    pub view: Mat4,
    pub projection: Mat4,
    pub casters: VisibleNodeList,
}

impl DirectionalShadow {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Cube shadow of one point light, rendered into six array layers
#[derive(Debug, Clone, PartialEq)]
pub struct PointShadow {
    pub position: Vec3,
    pub radius: f32,
    /// First of the six layers in the point shadow array
    pub first_layer: u32,
    /// +X, -X, +Y, -Y, +Z, -Z
    pub face_view_projections: [Mat4; 6],
    pub casters: VisibleNodeList,
}

/// Result of culling one frame
#[derive(Debug, Clone)]
pub struct CulledViews {
    pub camera: CameraUniform,
    pub sun: Option<DirectionalLight>,
    pub main: VisibleNodeList,
    pub directional: Option<DirectionalShadow>,
    pub point_shadows: Vec<PointShadow>,
    pub point_lights: Vec<GpuPointLight>,
    pub particles: ParticleBatch,
}

impl CulledViews {
    /// Shadow matrices as laid out for the lighting shaders:
    /// `[0]` is the sun, `[1 + layer]` a point shadow face.
    pub fn shadow_matrices(&self) -> Vec<Mat4> {
        let mut matrices = vec![self
            .directional
            .as_ref()
            .map_or(Mat4::IDENTITY, DirectionalShadow::view_projection)];
        for shadow in &self.point_shadows {
            matrices.extend_from_slice(&shadow.face_view_projections);
        }
        matrices
    }
}

/// Near plane of point shadow cube faces
const POINT_SHADOW_NEAR: f32 = 0.05;

/// Per-view frustum culling with upload-on-miss through a [`ResourceCache`]
#[derive(Debug, Clone)]
pub struct VisibilityCuller {
    max_point_lights: usize,
    max_point_shadows: usize,
    max_particles: usize,
    shadow_distance: f32,
}

impl VisibilityCuller {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            max_point_lights: config.max_point_lights as usize,
            max_point_shadows: config.max_point_shadows as usize,
            max_particles: config.max_particles as usize,
            shadow_distance: config.directional_shadow_distance,
        }
    }

    /// Cull every view of `scene` for a target of `extent` pixels.
    pub fn cull(
        &self,
        scene: &SceneSnapshot,
        cache: &mut impl ResourceCache,
        frame: u64,
        extent: Extent2d,
    ) -> RenderResult<CulledViews> {
        let mut camera = scene.camera.clone();
        camera.set_aspect(extent);
        let view_projection = camera.view_projection_matrix();

        let mut resolver = Resolver {
            cache,
            frame,
            meshes: HashMap::new(),
            materials: HashMap::new(),
        };

        let frustum = Frustum::from_view_projection(&view_projection);
        let mut main = VisibleNodeList::new(ViewKind::Main);
        for instance in &scene.instances {
            if frustum.intersects_aabb(&instance.world_bounds()) {
                main.nodes.push(resolver.node(instance)?);
            }
        }

        let directional = match &scene.directional_light {
            Some(light) if light.casts_shadow => {
                let mut near_camera = camera.clone();
                let far = near_camera.projection.far().min(self.shadow_distance);
                near_camera.projection = with_far(&near_camera.projection, far);
                let (view, projection) = fit_directional(light.direction, &near_camera.view_projection_matrix());
                let light_frustum = Frustum::from_view_projection(&(projection * view));

                let mut casters = VisibleNodeList::new(ViewKind::Directional);
                for instance in scene.instances.iter().filter(|i| casts_shadow(i)) {
                    if light_frustum.intersects_aabb(&instance.world_bounds()) {
                        casters.nodes.push(resolver.node(instance)?);
                    }
                }
                Some(DirectionalShadow {
                    view,
                    projection,
                    casters,
                })
            }
            _ => None,
        };

        let mut point_lights = Vec::new();
        let mut point_shadows = Vec::new();
        if scene.point_lights.len() > self.max_point_lights {
            log::warn!(
                "{} point lights in scene, only the first {} are shaded",
                scene.point_lights.len(),
                self.max_point_lights
            );
        }
        for (index, light) in scene.point_lights.iter().take(self.max_point_lights).enumerate() {
            let shadow_layer = if light.casts_shadow && point_shadows.len() < self.max_point_shadows {
                let first_layer = point_shadows.len() as u32 * 6;
                let mut casters = VisibleNodeList::new(ViewKind::Point(index as u32));
                for instance in scene.instances.iter().filter(|i| casts_shadow(i)) {
                    if instance.world_bounds().intersects_sphere(light.position, light.radius) {
                        casters.nodes.push(resolver.node(instance)?);
                    }
                }
                point_shadows.push(PointShadow {
                    position: light.position,
                    radius: light.radius,
                    first_layer,
                    face_view_projections: cube_face_matrices(light.position, light.radius),
                    casters,
                });
                Some(first_layer)
            } else {
                None
            };
            point_lights.push(GpuPointLight::new(light, shadow_layer));
        }

        let particles = ParticleBatch::gather(&scene.particles, self.max_particles);

        log::trace!(
            "Culled frame {}: {} of {} visible, {} point shadows",
            frame,
            main.len(),
            scene.instances.len(),
            point_shadows.len()
        );

        Ok(CulledViews {
            camera: camera.uniform(extent),
            sun: scene.directional_light.clone(),
            main,
            directional,
            point_shadows,
            point_lights,
            particles,
        })
    }
}

fn casts_shadow(instance: &MeshInstance) -> bool {
    instance.casts_shadow && !instance.material.is_transparent()
}

/// Resolves each asset once per cull, however many views see it
struct Resolver<'a, C: ResourceCache> {
    cache: &'a mut C,
    frame: u64,
    meshes: HashMap<AssetId, MeshHandle>,
    materials: HashMap<AssetId, MaterialHandle>,
}

impl<C: ResourceCache> Resolver<'_, C> {
    fn node(&mut self, instance: &MeshInstance) -> RenderResult<VisibleNode> {
        let mesh = match self.meshes.get(&instance.mesh.id) {
            Some(handle) => *handle,
            None => {
                let handle = self.cache.resolve_mesh(&instance.mesh, self.frame)?;
                self.meshes.insert(instance.mesh.id, handle);
                handle
            }
        };
        let material = match self.materials.get(&instance.material.id) {
            Some(handle) => *handle,
            None => {
                let handle = self.cache.resolve_material(&instance.material, self.frame)?;
                self.materials.insert(instance.material.id, handle);
                handle
            }
        };
        Ok(VisibleNode {
            mesh,
            material,
            transform: instance.transform,
            instance_id: instance.instance_id,
            joints: instance.joints.clone(),
            blend: instance.material.is_transparent(),
        })
    }
}

fn with_far(projection: &crate::scene::Projection, far: f32) -> crate::scene::Projection {
    use crate::scene::Projection;
    match *projection {
        Projection::Perspective { fov_y, aspect, near, .. } => Projection::Perspective {
            fov_y,
            aspect,
            near,
            far,
        },
        Projection::Orthographic {
            half_width,
            half_height,
            near,
            ..
        } => Projection::Orthographic {
            half_width,
            half_height,
            near,
            far,
        },
    }
}

/// Orthographic light view enclosing the bounding sphere of the camera
/// frustum, extended towards the light to catch off-screen casters.
fn fit_directional(direction: Vec3, camera_view_projection: &Mat4) -> (Mat4, Mat4) {
    let corners = Frustum::corners(camera_view_projection);
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let radius = corners
        .iter()
        .map(|c| c.distance(center))
        .fold(0.0f32, f32::max)
        .max(0.01);

    let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let eye = center - direction * (radius * 2.0);
    let view = Mat4::look_at_rh(eye, center, up);
    let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 3.0);
    (view, projection)
}

/// View-projection of each cube face, +X, -X, +Y, -Y, +Z, -Z.
pub fn cube_face_matrices(position: Vec3, radius: f32) -> [Mat4; 6] {
    const FACES: [(Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_Y),
        (Vec3::NEG_Z, Vec3::NEG_Y),
    ];
    let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, POINT_SHADOW_NEAR, radius.max(0.1));
    FACES.map(|(forward, up)| projection * Mat4::look_at_rh(position, position + forward, up))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::resources::{AlphaMode, MaterialData, MeshData, ReleaseToken};
    use crate::scene::{Camera, PointLight};

    /// Cache stand-in that hands out sequential handles
    #[derive(Default)]
    struct CountingCache {
        meshes: HashMap<AssetId, MeshHandle>,
        materials: HashMap<AssetId, MaterialHandle>,
        resolves: usize,
    }

    impl ResourceCache for CountingCache {
        fn resolve_mesh(&mut self, mesh: &Arc<MeshData>, _frame: u64) -> RenderResult<MeshHandle> {
            self.resolves += 1;
            let next = self.meshes.len() as u32;
            Ok(*self.meshes.entry(mesh.id).or_insert(MeshHandle {
                index: next,
                generation: 0,
            }))
        }

        fn resolve_material(&mut self, material: &Arc<MaterialData>, _frame: u64) -> RenderResult<MaterialHandle> {
            self.resolves += 1;
            let next = self.materials.len() as u32;
            Ok(*self.materials.entry(material.id).or_insert(MaterialHandle {
                index: next,
                generation: 0,
            }))
        }

        fn collect_released(&mut self, _completed: Option<u64>) -> Vec<ReleaseToken> {
            Vec::new()
        }
    }

    fn instance_at(id: u32, position: Vec3) -> MeshInstance {
        MeshInstance::new(
            Arc::new(MeshData::cube(AssetId(100))),
            Arc::new(MaterialData::new(AssetId(200), "grey")),
            Mat4::from_translation(position),
            id,
        )
    }

    fn scene() -> SceneSnapshot {
        let mut scene = SceneSnapshot::new(Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO));
        scene.add_instance(instance_at(1, Vec3::ZERO));
        scene.add_instance(instance_at(2, Vec3::new(0.0, 0.0, 50.0)));
        scene.add_instance(instance_at(3, Vec3::new(2.0, 1.0, -3.0)));
        scene
    }

    fn culler() -> VisibilityCuller {
        VisibilityCuller::new(&RendererConfig::default())
    }

    #[test]
    fn test_main_view_membership() {
        let mut cache = CountingCache::default();
        let views = culler().cull(&scene(), &mut cache, 0, Extent2d::new(640, 480)).unwrap();
        // Instance 2 is behind the camera.
        assert_eq!(views.main.instance_ids(), vec![1, 3]);
        assert!(views.directional.is_none());
        assert!(views.point_shadows.is_empty());
    }

    #[test]
    fn test_culling_is_deterministic() {
        let mut cache = CountingCache::default();
        let mut scene = scene();
        scene.set_directional_light(DirectionalLight::default());
        scene.add_point_light(PointLight::new(Vec3::new(0.0, 3.0, 0.0), Vec3::ONE, 5.0, 6.0).with_shadow());

        let first = culler().cull(&scene, &mut cache, 0, Extent2d::new(640, 480)).unwrap();
        scene.instances.reverse();
        let second = culler().cull(&scene, &mut cache, 1, Extent2d::new(640, 480)).unwrap();

        assert_eq!(first.main.instance_ids(), second.main.instance_ids());
        assert_eq!(
            first.directional.as_ref().map(|d| d.casters.instance_ids()),
            second.directional.as_ref().map(|d| d.casters.instance_ids())
        );
        assert_eq!(
            first.point_shadows[0].casters.instance_ids(),
            second.point_shadows[0].casters.instance_ids()
        );
    }

    #[test]
    fn test_assets_resolved_once_per_cull() {
        let mut cache = CountingCache::default();
        let mut scene = scene();
        scene.set_directional_light(DirectionalLight::default());
        culler().cull(&scene, &mut cache, 0, Extent2d::new(640, 480)).unwrap();
        // One mesh and one material shared by every instance and view.
        assert_eq!(cache.resolves, 2);
    }

    #[test]
    fn test_point_shadow_uses_influence_radius() {
        let mut cache = CountingCache::default();
        let mut scene = scene();
        scene.add_point_light(PointLight::new(Vec3::new(0.0, 0.0, 48.0), Vec3::ONE, 1.0, 4.0).with_shadow());
        scene.add_point_light(PointLight::new(Vec3::ZERO, Vec3::ONE, 1.0, 1.0));

        let views = culler().cull(&scene, &mut cache, 0, Extent2d::new(640, 480)).unwrap();
        assert_eq!(views.point_shadows.len(), 1);
        assert_eq!(views.point_shadows[0].casters.instance_ids(), vec![2]);
        assert_eq!(views.point_lights.len(), 2);
        assert_eq!(views.point_lights[0].shadow.x, 0.0);
        assert!(views.point_lights[1].shadow.x < 0.0);
        assert_eq!(views.shadow_matrices().len(), 7);
    }

    #[test]
    fn test_point_shadow_slots_are_limited() {
        let config = RendererConfig {
            max_point_shadows: 1,
            ..Default::default()
        };
        let mut scene = scene();
        for x in 0..3 {
            scene.add_point_light(PointLight::new(Vec3::new(x as f32, 0.0, 0.0), Vec3::ONE, 1.0, 2.0).with_shadow());
        }
        let views = VisibilityCuller::new(&config)
            .cull(&scene, &mut CountingCache::default(), 0, Extent2d::new(64, 64))
            .unwrap();
        assert_eq!(views.point_shadows.len(), 1);
        let layers: Vec<f32> = views.point_lights.iter().map(|l| l.shadow.x).collect();
        assert_eq!(layers, vec![0.0, -1.0, -1.0]);
    }

    #[test]
    fn test_transparent_nodes_do_not_cast() {
        let mut scene = scene();
        let glass = Arc::new(MaterialData::new(AssetId(201), "glass").with_alpha_mode(AlphaMode::Blend));
        scene.instances[0].material = glass;
        scene.set_directional_light(DirectionalLight::default());

        let views = culler()
            .cull(&scene, &mut CountingCache::default(), 0, Extent2d::new(640, 480))
            .unwrap();
        assert_eq!(views.main.transparent().count(), 1);
        let casters = views.directional.unwrap().casters.instance_ids();
        assert!(!casters.contains(&1));
    }

    #[test]
    fn test_directional_fit_contains_camera_frustum() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO);
        let (view, projection) = fit_directional(Vec3::new(-0.3, -1.0, -0.2), &camera.view_projection_matrix());
        let light = Frustum::from_view_projection(&(projection * view));
        for corner in Frustum::corners(&camera.view_projection_matrix()) {
            assert!(light.intersects_sphere(corner, 1e-3));
        }
    }

    #[test]
    fn test_cube_faces_look_along_axes() {
        let faces = cube_face_matrices(Vec3::ZERO, 10.0);
        let ahead = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (matrix, direction) in faces.iter().zip(ahead) {
            let ndc = matrix.project_point3(direction * 5.0);
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn test_resolve_errors_propagate() {
        struct Failing;
        impl ResourceCache for Failing {
            fn resolve_mesh(&mut self, _: &Arc<MeshData>, _: u64) -> RenderResult<MeshHandle> {
                Err(RenderError::OutOfMemory)
            }
            fn resolve_material(&mut self, _: &Arc<MaterialData>, _: u64) -> RenderResult<MaterialHandle> {
                Err(RenderError::OutOfMemory)
            }
            fn collect_released(&mut self, _: Option<u64>) -> Vec<ReleaseToken> {
                Vec::new()
            }
        }
        let result = culler().cull(&scene(), &mut Failing, 0, Extent2d::new(64, 64));
        assert_eq!(result.unwrap_err(), RenderError::OutOfMemory);
    }
}
