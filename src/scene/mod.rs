//! Scene snapshot consumed by the renderer
//!
//! The scene graph itself lives outside this crate; it hands over a snapshot of
//! world-space instances, the camera and lights each frame.

mod camera;
mod light;
mod particles;

pub use camera::*;
pub use light::*;
pub use particles::*;

use std::sync::Arc;

use glam::Mat4;
use parking_lot::Mutex;

use crate::culling::Aabb;
use crate::resources::{MaterialData, MeshData};

/// Instance id that marks "nothing" in the pick buffer
pub const NO_INSTANCE: u32 = 0;

/// One mesh placed in the world
#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub mesh: Arc<MeshData>,
    pub material: Arc<MaterialData>,
    pub transform: Mat4,
    /// Returned by picking; [`NO_INSTANCE`] is reserved
    pub instance_id: u32,
    /// Skinning matrices computed by the animation system
    pub joints: Option<Arc<[Mat4]>>,
    pub casts_shadow: bool,
}

impl MeshInstance {
    pub fn new(mesh: Arc<MeshData>, material: Arc<MaterialData>, transform: Mat4, instance_id: u32) -> Self {
        Self {
            mesh,
            material,
            transform,
            instance_id,
            joints: None,
            casts_shadow: true,
        }
    }

    pub fn with_joints(mut self, joints: Arc<[Mat4]>) -> Self {
        self.joints = Some(joints);
        self
    }

    pub fn without_shadow(mut self) -> Self {
        self.casts_shadow = false;
        self
    }

    /// Mesh bounds moved into world space
    pub fn world_bounds(&self) -> Aabb {
        self.mesh.bounds.transformed(&self.transform)
    }
}

/// Everything the renderer reads from the scene for one frame
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    pub camera: Camera,
    pub instances: Vec<MeshInstance>,
    pub directional_light: Option<DirectionalLight>,
    pub point_lights: Vec<PointLight>,
    pub particles: Vec<SharedParticles>,
}

impl SceneSnapshot {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            ..Default::default()
        }
    }

    pub fn add_instance(&mut self, instance: MeshInstance) {
        self.instances.push(instance);
    }

    pub fn add_point_light(&mut self, light: PointLight) {
        self.point_lights.push(light);
    }

    pub fn set_directional_light(&mut self, light: DirectionalLight) {
        self.directional_light = Some(light);
    }
}

/// Scene guarded by the coarse lock held for culling and upload
pub type SharedScene = Arc<Mutex<SceneSnapshot>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::AssetId;
    use glam::Vec3;

    #[test]
    fn test_world_bounds_follow_transform() {
        let instance = MeshInstance::new(
            Arc::new(MeshData::cube(AssetId(1))),
            Arc::new(MaterialData::new(AssetId(2), "grey")),
            Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            7,
        );
        let bounds = instance.world_bounds();
        assert!((bounds.center() - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);
        assert!(instance.casts_shadow);
        assert!(!instance.clone().without_shadow().casts_shadow);
    }
}
