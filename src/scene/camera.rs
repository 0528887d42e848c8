//! Camera system

use glam::{Mat4, Vec3, Vec4};

use crate::backend::{CameraUniform, Extent2d};

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        half_width: f32,
        half_height: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        Projection::Orthographic {
            half_width: width / 2.0,
            half_height: height / 2.0,
            near,
            far,
        }
    }

    /// Depth range 0..1, right-handed
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                half_width,
                half_height,
                near,
                far,
            } => Mat4::orthographic_rh(-half_width, half_width, -half_height, half_height, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => *far,
        }
    }

    pub fn set_aspect(&mut self, new_aspect: f32) {
        match self {
            Projection::Perspective { aspect, .. } => *aspect = new_aspect,
            Projection::Orthographic {
                half_width,
                half_height,
                ..
            } => *half_width = *half_height * new_aspect,
        }
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Build camera uniform data for a target of `extent` pixels
    pub fn uniform(&self, extent: Extent2d) -> CameraUniform {
        CameraUniform::new(
            self.view_matrix(),
            self.projection_matrix(),
            self.position,
            self.projection.near(),
            self.projection.far(),
            extent,
        )
    }

    pub fn set_aspect(&mut self, extent: Extent2d) {
        if !extent.is_empty() {
            self.projection.set_aspect(extent.aspect());
        }
    }
}

impl CameraUniform {
    pub fn new(view: Mat4, proj: Mat4, position: Vec3, near: f32, far: f32, extent: Extent2d) -> Self {
        let width = extent.width.max(1) as f32;
        let height = extent.height.max(1) as f32;
        Self {
            view,
            proj,
            view_proj: proj * view,
            inv_view: view.inverse(),
            inv_proj: proj.inverse(),
            position: position.extend(1.0),
            near_far: Vec4::new(near, far, 0.0, 0.0),
            viewport: Vec4::new(width, height, 1.0 / width, 1.0 / height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_projects_to_screen_center() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let clip = camera.view_projection_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_uniform_viewport() {
        let uniform = Camera::default().uniform(Extent2d::new(200, 100));
        assert_eq!(uniform.viewport, Vec4::new(200.0, 100.0, 0.005, 0.01));
        assert!((uniform.inv_proj * uniform.proj).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_set_aspect_ignores_empty_extent() {
        let mut camera = Camera::default();
        camera.set_aspect(Extent2d::new(0, 0));
        assert_eq!(camera.projection, Projection::default());
        camera.set_aspect(Extent2d::new(100, 100));
        assert!(matches!(camera.projection, Projection::Perspective { aspect, .. } if aspect == 1.0));
    }
}
