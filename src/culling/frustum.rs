//! View frustums and bounding volumes.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point; `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Box enclosing this box after `transform`.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        let center = transform.transform_point3(self.center());
        let half = self.half_extents();
        let x = transform.x_axis.xyz().abs() * half.x;
        let y = transform.y_axis.xyz().abs() * half.y;
        let z = transform.z_axis.xyz().abs() * half.z;
        let extent = x + y + z;
        Aabb {
            min: center - extent,
            max: center + extent,
        }
    }

    /// Whether the box touches a sphere.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }
}

/// Six inward-facing planes, `xyz = normal`, `w = distance`
///
/// Extracted from a view-projection matrix with a 0..1 depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_projection(m: &Mat4) -> Self {
        let row0 = m.row(0);
        let row1 = m.row(1);
        let row2 = m.row(2);
        let row3 = m.row(3);

        let planes = [
            row3 + row0, // left
            row3 - row0, // right
            row3 + row1, // bottom
            row3 - row1, // top
            row2,        // near
            row3 - row2, // far
        ]
        .map(|plane| {
            let length = plane.xyz().length();
            if length > f32::EPSILON {
                plane / length
            } else {
                plane
            }
        });

        Self { planes }
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    /// Conservative box test: the box is culled only when it lies entirely
    /// behind one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();
        self.planes.iter().all(|plane| {
            let normal = plane.xyz();
            let radius = half.dot(normal.abs());
            normal.dot(center) + plane.w >= -radius
        })
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.xyz().dot(center) + plane.w >= -radius)
    }

    /// World-space corners of a view-projection volume: near face first.
    pub fn corners(view_projection: &Mat4) -> [Vec3; 8] {
        let inverse = view_projection.inverse();
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        for z in [0.0, 1.0] {
            for y in [-1.0, 1.0] {
                for x in [-1.0, 1.0] {
                    corners[i] = inverse.project_point3(Vec3::new(x, y, z));
                    i += 1;
                }
            }
        }
        corners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn camera_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        Frustum::from_view_projection(&(proj * view))
    }

    fn unit_box_at(center: Vec3) -> Aabb {
        Aabb::new(center - Vec3::splat(0.5), center + Vec3::splat(0.5))
    }

    #[rstest]
    #[case::center(Vec3::ZERO, true)]
    #[case::behind_camera(Vec3::new(0.0, 0.0, 10.0), false)]
    #[case::far_left(Vec3::new(-50.0, 0.0, 0.0), false)]
    #[case::beyond_far(Vec3::new(0.0, 0.0, -200.0), false)]
    #[case::straddling_edge(Vec3::new(3.2, 0.0, 0.0), true)]
    fn test_aabb_culling(#[case] center: Vec3, #[case] visible: bool) {
        assert_eq!(camera_frustum().intersects_aabb(&unit_box_at(center)), visible);
    }

    #[test]
    fn test_sphere_culling() {
        let frustum = camera_frustum();
        assert!(frustum.intersects_sphere(Vec3::ZERO, 1.0));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 20.0), 1.0));
    }

    #[test]
    fn test_transformed_box_encloses_rotation() {
        let aabb = unit_box_at(Vec3::ZERO);
        let rotated = aabb.transformed(&Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4));
        let expected = (2.0f32).sqrt() * 0.5;
        assert!((rotated.max.x - expected).abs() < 1e-5);
        assert!((rotated.max.y - 0.5).abs() < 1e-5);

        let moved = aabb.transformed(&Mat4::from_translation(Vec3::X * 3.0));
        assert_eq!(moved.center(), Vec3::X * 3.0);
    }

    #[test]
    fn test_box_sphere_intersection() {
        let aabb = unit_box_at(Vec3::ZERO);
        assert!(aabb.intersects_sphere(Vec3::new(1.0, 0.0, 0.0), 0.6));
        assert!(!aabb.intersects_sphere(Vec3::new(2.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn test_corners_of_ortho_volume() {
        let ortho = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 0.0, 10.0);
        let corners = Frustum::corners(&ortho);
        assert!(corners[0].abs_diff_eq(Vec3::new(-1.0, -1.0, 0.0), 1e-5));
        assert!(corners[7].abs_diff_eq(Vec3::new(1.0, 1.0, -10.0), 1e-5));
    }
}
