//! Decoded mesh data and simple generated shapes

use glam::{Vec2, Vec3, Vec4};

use super::AssetId;
use crate::backend::Vertex;
use crate::culling::Aabb;

/// A decoded mesh, ready for upload
#[derive(Debug, Clone)]
pub struct MeshData {
    pub id: AssetId,
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Object-space bounds
    pub bounds: Aabb,
}

impl MeshData {
    pub fn new(id: AssetId, name: &str, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let bounds = Aabb::from_points(vertices.iter().map(|v| v.position))
            .unwrap_or(Aabb::new(Vec3::ZERO, Vec3::ZERO));
        Self {
            id,
            name: name.to_string(),
            vertices,
            indices,
            bounds,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Unit cube centered at the origin
    pub fn cube(id: AssetId) -> Self {
        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent) in faces {
            let bitangent = normal.cross(tangent);
            let base = vertices.len() as u32;
            for (u, v) in [(0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)] {
                let position = normal * 0.5 + tangent * (u - 0.5) + bitangent * (0.5 - v);
                let mut vertex = Vertex::new(position, normal, Vec2::new(u, v));
                vertex.tangent = tangent.extend(1.0);
                vertices.push(vertex);
            }
            // Counter-clockwise seen from outside
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(id, "cube", vertices, indices)
    }

    /// Plane on the XZ axis facing +Y
    pub fn plane(id: AssetId, width: f32, depth: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.max(1);
        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        let mut vertices = Vec::new();
        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let position = Vec3::new(-half_width + x as f32 * step_x, 0.0, -half_depth + z as f32 * step_z);
                let uv = Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32);
                let mut vertex = Vertex::new(position, Vec3::Y, uv);
                vertex.tangent = Vec4::new(1.0, 0.0, 0.0, 1.0);
                vertices.push(vertex);
            }
        }

        let mut indices = Vec::new();
        let row = subdivisions + 1;
        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * row + x;
                let next = current + row;
                indices.extend_from_slice(&[current, next, current + 1, current + 1, next, next + 1]);
            }
        }

        Self::new(id, "plane", vertices, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_bounds_and_winding() {
        let cube = MeshData::cube(AssetId(1));
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);
        assert_eq!(cube.bounds.min, Vec3::splat(-0.5));
        assert_eq!(cube.bounds.max, Vec3::splat(0.5));

        // Every triangle faces along its vertex normal.
        for triangle in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[triangle[i] as usize]);
            let face = (b.position - a.position).cross(c.position - a.position);
            assert!(face.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn test_plane_counts() {
        let plane = MeshData::plane(AssetId(2), 10.0, 10.0, 2);
        assert_eq!(plane.vertices.len(), 9);
        assert_eq!(plane.triangle_count(), 8);
        assert_eq!(plane.bounds.max, Vec3::new(5.0, 0.0, 5.0));
    }
}
