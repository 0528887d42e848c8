//! Instanced draw batching.
//!
//! Visible nodes are grouped by material, then by mesh. Each (material, mesh)
//! pair becomes one instanced draw; groups larger than the per-draw cap spill
//! into further draws. Instance data for every view of a frame is appended to
//! one [`InstanceStream`] and draws address it through `first_instance`.

use std::collections::BTreeMap;

use glam::Mat4;

use super::VisibleNode;
use crate::backend::InstanceData;
use crate::error::{RenderError, RenderResult};
use crate::resources::{MaterialHandle, MeshHandle};

/// One instanced draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBatch {
    pub material: MaterialHandle,
    pub mesh: MeshHandle,
    /// Index of the first instance in the frame's instance stream
    pub first_instance: u32,
    pub instance_count: u32,
}

/// Per-frame instance and joint arrays, bounded by the configured limits
#[derive(Debug, Default)]
pub struct InstanceStream {
    instances: Vec<InstanceData>,
    joints: Vec<Mat4>,
    max_instances: u32,
    max_joints: u32,
}

impl InstanceStream {
    pub fn new(max_instances: u32, max_joints: u32) -> Self {
        Self {
            instances: Vec::new(),
            joints: Vec::new(),
            max_instances,
            max_joints,
        }
    }

    pub fn instances(&self) -> &[InstanceData] {
        &self.instances
    }

    pub fn joints(&self) -> &[Mat4] {
        &self.joints
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Append one node and return its instance index.
    pub fn push(&mut self, node: &VisibleNode) -> RenderResult<u32> {
        if self.instances.len() as u32 >= self.max_instances {
            return Err(RenderError::capacity(
                "instances",
                self.instances.len() as u64 + 1,
                self.max_instances as u64,
            ));
        }

        let (joint_offset, joint_count) = match &node.joints {
            Some(joints) if !joints.is_empty() => {
                let offset = self.joints.len() as u32;
                let requested = offset as u64 + joints.len() as u64;
                if requested > self.max_joints as u64 {
                    return Err(RenderError::capacity("joint matrices", requested, self.max_joints as u64));
                }
                self.joints.extend_from_slice(joints);
                (offset, joints.len() as u32)
            }
            _ => (0, 0),
        };

        let index = self.instances.len() as u32;
        self.instances.push(InstanceData {
            model: node.transform,
            normal_matrix: node.transform.inverse().transpose(),
            instance_id: node.instance_id,
            joint_offset,
            joint_count,
            _padding: 0,
        });
        Ok(index)
    }
}

/// Group `nodes` into instanced draws and append their instances to `stream`.
///
/// Output order is deterministic: by material handle, then mesh handle.
pub fn build_batches<'a>(
    nodes: impl IntoIterator<Item = &'a VisibleNode>,
    max_instances_per_draw: u32,
    stream: &mut InstanceStream,
) -> RenderResult<Vec<DrawBatch>> {
    let mut groups: BTreeMap<MaterialHandle, BTreeMap<MeshHandle, Vec<&VisibleNode>>> = BTreeMap::new();
    for node in nodes {
        groups
            .entry(node.material)
            .or_default()
            .entry(node.mesh)
            .or_default()
            .push(node);
    }

    let cap = max_instances_per_draw.max(1) as usize;
    let mut batches = Vec::new();
    for (material, meshes) in groups {
        for (mesh, nodes) in meshes {
            for chunk in nodes.chunks(cap) {
                let mut first_instance = None;
                for node in chunk {
                    let index = stream.push(node)?;
                    first_instance.get_or_insert(index);
                }
                if let Some(first_instance) = first_instance {
                    batches.push(DrawBatch {
                        material,
                        mesh,
                        first_instance,
                        instance_count: chunk.len() as u32,
                    });
                }
            }
        }
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use rstest::rstest;
    use std::sync::Arc;

    fn mesh(index: u32) -> MeshHandle {
        MeshHandle { index, generation: 0 }
    }

    fn material(index: u32) -> MaterialHandle {
        MaterialHandle { index, generation: 0 }
    }

    fn node(material_index: u32, mesh_index: u32, id: u32) -> VisibleNode {
        VisibleNode {
            mesh: mesh(mesh_index),
            material: material(material_index),
            transform: Mat4::from_translation(Vec3::new(id as f32, 0.0, 0.0)),
            instance_id: id,
            joints: None,
            blend: false,
        }
    }

    #[test]
    fn test_groups_by_material_then_mesh() {
        let nodes = vec![node(1, 0, 1), node(0, 1, 2), node(0, 0, 3), node(0, 1, 4), node(1, 0, 5)];
        let mut stream = InstanceStream::new(64, 64);
        let batches = build_batches(&nodes, 16, &mut stream).unwrap();

        let keys: Vec<_> = batches.iter().map(|b| (b.material.index, b.mesh.index, b.instance_count)).collect();
        assert_eq!(keys, vec![(0, 0, 1), (0, 1, 2), (1, 0, 2)]);

        // Instances of one batch are contiguous in the stream.
        let ids: Vec<u32> = stream.instances().iter().map(|i| i.instance_id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1, 5]);
        assert_eq!(batches[1].first_instance, 1);
    }

    #[rstest]
    #[case::under_cap(5, 8, vec![5])]
    #[case::exact(8, 8, vec![8])]
    #[case::spill(10, 4, vec![4, 4, 2])]
    #[case::single(3, 1, vec![1, 1, 1])]
    fn test_instance_cap_spills(#[case] count: u32, #[case] cap: u32, #[case] expected: Vec<u32>) {
        let nodes: Vec<_> = (0..count).map(|i| node(0, 0, i + 1)).collect();
        let mut stream = InstanceStream::new(64, 64);
        let batches = build_batches(&nodes, cap, &mut stream).unwrap();
        let counts: Vec<u32> = batches.iter().map(|b| b.instance_count).collect();
        assert_eq!(counts, expected);

        let mut next = 0;
        for batch in &batches {
            assert_eq!(batch.first_instance, next);
            next += batch.instance_count;
        }
    }

    #[test]
    fn test_instance_limit_is_fatal() {
        let nodes: Vec<_> = (0..5).map(|i| node(0, 0, i + 1)).collect();
        let mut stream = InstanceStream::new(4, 64);
        let err = build_batches(&nodes, 8, &mut stream).unwrap_err();
        assert!(matches!(err, RenderError::CapacityExceeded { resource: "instances", .. }));
    }

    #[test]
    fn test_joints_are_appended_per_instance() {
        let joints: Arc<[Mat4]> = Arc::from(vec![Mat4::IDENTITY; 3]);
        let mut skinned = node(0, 0, 1);
        skinned.joints = Some(Arc::clone(&joints));
        let nodes = vec![skinned.clone(), node(0, 0, 2), skinned];

        let mut stream = InstanceStream::new(8, 8);
        build_batches(&nodes, 8, &mut stream).unwrap();
        let offsets: Vec<(u32, u32)> = stream
            .instances()
            .iter()
            .map(|i| (i.joint_offset, i.joint_count))
            .collect();
        assert_eq!(offsets, vec![(0, 3), (0, 0), (3, 3)]);
        assert_eq!(stream.joints().len(), 6);

        let mut small = InstanceStream::new(8, 4);
        let err = build_batches(&nodes, 8, &mut small).unwrap_err();
        assert!(matches!(err, RenderError::CapacityExceeded { resource: "joint matrices", .. }));
    }
}
