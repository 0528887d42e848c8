//! GPU-resident asset cache
//!
//! Meshes, materials and textures arrive decoded from the asset layer and are
//! uploaded on first use. The render graph refers to them through
//! generational arena handles rather than pointers: a handle stays valid for
//! the whole frame it was resolved in, and eviction only happens between
//! frames, for entries whose last use the GPU has finished.
//!
//! Once the frame that uploaded an asset completes, a [`ReleaseToken`] is
//! handed back so the asset layer can drop its CPU copy.

mod cache;
mod material;
mod mesh;
mod texture;

pub use cache::{CacheStats, GpuMaterial, GpuMesh, GpuResourceCache};
pub use material::*;
pub use mesh::*;
pub use texture::*;

use std::sync::Arc;

use crate::error::RenderResult;

/// Stable identity of a CPU-side asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u64);

/// Kind of asset a release token refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetKind {
    Mesh,
    Material,
    Texture,
}

/// The GPU copy of an asset is complete; the CPU copy may be reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseToken {
    pub asset: AssetId,
    pub kind: AssetKind,
}

/// Handle to a resident mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Handle to a resident material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Upload-on-miss lookup used by the culler
pub trait ResourceCache {
    fn resolve_mesh(&mut self, mesh: &Arc<MeshData>, frame: u64) -> RenderResult<MeshHandle>;

    fn resolve_material(&mut self, material: &Arc<MaterialData>, frame: u64) -> RenderResult<MaterialHandle>;

    /// Tokens for uploads whose frame is known complete
    fn collect_released(&mut self, completed_frame: Option<u64>) -> Vec<ReleaseToken>;
}
