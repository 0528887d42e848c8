use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::{
    defaults, AssetId, AssetKind, MaterialData, MaterialHandle, MeshData, MeshHandle, ReleaseToken, ResourceCache,
    TextureData,
};
use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite, GpuDevice, MemoryLocation, Owned, OwnedExt, SamplerHandle, TextureDescriptor, TextureFormat,
    TextureHandle, TextureRegion, TextureUsage,
};
use crate::culling::Aabb;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::uniforms::MaterialUniform;

struct Slot<T> {
    generation: u32,
    entry: Option<T>,
}

/// Slot arena with generation-checked indices
struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    fn insert(&mut self, value: T) -> (u32, u32) {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(value);
            return (index, slot.generation);
        }
        self.slots.push(Slot {
            generation: 0,
            entry: Some(value),
        });
        ((self.slots.len() - 1) as u32, 0)
    }

    fn get(&self, index: u32, generation: u32) -> Option<&T> {
        self.slots
            .get(index as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.entry.as_ref())
    }

    fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        self.slots
            .get_mut(index as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.entry.as_mut())
    }

    fn remove(&mut self, index: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        let value = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.entry.as_ref().map(|e| (i as u32, e)))
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// A mesh resident in device memory
pub struct GpuMesh<D: GpuDevice> {
    pub asset: AssetId,
    pub vertex_buffer: Owned<D, BufferHandle>,
    pub index_buffer: Owned<D, BufferHandle>,
    pub vertex_count: u32,
    pub index_count: u32,
    pub bounds: Aabb,
    last_used: u64,
}

/// A material with its descriptor set
pub struct GpuMaterial<D: GpuDevice> {
    pub asset: AssetId,
    pub set: Owned<D, DescriptorSetHandle>,
    pub transparent: bool,
    // Kept alive for the descriptor set
    _uniform: Owned<D, BufferHandle>,
    textures: Vec<AssetId>,
    last_used: u64,
}

struct GpuTexture<D: GpuDevice> {
    texture: Owned<D, TextureHandle>,
    last_used: u64,
}

struct DefaultTextures<D: GpuDevice> {
    white_srgb: Owned<D, TextureHandle>,
    white_linear: Owned<D, TextureHandle>,
    flat_normal: Owned<D, TextureHandle>,
}

/// Resident counts and lifetime totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub meshes: usize,
    pub materials: usize,
    pub textures: usize,
    pub uploads: u64,
    pub evictions: u64,
}

/// Device-backed [`ResourceCache`]
pub struct GpuResourceCache<D: GpuDevice> {
    device: Arc<D>,
    meshes: Arena<GpuMesh<D>>,
    mesh_lookup: HashMap<AssetId, MeshHandle>,
    materials: Arena<GpuMaterial<D>>,
    material_lookup: HashMap<AssetId, MaterialHandle>,
    textures: HashMap<AssetId, GpuTexture<D>>,
    defaults: DefaultTextures<D>,
    material_layout: DescriptorSetLayoutHandle,
    sampler: SamplerHandle,
    max_materials: usize,
    eviction_age: u64,
    pending_release: VecDeque<(u64, ReleaseToken)>,
    uploads: u64,
    evictions: u64,
}

impl<D: GpuDevice> GpuResourceCache<D> {
    pub fn new(
        device: &Arc<D>,
        material_layout: DescriptorSetLayoutHandle,
        sampler: SamplerHandle,
        max_materials: u32,
        eviction_age: u64,
    ) -> RenderResult<Self> {
        let defaults = DefaultTextures {
            white_srgb: upload_texture(device, &TextureData::solid(AssetId(0), defaults::WHITE, true), "Default White")?,
            white_linear: upload_texture(
                device,
                &TextureData::solid(AssetId(0), defaults::WHITE, false),
                "Default White Linear",
            )?,
            flat_normal: upload_texture(
                device,
                &TextureData::solid(AssetId(0), defaults::FLAT_NORMAL, false),
                "Default Normal",
            )?,
        };

        Ok(Self {
            device: Arc::clone(device),
            meshes: Arena::new(),
            mesh_lookup: HashMap::new(),
            materials: Arena::new(),
            material_lookup: HashMap::new(),
            textures: HashMap::new(),
            defaults,
            material_layout,
            sampler,
            max_materials: max_materials as usize,
            eviction_age,
            pending_release: VecDeque::new(),
            uploads: 0,
            evictions: 0,
        })
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&GpuMesh<D>> {
        self.meshes.get(handle.index, handle.generation)
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&GpuMaterial<D>> {
        self.materials.get(handle.index, handle.generation)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            meshes: self.meshes.len(),
            materials: self.materials.len(),
            textures: self.textures.len(),
            uploads: self.uploads,
            evictions: self.evictions,
        }
    }

    /// Drop entries unused for the eviction age whose last use has completed.
    ///
    /// Must be called between frames; handles of evicted entries go stale.
    pub fn evict(&mut self, current_frame: u64, completed_frame: Option<u64>) -> usize {
        let Some(completed) = completed_frame else {
            return 0;
        };
        let expired = |last_used: u64| last_used <= completed && last_used + self.eviction_age < current_frame;

        let stale_meshes: Vec<u32> = self
            .meshes
            .iter()
            .filter(|(_, m)| expired(m.last_used))
            .map(|(i, _)| i)
            .collect();
        let stale_materials: Vec<u32> = self
            .materials
            .iter()
            .filter(|(_, m)| expired(m.last_used))
            .map(|(i, _)| i)
            .collect();

        let mut evicted = 0;
        for index in stale_meshes {
            if let Some(mesh) = self.meshes.remove(index) {
                self.mesh_lookup.remove(&mesh.asset);
                log::debug!("Evicted mesh {:?}", mesh.asset);
                evicted += 1;
            }
        }
        for index in stale_materials {
            if let Some(material) = self.materials.remove(index) {
                self.material_lookup.remove(&material.asset);
                log::debug!("Evicted material {:?}", material.asset);
                evicted += 1;
            }
        }

        // Textures go once no resident material samples them.
        let referenced: std::collections::HashSet<AssetId> = self
            .materials
            .iter()
            .flat_map(|(_, m)| m.textures.iter().copied())
            .collect();
        let before = self.textures.len();
        self.textures
            .retain(|id, texture| referenced.contains(id) || texture.last_used > completed);
        evicted += before - self.textures.len();

        self.evictions += evicted as u64;
        evicted
    }

    fn resolve_texture(&mut self, texture: &Arc<TextureData>, frame: u64) -> RenderResult<TextureHandle> {
        if let Some(resident) = self.textures.get_mut(&texture.id) {
            resident.last_used = frame;
            return Ok(resident.texture.handle());
        }
        let owned = upload_texture(&self.device, texture, &format!("Texture {}", texture.id.0))?;
        let handle = owned.handle();
        self.textures.insert(
            texture.id,
            GpuTexture {
                texture: owned,
                last_used: frame,
            },
        );
        self.uploads += 1;
        self.pending_release.push_back((
            frame,
            ReleaseToken {
                asset: texture.id,
                kind: AssetKind::Texture,
            },
        ));
        Ok(handle)
    }

    fn upload_mesh(&self, mesh: &MeshData) -> RenderResult<GpuMesh<D>> {
        if mesh.indices.is_empty() || mesh.vertices.is_empty() {
            return Err(RenderError::ResourceCreationFailed(format!(
                "mesh '{}' has no geometry",
                mesh.name
            )));
        }
        if let Some(bad) = mesh.indices.iter().find(|i| **i as usize >= mesh.vertices.len()) {
            return Err(RenderError::ResourceCreationFailed(format!(
                "mesh '{}' index {} out of range",
                mesh.name, bad
            )));
        }

        let vertex_buffer = self.device.owned_buffer(&BufferDescriptor {
            label: format!("{} Vertices", mesh.name),
            size: mesh.vertex_bytes().len() as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            location: MemoryLocation::DeviceLocal,
        })?;
        self.device.write_buffer(vertex_buffer.handle(), 0, mesh.vertex_bytes())?;

        let index_buffer = self.device.owned_buffer(&BufferDescriptor {
            label: format!("{} Indices", mesh.name),
            size: mesh.index_bytes().len() as u64,
            usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            location: MemoryLocation::DeviceLocal,
        })?;
        self.device.write_buffer(index_buffer.handle(), 0, mesh.index_bytes())?;

        Ok(GpuMesh {
            asset: mesh.id,
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.index_count(),
            bounds: mesh.bounds,
            last_used: 0,
        })
    }
}

impl<D: GpuDevice> ResourceCache for GpuResourceCache<D> {
    fn resolve_mesh(&mut self, mesh: &Arc<MeshData>, frame: u64) -> RenderResult<MeshHandle> {
        if let Some(handle) = self.mesh_lookup.get(&mesh.id).copied() {
            if let Some(resident) = self.meshes.get_mut(handle.index, handle.generation) {
                resident.last_used = frame;
                return Ok(handle);
            }
        }

        let mut gpu = self.upload_mesh(mesh)?;
        gpu.last_used = frame;
        let (index, generation) = self.meshes.insert(gpu);
        let handle = MeshHandle { index, generation };
        self.mesh_lookup.insert(mesh.id, handle);
        self.uploads += 1;
        self.pending_release.push_back((
            frame,
            ReleaseToken {
                asset: mesh.id,
                kind: AssetKind::Mesh,
            },
        ));
        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} indices)",
            mesh.name,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(handle)
    }

    fn resolve_material(&mut self, material: &Arc<MaterialData>, frame: u64) -> RenderResult<MaterialHandle> {
        if let Some(handle) = self.material_lookup.get(&material.id).copied() {
            if let Some(resident) = self.materials.get_mut(handle.index, handle.generation) {
                resident.last_used = frame;
                for id in &resident.textures {
                    if let Some(texture) = self.textures.get_mut(id) {
                        texture.last_used = frame;
                    }
                }
                return Ok(handle);
            }
        }

        if self.materials.len() >= self.max_materials {
            return Err(RenderError::capacity(
                "materials",
                self.materials.len() as u64 + 1,
                self.max_materials as u64,
            ));
        }

        let fallbacks = [
            self.defaults.white_srgb.handle(),
            self.defaults.flat_normal.handle(),
            self.defaults.white_linear.handle(),
            self.defaults.white_linear.handle(),
            self.defaults.white_srgb.handle(),
        ];
        let mut bound = fallbacks;
        let mut texture_ids = Vec::new();
        for (slot, texture) in material.textures.slots().into_iter().enumerate() {
            if let Some(texture) = texture {
                bound[slot] = self.resolve_texture(texture, frame)?;
                texture_ids.push(texture.id);
            }
        }

        let uniform_data = material.uniform();
        let uniform = self.device.owned_buffer(&BufferDescriptor {
            label: format!("{} Material", material.name),
            size: std::mem::size_of::<MaterialUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            location: MemoryLocation::DeviceLocal,
        })?;
        self.device
            .write_buffer(uniform.handle(), 0, bytemuck::bytes_of(&uniform_data))?;

        let mut writes = vec![
            DescriptorWrite {
                binding: 0,
                resource: DescriptorResource::Buffer {
                    buffer: uniform.handle(),
                    offset: 0,
                    size: std::mem::size_of::<MaterialUniform>() as u64,
                },
            },
            DescriptorWrite {
                binding: 1,
                resource: DescriptorResource::Sampler(self.sampler),
            },
        ];
        writes.extend(bound.iter().enumerate().map(|(i, texture)| DescriptorWrite {
            binding: 2 + i as u32,
            resource: DescriptorResource::Texture(*texture),
        }));
        let set = self.device.owned_descriptor_set(self.material_layout, &writes)?;

        let (index, generation) = self.materials.insert(GpuMaterial {
            asset: material.id,
            set,
            transparent: material.is_transparent(),
            _uniform: uniform,
            textures: texture_ids,
            last_used: frame,
        });
        let handle = MaterialHandle { index, generation };
        self.material_lookup.insert(material.id, handle);
        self.uploads += 1;
        self.pending_release.push_back((
            frame,
            ReleaseToken {
                asset: material.id,
                kind: AssetKind::Material,
            },
        ));
        log::debug!("Uploaded material '{}'", material.name);
        Ok(handle)
    }

    fn collect_released(&mut self, completed_frame: Option<u64>) -> Vec<ReleaseToken> {
        let Some(completed) = completed_frame else {
            return Vec::new();
        };
        let mut released = Vec::new();
        while let Some((frame, token)) = self.pending_release.front().copied() {
            if frame > completed {
                break;
            }
            self.pending_release.pop_front();
            released.push(token);
        }
        released
    }
}

fn upload_texture<D: GpuDevice>(
    device: &Arc<D>,
    texture: &TextureData,
    label: &str,
) -> RenderResult<Owned<D, TextureHandle>> {
    if !texture.is_valid() {
        return Err(RenderError::ResourceCreationFailed(format!(
            "texture '{}' is {}x{} with {} bytes",
            label,
            texture.width,
            texture.height,
            texture.pixels.len()
        )));
    }
    let owned = device.owned_texture(&TextureDescriptor {
        label: label.to_string(),
        width: texture.width,
        height: texture.height,
        layers: 1,
        format: if texture.srgb {
            TextureFormat::Rgba8UnormSrgb
        } else {
            TextureFormat::Rgba8Unorm
        },
        usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
    })?;
    device.write_texture(
        owned.handle(),
        TextureRegion::full(texture.width, texture.height),
        &texture.pixels,
    )?;
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessDevice, HeadlessOptions, SamplerDescriptor};
    use crate::pipeline::layouts::material_layout_descriptor;
    use rstest::{fixture, rstest};

    struct Fixture {
        device: Arc<HeadlessDevice>,
        cache: GpuResourceCache<HeadlessDevice>,
        _layout: Owned<HeadlessDevice, DescriptorSetLayoutHandle>,
        _sampler: Owned<HeadlessDevice, SamplerHandle>,
    }

    fn build(max_materials: u32) -> Fixture {
        let device = Arc::new(HeadlessDevice::new(HeadlessOptions::default()));
        let layout = device.owned_set_layout(&material_layout_descriptor()).unwrap();
        let sampler = device.owned_sampler(&SamplerDescriptor::default()).unwrap();
        let cache = GpuResourceCache::new(&device, layout.handle(), sampler.handle(), max_materials, 10).unwrap();
        Fixture {
            device,
            cache,
            _layout: layout,
            _sampler: sampler,
        }
    }

    #[fixture]
    fn fixture() -> Fixture {
        build(4)
    }

    #[rstest]
    fn test_mesh_upload_on_miss_only(mut fixture: Fixture) {
        let mesh = Arc::new(MeshData::cube(AssetId(1)));
        let first = fixture.cache.resolve_mesh(&mesh, 0).unwrap();
        let second = fixture.cache.resolve_mesh(&mesh, 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(fixture.cache.stats().uploads, 1);
        assert_eq!(fixture.cache.mesh(first).unwrap().index_count, 36);
    }

    #[rstest]
    fn test_release_tokens_wait_for_completion(mut fixture: Fixture) {
        let mesh = Arc::new(MeshData::cube(AssetId(1)));
        let material = Arc::new(MaterialData::new(AssetId(2), "red"));
        fixture.cache.resolve_mesh(&mesh, 3).unwrap();
        fixture.cache.resolve_material(&material, 3).unwrap();

        assert!(fixture.cache.collect_released(None).is_empty());
        assert!(fixture.cache.collect_released(Some(2)).is_empty());
        let released = fixture.cache.collect_released(Some(3));
        assert_eq!(
            released,
            vec![
                ReleaseToken {
                    asset: AssetId(1),
                    kind: AssetKind::Mesh
                },
                ReleaseToken {
                    asset: AssetId(2),
                    kind: AssetKind::Material
                },
            ]
        );
        assert!(fixture.cache.collect_released(Some(10)).is_empty());
    }

    #[test]
    fn test_material_capacity_is_fatal() {
        let mut fixture = build(1);
        fixture
            .cache
            .resolve_material(&Arc::new(MaterialData::new(AssetId(1), "a")), 0)
            .unwrap();
        let err = fixture
            .cache
            .resolve_material(&Arc::new(MaterialData::new(AssetId(2), "b")), 0)
            .unwrap_err();
        assert!(matches!(err, RenderError::CapacityExceeded { resource: "materials", .. }));
        assert!(!err.is_recoverable());
    }

    #[rstest]
    fn test_eviction_waits_for_gpu_and_invalidates_handles(mut fixture: Fixture) {
        let mesh = Arc::new(MeshData::cube(AssetId(1)));
        let handle = fixture.cache.resolve_mesh(&mesh, 5).unwrap();

        // Old enough, but the GPU has not finished frame 5.
        assert_eq!(fixture.cache.evict(100, Some(4)), 0);
        // Recently used.
        assert_eq!(fixture.cache.evict(12, Some(5)), 0);
        assert_eq!(fixture.cache.evict(100, Some(5)), 1);
        assert!(fixture.cache.mesh(handle).is_none());

        // Re-resolving reuses the slot with a new generation.
        let again = fixture.cache.resolve_mesh(&mesh, 101).unwrap();
        assert_ne!(again, handle);
        assert!(fixture.cache.mesh(again).is_some());
    }

    #[rstest]
    fn test_shared_textures_upload_once(mut fixture: Fixture) {
        let albedo = Arc::new(TextureData::solid(AssetId(50), [10, 20, 30, 255], true));
        let textures = super::super::MaterialTextures {
            base_color: Some(albedo),
            ..Default::default()
        };
        let a = Arc::new(MaterialData::new(AssetId(1), "a").with_textures(textures.clone()));
        let b = Arc::new(MaterialData::new(AssetId(2), "b").with_textures(textures));
        fixture.cache.resolve_material(&a, 0).unwrap();
        fixture.cache.resolve_material(&b, 0).unwrap();
        assert_eq!(fixture.cache.stats().textures, 1);
        assert_eq!(fixture.cache.stats().materials, 2);
    }

    #[rstest]
    fn test_invalid_mesh_rejected(mut fixture: Fixture) {
        let broken = Arc::new(MeshData::new(AssetId(9), "broken", vec![], vec![0, 1, 2]));
        assert!(matches!(
            fixture.cache.resolve_mesh(&broken, 0),
            Err(RenderError::ResourceCreationFailed(_))
        ));
        assert!(fixture.device.validation_errors().is_empty());
    }
}
