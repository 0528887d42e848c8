//! Descriptor set layouts and samplers shared between passes
//!
//! Set numbering follows the bind group table in [`super::shaders`].

use std::sync::Arc;

use crate::backend::{
    AddressMode, BindingType, CompareFunction, DescriptorBinding, DescriptorSetLayoutDescriptor,
    DescriptorSetLayoutHandle, FilterMode, GpuDevice, Owned, OwnedExt, SampleKind, SamplerDescriptor,
    SamplerHandle, ShaderStages, TextureViewKind,
};
use crate::error::RenderResult;

fn binding(binding: u32, ty: BindingType, stages: ShaderStages) -> DescriptorBinding {
    DescriptorBinding { binding, ty, stages }
}

fn texture(index: u32, sample: SampleKind, view: TextureViewKind) -> DescriptorBinding {
    binding(index, BindingType::SampledTexture { view, sample }, ShaderStages::FRAGMENT)
}

/// Group 0 of scene programs: camera, point lights, lighting, shadow matrices
pub fn frame_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "Frame".into(),
        bindings: vec![
            binding(0, BindingType::UniformBuffer { dynamic: true }, ShaderStages::VERTEX_FRAGMENT),
            binding(1, BindingType::StorageBuffer { dynamic: true }, ShaderStages::FRAGMENT),
            binding(2, BindingType::UniformBuffer { dynamic: true }, ShaderStages::FRAGMENT),
            binding(3, BindingType::StorageBuffer { dynamic: true }, ShaderStages::FRAGMENT),
        ],
    }
}

/// Instances and the joint palette
pub fn instance_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "Instances".into(),
        bindings: vec![
            binding(0, BindingType::StorageBuffer { dynamic: true }, ShaderStages::VERTEX),
            binding(1, BindingType::StorageBuffer { dynamic: true }, ShaderStages::VERTEX),
        ],
    }
}

/// Material factors, sampler and five texture slots
pub fn material_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    let mut bindings = vec![
        binding(0, BindingType::UniformBuffer { dynamic: false }, ShaderStages::FRAGMENT),
        binding(1, BindingType::Sampler { comparison: false }, ShaderStages::FRAGMENT),
    ];
    bindings.extend((2..7).map(|i| texture(i, SampleKind::Float, TextureViewKind::D2)));
    DescriptorSetLayoutDescriptor {
        label: "Material".into(),
        bindings,
    }
}

pub fn gbuffer_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "GBuffer Inputs".into(),
        bindings: vec![
            texture(0, SampleKind::Float, TextureViewKind::D2),
            texture(1, SampleKind::Float, TextureViewKind::D2),
            texture(2, SampleKind::Float, TextureViewKind::D2),
            texture(3, SampleKind::Depth, TextureViewKind::D2),
        ],
    }
}

/// Sun shadow map, point shadow array, comparison sampler
pub fn shadow_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "Shadow Maps".into(),
        bindings: vec![
            texture(0, SampleKind::Depth, TextureViewKind::D2),
            texture(1, SampleKind::Depth, TextureViewKind::D2Array),
            binding(2, BindingType::Sampler { comparison: true }, ShaderStages::FRAGMENT),
        ],
    }
}

pub fn particle_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "Particles".into(),
        bindings: vec![binding(0, BindingType::StorageBuffer { dynamic: true }, ShaderStages::VERTEX)],
    }
}

/// Post uniforms plus the input image and an optional overlay
pub fn post_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "Post".into(),
        bindings: vec![
            binding(0, BindingType::UniformBuffer { dynamic: true }, ShaderStages::FRAGMENT),
            texture(1, SampleKind::Float, TextureViewKind::D2),
            texture(2, SampleKind::Float, TextureViewKind::D2),
        ],
    }
}

pub fn ui_uniform_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "UI Uniforms".into(),
        bindings: vec![binding(0, BindingType::UniformBuffer { dynamic: true }, ShaderStages::VERTEX)],
    }
}

pub fn ui_texture_layout_descriptor() -> DescriptorSetLayoutDescriptor {
    DescriptorSetLayoutDescriptor {
        label: "UI Texture".into(),
        bindings: vec![
            texture(0, SampleKind::Float, TextureViewKind::D2),
            binding(1, BindingType::Sampler { comparison: false }, ShaderStages::FRAGMENT),
        ],
    }
}

/// Every set layout, created once at initialization
pub struct SharedLayouts<D: GpuDevice> {
    pub frame: Owned<D, DescriptorSetLayoutHandle>,
    pub instance: Owned<D, DescriptorSetLayoutHandle>,
    pub material: Owned<D, DescriptorSetLayoutHandle>,
    pub gbuffer: Owned<D, DescriptorSetLayoutHandle>,
    pub shadow: Owned<D, DescriptorSetLayoutHandle>,
    pub particle: Owned<D, DescriptorSetLayoutHandle>,
    pub post: Owned<D, DescriptorSetLayoutHandle>,
    pub ui_uniform: Owned<D, DescriptorSetLayoutHandle>,
    pub ui_texture: Owned<D, DescriptorSetLayoutHandle>,
}

impl<D: GpuDevice> SharedLayouts<D> {
    pub fn new(device: &Arc<D>) -> RenderResult<Self> {
        Ok(Self {
            frame: device.owned_set_layout(&frame_layout_descriptor())?,
            instance: device.owned_set_layout(&instance_layout_descriptor())?,
            material: device.owned_set_layout(&material_layout_descriptor())?,
            gbuffer: device.owned_set_layout(&gbuffer_layout_descriptor())?,
            shadow: device.owned_set_layout(&shadow_layout_descriptor())?,
            particle: device.owned_set_layout(&particle_layout_descriptor())?,
            post: device.owned_set_layout(&post_layout_descriptor())?,
            ui_uniform: device.owned_set_layout(&ui_uniform_layout_descriptor())?,
            ui_texture: device.owned_set_layout(&ui_texture_layout_descriptor())?,
        })
    }
}

/// Samplers shared by every pass
pub struct SharedSamplers<D: GpuDevice> {
    /// Trilinear, repeating, anisotropic where supported
    pub material: Owned<D, SamplerHandle>,
    /// Depth comparison for shadow lookups
    pub shadow: Owned<D, SamplerHandle>,
    pub ui: Owned<D, SamplerHandle>,
}

impl<D: GpuDevice> SharedSamplers<D> {
    pub fn new(device: &Arc<D>) -> RenderResult<Self> {
        let max_anisotropy = device.capabilities().max_anisotropy;
        Ok(Self {
            material: device.owned_sampler(&SamplerDescriptor {
                label: "Material Sampler".into(),
                address_mode: AddressMode::Repeat,
                anisotropy: (max_anisotropy > 1.0).then(|| max_anisotropy.min(16.0)),
                ..Default::default()
            })?,
            shadow: device.owned_sampler(&SamplerDescriptor {
                label: "Shadow Sampler".into(),
                compare: Some(CompareFunction::LessEqual),
                ..Default::default()
            })?,
            ui: device.owned_sampler(&SamplerDescriptor {
                label: "UI Sampler".into(),
                mag_filter: FilterMode::Linear,
                min_filter: FilterMode::Linear,
                ..Default::default()
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_bindings() {
        let dynamic = |desc: DescriptorSetLayoutDescriptor| -> Vec<u32> {
            desc.bindings
                .iter()
                .filter(|b| b.ty.is_dynamic())
                .map(|b| b.binding)
                .collect()
        };
        assert_eq!(dynamic(frame_layout_descriptor()), vec![0, 1, 2, 3]);
        assert_eq!(dynamic(instance_layout_descriptor()), vec![0, 1]);
        assert!(dynamic(material_layout_descriptor()).is_empty());
        assert_eq!(dynamic(post_layout_descriptor()), vec![0]);
    }

    #[test]
    fn test_material_layout_has_five_texture_slots() {
        let textures = material_layout_descriptor()
            .bindings
            .iter()
            .filter(|b| matches!(b.ty, BindingType::SampledTexture { .. }))
            .count();
        assert_eq!(textures, 5);
    }
}
