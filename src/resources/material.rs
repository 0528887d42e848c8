//! Material definitions for PBR rendering

use std::sync::Arc;

use glam::{Vec3, Vec4};

use super::{AssetId, TextureData};
use crate::pipeline::uniforms::MaterialUniform;

/// How a material treats alpha
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Fragments below the cutoff are discarded in the G-buffer pass
    Mask(f32),
    /// Drawn in the forward subpass after deferred lighting
    Blend,
}

/// Optional textures of a material; missing slots use 1x1 defaults
#[derive(Debug, Clone, Default)]
pub struct MaterialTextures {
    pub base_color: Option<Arc<TextureData>>,
    pub metallic_roughness: Option<Arc<TextureData>>,
    pub normal: Option<Arc<TextureData>>,
    pub occlusion: Option<Arc<TextureData>>,
    pub emissive: Option<Arc<TextureData>>,
}

impl MaterialTextures {
    /// In binding order: base color, normal, metallic-roughness, occlusion, emissive
    pub fn slots(&self) -> [Option<&Arc<TextureData>>; 5] {
        [
            self.base_color.as_ref(),
            self.normal.as_ref(),
            self.metallic_roughness.as_ref(),
            self.occlusion.as_ref(),
            self.emissive.as_ref(),
        ]
    }
}

/// PBR material properties
#[derive(Debug, Clone)]
pub struct MaterialData {
    pub id: AssetId,
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub occlusion_strength: f32,
    pub emissive: Vec3,
    pub alpha_mode: AlphaMode,
    pub textures: MaterialTextures,
}

impl MaterialData {
    pub fn new(id: AssetId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            occlusion_strength: 1.0,
            emissive: Vec3::ZERO,
            alpha_mode: AlphaMode::Opaque,
            textures: MaterialTextures::default(),
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic = metallic;
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    pub fn with_textures(mut self, textures: MaterialTextures) -> Self {
        self.textures = textures;
        self
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha_mode == AlphaMode::Blend
    }

    pub fn uniform(&self) -> MaterialUniform {
        let cutoff = match self.alpha_mode {
            AlphaMode::Mask(cutoff) => cutoff,
            AlphaMode::Opaque | AlphaMode::Blend => 0.0,
        };
        MaterialUniform {
            base_color: self.base_color,
            emissive: self.emissive.extend(0.0),
            params: Vec4::new(self.metallic, self.roughness, self.occlusion_strength, cutoff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_packs_cutoff() {
        let material = MaterialData::new(AssetId(3), "leaf").with_alpha_mode(AlphaMode::Mask(0.4));
        assert_eq!(material.uniform().params.w, 0.4);
        assert!(!material.is_transparent());
        assert!(MaterialData::new(AssetId(4), "glass")
            .with_alpha_mode(AlphaMode::Blend)
            .is_transparent());
    }
}
