//! Decoded texture data

use super::AssetId;

/// Pixel data of a decoded RGBA8 texture
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub id: AssetId,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Color data (sampled as sRGB) rather than linear data such as normals
    pub srgb: bool,
}

impl TextureData {
    pub fn new(id: AssetId, width: u32, height: u32, pixels: Vec<u8>, srgb: bool) -> Self {
        Self {
            id,
            width,
            height,
            pixels,
            srgb,
        }
    }

    /// 1x1 texture of a single color
    pub fn solid(id: AssetId, rgba: [u8; 4], srgb: bool) -> Self {
        Self::new(id, 1, 1, rgba.to_vec(), srgb)
    }

    /// Pixel count matches the dimensions
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 4
    }
}

/// Fallback texel values for missing material textures
pub mod defaults {
    pub const WHITE: [u8; 4] = [255, 255, 255, 255];
    /// Tangent-space +Z
    pub const FLAT_NORMAL: [u8; 4] = [128, 128, 255, 255];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(TextureData::solid(AssetId(1), defaults::WHITE, true).is_valid());
        assert!(!TextureData::new(AssetId(2), 2, 2, vec![0; 4], false).is_valid());
    }
}
