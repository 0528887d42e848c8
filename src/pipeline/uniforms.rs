//! GPU-side structures mirrored by the WGSL programs.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

use super::{ColorGradingSettings, PixelationSettings, ToneMapSettings};
use crate::scene::{DirectionalLight, PointLight};

/// Point light as read by the lighting subpasses
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    pub position_radius: Vec4,
    pub color_intensity: Vec4,
    /// x = first shadow layer, negative when the light casts no shadow
    pub shadow: Vec4,
}

impl GpuPointLight {
    pub fn new(light: &PointLight, shadow_layer: Option<u32>) -> Self {
        Self {
            position_radius: light.position.extend(light.radius),
            color_intensity: light.color.extend(light.intensity),
            shadow: Vec4::new(shadow_layer.map_or(-1.0, |l| l as f32), 0.0, 0.0, 0.0),
        }
    }
}

/// Per-frame lighting parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightingUniform {
    pub sun_direction: Vec4,
    pub sun_color: Vec4,
    pub ambient: Vec4,
    pub clear_color: Vec4,
    /// x = point light count, y = sun shadow enabled
    pub counts: [u32; 4],
}

impl LightingUniform {
    pub fn new(
        sun: Option<&DirectionalLight>,
        sun_shadow: bool,
        point_lights: u32,
        ambient: [f32; 3],
        clear_color: [f32; 4],
    ) -> Self {
        let (sun_direction, sun_color) = match sun {
            Some(light) => (
                light.direction.normalize_or_zero().extend(1.0),
                (light.color * light.intensity).extend(0.0),
            ),
            None => (Vec4::ZERO, Vec4::ZERO),
        };
        Self {
            sun_direction,
            sun_color,
            ambient: Vec4::new(ambient[0], ambient[1], ambient[2], 0.0),
            clear_color: Vec4::from_array(clear_color),
            counts: [point_lights, sun_shadow as u32, 0, 0],
        }
    }
}

/// Material factors; textures are bound next to it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: Vec4,
    pub emissive: Vec4,
    /// x = metallic, y = roughness, z = occlusion strength, w = alpha cutoff
    pub params: Vec4,
}

/// One camera-facing particle
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuParticle {
    pub position_size: Vec4,
    pub color: Vec4,
}

/// Parameters shared by the full-screen post subpasses
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PostUniform {
    pub tonemap: Vec4,
    pub lift: Vec4,
    pub gamma: Vec4,
    pub gain: Vec4,
    /// x = operator, y = pixel block, z = palette levels, w = flags
    pub options: [u32; 4],
}

impl PostUniform {
    pub const FLAG_DITHER: u32 = 1;
    pub const FLAG_ENCODE_SRGB: u32 = 2;

    pub fn new(
        tone_map: &ToneMapSettings,
        grading: &ColorGradingSettings,
        pixelation: &PixelationSettings,
        encode_srgb: bool,
    ) -> Self {
        let mut flags = 0;
        if pixelation.dither {
            flags |= Self::FLAG_DITHER;
        }
        if encode_srgb {
            flags |= Self::FLAG_ENCODE_SRGB;
        }
        Self {
            tonemap: Vec4::new(tone_map.exposure, tone_map.gamma.max(0.01), 0.0, 0.0),
            lift: grading.lift.extend(grading.saturation),
            gamma: grading.gamma.extend(grading.contrast),
            gain: grading.gain.extend(1.0),
            options: [
                tone_map.operator as u32,
                pixelation.block_size.max(1),
                pixelation.palette_levels,
                flags,
            ],
        }
    }
}

/// UI screen size in logical points
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UiUniform {
    pub screen_size: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_uniform_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<GpuPointLight>(), 48);
        assert_eq!(std::mem::size_of::<LightingUniform>(), 80);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 48);
        assert_eq!(std::mem::size_of::<GpuParticle>(), 32);
        assert_eq!(std::mem::size_of::<PostUniform>(), 80);
        assert_eq!(std::mem::size_of::<UiUniform>(), 16);
    }

    #[test]
    fn test_point_light_shadow_layer() {
        let light = PointLight {
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::ONE,
            intensity: 5.0,
            radius: 10.0,
            casts_shadow: true,
        };
        assert_eq!(GpuPointLight::new(&light, Some(6)).shadow.x, 6.0);
        assert!(GpuPointLight::new(&light, None).shadow.x < 0.0);
        assert_eq!(GpuPointLight::new(&light, None).position_radius.w, 10.0);
    }

    #[test]
    fn test_post_flags() {
        let pixelation = PixelationSettings {
            dither: true,
            ..Default::default()
        };
        let post = PostUniform::new(
            &ToneMapSettings::default(),
            &ColorGradingSettings::default(),
            &pixelation,
            true,
        );
        assert_eq!(post.options[3], PostUniform::FLAG_DITHER | PostUniform::FLAG_ENCODE_SRGB);
        assert_eq!(post.options[1], 1);
    }
}
