//! Renderer configuration and static sizing limits.
//!
//! The limits here are budgets, not hints: exceeding any of them at runtime is
//! reported as [`RenderError::CapacityExceeded`] and treated as fatal.

use crate::error::{RenderError, RenderResult};
use crate::pipeline::{ColorGradingSettings, PixelationSettings, ToneMapSettings};

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Number of frame slots cycled round-robin (frames in flight)
    pub frames_in_flight: usize,
    /// Bytes of streaming memory owned by each frame slot
    pub streaming_region_size: u64,
    /// Maximum draw calls recorded in one frame, across all passes
    pub max_draw_calls: u32,
    /// Maximum number of resident materials
    pub max_materials: u32,
    /// Instance cap for a single instanced draw; larger batches spill
    pub max_instances_per_draw: u32,
    /// Maximum instances uploaded per frame, across all views
    pub max_instances: u32,
    /// Maximum skinning joint matrices uploaded per frame
    pub max_joints: u32,
    /// Maximum particles drawn per frame
    pub max_particles: u32,
    /// Maximum number of point lights uploaded per frame
    pub max_point_lights: u32,
    /// Maximum number of point lights rendering shadow cubes
    pub max_point_shadows: u32,
    /// Directional shadow map resolution
    pub shadow_map_size: u32,
    /// Resolution of one point shadow cube face
    pub point_shadow_size: u32,
    /// Far distance covered by the directional shadow frustum
    pub directional_shadow_distance: f32,
    /// Frames a cached mesh or material may stay unused before eviction
    pub eviction_age_frames: u64,
    /// Size of the descriptor pool in sets
    pub max_descriptor_sets: u32,
    /// Enable vsync (FIFO presentation)
    pub vsync: bool,
    /// Background color written by the lighting stage
    pub clear_color: [f32; 4],
    /// Ambient light term
    pub ambient: [f32; 3],
    pub tone_map: ToneMapSettings,
    pub color_grading: ColorGradingSettings,
    pub pixelation: PixelationSettings,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            streaming_region_size: 4 * 1024 * 1024,
            max_draw_calls: 4096,
            max_materials: 1024,
            max_instances_per_draw: 512,
            max_instances: 8192,
            max_joints: 4096,
            max_particles: 4096,
            max_point_lights: 256,
            max_point_shadows: 4,
            shadow_map_size: 2048,
            point_shadow_size: 512,
            directional_shadow_distance: 60.0,
            eviction_age_frames: 240,
            max_descriptor_sets: 4096,
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            ambient: [0.03, 0.03, 0.03],
            tone_map: ToneMapSettings::default(),
            color_grading: ColorGradingSettings::default(),
            pixelation: PixelationSettings::default(),
        }
    }
}

impl RendererConfig {
    /// Upper bound on frames in flight.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_streaming_region_size(mut self, bytes: u64) -> Self {
        self.streaming_region_size = bytes;
        self
    }

    pub fn with_max_instances_per_draw(mut self, cap: u32) -> Self {
        self.max_instances_per_draw = cap;
        self
    }

    pub fn with_max_instances(mut self, count: u32) -> Self {
        self.max_instances = count;
        self
    }

    pub fn with_max_draw_calls(mut self, count: u32) -> Self {
        self.max_draw_calls = count;
        self
    }

    pub fn with_max_materials(mut self, count: u32) -> Self {
        self.max_materials = count;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_pixelation(mut self, pixelation: PixelationSettings) -> Self {
        self.pixelation = pixelation;
        self
    }

    /// Overlay values from `DEFERRED_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.trim().parse() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    log::warn!("Ignoring {key}={value:?}: not a valid value");
                    None
                }
            }
        }

        if let Some(frames) = parse("DEFERRED_FRAMES_IN_FLIGHT", lookup("DEFERRED_FRAMES_IN_FLIGHT")) {
            self.frames_in_flight = frames;
        }
        if let Some(kib) = parse::<u64>("DEFERRED_RING_KIB", lookup("DEFERRED_RING_KIB")) {
            match kib.checked_mul(1024) {
                Some(bytes) => self.streaming_region_size = bytes,
                None => log::warn!("Ignoring DEFERRED_RING_KIB={kib}: too large"),
            }
        }
        if let Some(vsync) = parse("DEFERRED_VSYNC", lookup("DEFERRED_VSYNC")) {
            self.vsync = vsync;
        }
        if let Some(block) = parse("DEFERRED_PIXEL_BLOCK", lookup("DEFERRED_PIXEL_BLOCK")) {
            self.pixelation.block_size = block;
        }
        self
    }

    /// Check static sizing for values the renderer cannot work with.
    pub fn validate(&self) -> RenderResult<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > Self::MAX_FRAMES_IN_FLIGHT {
            return Err(RenderError::InvalidConfig(format!(
                "frames_in_flight must be in 1..={}, got {}",
                Self::MAX_FRAMES_IN_FLIGHT,
                self.frames_in_flight
            )));
        }
        if self.streaming_region_size < 64 * 1024 {
            return Err(RenderError::InvalidConfig(format!(
                "streaming_region_size must be at least 64 KiB, got {}",
                self.streaming_region_size
            )));
        }
        if self.streaming_region_size.saturating_mul(self.frames_in_flight as u64) > u32::MAX as u64 {
            return Err(RenderError::InvalidConfig(
                "streaming buffer must be addressable by 32-bit dynamic offsets".into(),
            ));
        }
        if self.max_instances_per_draw == 0 || self.max_draw_calls == 0 {
            return Err(RenderError::InvalidConfig(
                "draw call and instance limits must be non-zero".into(),
            ));
        }
        if self.max_instances < self.max_instances_per_draw
            || self.max_joints == 0
            || self.max_point_lights == 0
            || self.max_particles == 0
        {
            return Err(RenderError::InvalidConfig(
                "per-frame instance, joint, light and particle limits are too small".into(),
            ));
        }
        let fixed = self.fixed_streaming_bytes();
        if fixed * 2 > self.streaming_region_size {
            return Err(RenderError::InvalidConfig(format!(
                "streaming_region_size of {} bytes cannot hold the per-frame arrays ({} bytes) with headroom",
                self.streaming_region_size, fixed
            )));
        }
        if self.max_materials == 0 {
            return Err(RenderError::InvalidConfig("max_materials must be non-zero".into()));
        }
        if self.pixelation.block_size == 0 {
            return Err(RenderError::InvalidConfig(
                "pixelation block size must be at least 1".into(),
            ));
        }
        if !self.shadow_map_size.is_power_of_two() || !self.point_shadow_size.is_power_of_two() {
            return Err(RenderError::InvalidConfig(
                "shadow map sizes must be powers of two".into(),
            ));
        }
        Ok(())
    }

    /// Bytes of the fixed-size per-frame arrays bound through dynamic storage
    /// descriptors: instances, joints, point lights, shadow matrices, particles.
    pub fn fixed_streaming_bytes(&self) -> u64 {
        use crate::pipeline::uniforms::{GpuParticle, GpuPointLight};
        let instances = self.max_instances as u64 * std::mem::size_of::<crate::backend::InstanceData>() as u64;
        let joints = self.max_joints as u64 * 64;
        let lights = self.max_point_lights as u64 * std::mem::size_of::<GpuPointLight>() as u64;
        let matrices = self.shadow_matrix_count() as u64 * 64;
        let particles = self.max_particles as u64 * std::mem::size_of::<GpuParticle>() as u64;
        instances + joints + lights + matrices + particles
    }

    /// One directional matrix plus six faces per shadowed point light.
    pub fn shadow_matrix_count(&self) -> u32 {
        1 + self.max_point_shadows * 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_frames_in_flight() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(RenderError::InvalidConfig(_))));

        let config = RendererConfig::default().with_frames_in_flight(5);
        assert!(matches!(config.validate(), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_region_too_small_for_arrays() {
        let config = RendererConfig::default()
            .with_streaming_region_size(1024 * 1024)
            .with_max_instances(8192);
        assert!(matches!(config.validate(), Err(RenderError::InvalidConfig(_))));

        let config = config.with_max_instances(512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DEFERRED_FRAMES_IN_FLIGHT", "3"),
            ("DEFERRED_RING_KIB", "256"),
            ("DEFERRED_VSYNC", "false"),
            ("DEFERRED_PIXEL_BLOCK", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = RendererConfig::default()
            .with_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.streaming_region_size, 256 * 1024);
        assert!(!config.vsync);
        assert_eq!(config.pixelation.block_size, PixelationSettings::default().block_size);
    }

    #[test]
    fn test_env_ring_size_overflow_is_ignored() {
        let huge = u64::MAX.to_string();
        let config = RendererConfig::default().with_env_overrides(|key| {
            (key == "DEFERRED_RING_KIB").then(|| huge.clone())
        });
        assert_eq!(
            config.streaming_region_size,
            RendererConfig::default().streaming_region_size
        );

        let config = RendererConfig::default().with_streaming_region_size(u64::MAX);
        assert!(matches!(config.validate(), Err(RenderError::InvalidConfig(_))));
    }
}
