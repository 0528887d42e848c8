//! Shared fixtures for the renderer integration tests.
//!
//! Everything runs on the headless device, which queues submissions until a
//! fence is waited on and rasterizes the id-buffer pass on the CPU.

#![allow(dead_code)]

use std::sync::Arc;

use deferred_renderer::backend::headless::{DeviceEvent, HeadlessOptions};
use deferred_renderer::resources::{MaterialData, MeshData};
use deferred_renderer::scene::{Camera, MeshInstance};
use deferred_renderer::{AssetId, HeadlessDevice, Renderer, RendererConfig, SceneSnapshot, UiFrame};
use glam::{Mat4, Vec3, Vec4};

pub const CUBE_MESH: AssetId = AssetId(1);
pub const RED_MATERIAL: AssetId = AssetId(10);

/// Instance ids placed by [`cube_scene`]
pub const CENTER_ID: u32 = 1;
pub const RIGHT_ID: u32 = 2;
pub const TOP_ID: u32 = 3;

/// Config small enough for tests while still passing validation.
pub fn test_config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig::default()
        .with_frames_in_flight(frames_in_flight)
        .with_streaming_region_size(1024 * 1024)
        .with_max_instances(512)
}

pub fn camera() -> Camera {
    Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO)
}

/// Three unit cubes: one at the origin, one to the right and one above.
pub fn cube_scene() -> SceneSnapshot {
    let mesh = Arc::new(MeshData::cube(CUBE_MESH));
    let material = Arc::new(MaterialData::new(RED_MATERIAL, "red").with_base_color(Vec4::new(1.0, 0.0, 0.0, 1.0)));

    let mut scene = SceneSnapshot::new(camera());
    for (position, id) in [
        (Vec3::ZERO, CENTER_ID),
        (Vec3::new(1.5, 0.0, 0.0), RIGHT_ID),
        (Vec3::new(0.0, 1.5, 0.0), TOP_ID),
    ] {
        scene.add_instance(MeshInstance::new(
            Arc::clone(&mesh),
            Arc::clone(&material),
            Mat4::from_translation(position),
            id,
        ));
    }
    scene
}

pub fn empty_scene() -> SceneSnapshot {
    SceneSnapshot::new(camera())
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn renderer_with(config: RendererConfig, scene: &SceneSnapshot) -> Renderer<HeadlessDevice> {
    init_logging();
    let device = Arc::new(HeadlessDevice::new(HeadlessOptions::default()));
    Renderer::initialize(device, config, scene).expect("headless renderer initializes")
}

/// Render `count` frames of `scene`, returning every release token handed back.
pub fn render_frames(
    renderer: &mut Renderer<HeadlessDevice>,
    scene: &SceneSnapshot,
    count: usize,
) -> Vec<deferred_renderer::ReleaseToken> {
    let mut released = Vec::new();
    for _ in 0..count {
        released.extend(
            renderer
                .render_frame(scene, &UiFrame::default())
                .expect("frame renders"),
        );
    }
    released
}

pub fn count_events(device: &HeadlessDevice, matches: impl Fn(&DeviceEvent) -> bool) -> usize {
    device.events().iter().filter(|e| matches(&e.event)).count()
}
