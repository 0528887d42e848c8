//! End-to-end tests of the renderer front end on the headless device.
//!
//! ```bash
//! cargo test --test renderer_tests
//! ```

mod common;

use std::sync::Arc;

use egui::epaint::{ClippedPrimitive, ImageDelta, Primitive};
use egui::{pos2, vec2, Color32, ColorImage, Rect, TextureId, TextureOptions, TexturesDelta};
use glam::Vec2;
use parking_lot::Mutex;
use rstest::rstest;

use common::*;
use deferred_renderer::backend::headless::{DeviceEvent, HeadlessOptions};
use deferred_renderer::{
    AssetKind, Extent2d, GpuDevice, HeadlessDevice, RenderError, Renderer, RendererConfig, UiFrame, NO_INSTANCE,
};

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn test_initialize_uploads_initial_scene() {
    let renderer = renderer_with(test_config(2), &cube_scene());
    let stats = renderer.cache_stats();
    assert_eq!(stats.meshes, 1);
    assert_eq!(stats.materials, 1);
    assert!(!renderer.is_suspended());
    assert_eq!(renderer.extent(), HeadlessOptions::default().extent);
}

#[test]
fn test_initialize_rejects_invalid_config() {
    let device = Arc::new(HeadlessDevice::default());
    let config = RendererConfig {
        frames_in_flight: 0,
        ..test_config(2)
    };
    let result = Renderer::initialize(device, config, &empty_scene());
    assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
}

#[test]
fn test_initialize_rejects_surface_without_area() {
    let device = Arc::new(HeadlessDevice::new(HeadlessOptions {
        extent: Extent2d::new(0, 0),
        ..Default::default()
    }));
    let result = Renderer::initialize(device, test_config(2), &empty_scene());
    assert!(matches!(result, Err(RenderError::InitializationFailed(_))));
}

// ============================================================================
// Frames in flight
// ============================================================================

#[rstest]
#[case::single(1)]
#[case::double(2)]
#[case::triple(3)]
fn test_frames_in_flight_never_overlap_host_writes(#[case] frames_in_flight: usize) {
    let mut renderer = renderer_with(test_config(frames_in_flight), &cube_scene());
    let scene = cube_scene();
    for _ in 0..5 {
        renderer.render_frame(&scene, &UiFrame::default()).unwrap();
        assert!(renderer.device().pending_submissions() <= frames_in_flight);
    }

    let device = renderer.device();
    assert!(device.hazards().is_empty(), "hazards: {:?}", device.hazards());
    assert!(
        device.validation_errors().is_empty(),
        "validation errors: {:?}",
        device.validation_errors()
    );
    assert_eq!(count_events(device, |e| matches!(e, DeviceEvent::Presented { .. })), 5);
    assert_eq!(renderer.scheduler().frame_index(), 5);
}

#[test]
fn test_every_frame_walks_the_main_subpasses() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    render_frames(&mut renderer, &cube_scene(), 1);

    let commands = renderer.device().last_submission().unwrap();
    let subpasses = renderer.graph().layout().subpasses().len();
    assert_eq!(commands.subpass_transitions(), subpasses - 1);
    assert!(commands.draw_calls() > 0);
}

#[test]
fn test_failed_frame_hands_its_image_back() {
    let config = test_config(2).with_max_instances_per_draw(1).with_max_instances(2);
    let mut renderer = renderer_with(config, &empty_scene());

    let result = renderer.render_frame(&cube_scene(), &UiFrame::default());
    assert!(matches!(result, Err(RenderError::CapacityExceeded { .. })));

    render_frames(&mut renderer, &empty_scene(), 3);
    let device = renderer.device();
    assert!(
        device.validation_errors().is_empty(),
        "validation errors: {:?}",
        device.validation_errors()
    );
    assert_eq!(count_events(device, |e| matches!(e, DeviceEvent::Presented { .. })), 4);
}

#[test]
fn test_shared_scene_renders_like_a_snapshot() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    let shared = Arc::new(Mutex::new(cube_scene()));
    renderer.render_shared(&shared, &UiFrame::default()).unwrap();
    assert_eq!(renderer.pick(Vec2::new(0.5, 0.5)).unwrap(), CENTER_ID);
}

// ============================================================================
// Asset lifetime
// ============================================================================

#[test]
fn test_release_tokens_follow_completed_uploads() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());

    // Frame 0 is only known complete once its slot comes round again.
    let first = render_frames(&mut renderer, &cube_scene(), 2);
    assert!(first.is_empty());

    let released = render_frames(&mut renderer, &cube_scene(), 4);
    assert!(released
        .iter()
        .any(|t| t.asset == CUBE_MESH && t.kind == AssetKind::Mesh));
    assert!(released
        .iter()
        .any(|t| t.asset == RED_MATERIAL && t.kind == AssetKind::Material));

    let mut unique = released.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), released.len(), "tokens are handed back once");
}

#[test]
fn test_unused_assets_are_evicted() {
    let config = RendererConfig {
        eviction_age_frames: 2,
        ..test_config(2)
    };
    let mut renderer = renderer_with(config, &cube_scene());
    assert_eq!(renderer.cache_stats().meshes, 1);

    render_frames(&mut renderer, &empty_scene(), 8);
    let stats = renderer.cache_stats();
    assert_eq!(stats.meshes, 0);
    assert_eq!(stats.materials, 0);
    assert!(stats.evictions >= 2);
    assert!(renderer.device().validation_errors().is_empty());
}

#[test]
fn test_assets_in_use_survive_eviction() {
    let config = RendererConfig {
        eviction_age_frames: 2,
        ..test_config(2)
    };
    let mut renderer = renderer_with(config, &cube_scene());
    render_frames(&mut renderer, &cube_scene(), 8);
    let stats = renderer.cache_stats();
    assert_eq!(stats.meshes, 1);
    assert_eq!(stats.evictions, 0);
}

// ============================================================================
// Surface changes
// ============================================================================

#[test]
fn test_resize_is_idempotent() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    let start = renderer.device().swapchain().generation;

    let extent = Extent2d::new(200, 100);
    renderer.device().set_surface_extent(extent);
    renderer.resize(extent).unwrap();
    assert_eq!(renderer.device().swapchain().generation, start + 1);
    assert_eq!(renderer.extent(), extent);

    renderer.resize(extent).unwrap();
    renderer.resize(extent).unwrap();
    assert_eq!(renderer.device().swapchain().generation, start + 1);

    render_frames(&mut renderer, &cube_scene(), 2);
    assert!(renderer.device().validation_errors().is_empty());
}

#[test]
fn test_zero_size_suspends_until_restored() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    let extent = renderer.extent();
    let generation = renderer.device().swapchain().generation;

    renderer.resize(Extent2d::new(0, 0)).unwrap();
    assert!(renderer.is_suspended());

    renderer.device().clear_events();
    assert!(render_frames(&mut renderer, &cube_scene(), 3).is_empty());
    assert_eq!(
        count_events(renderer.device(), |e| matches!(e, DeviceEvent::Submitted { .. })),
        0
    );
    assert_eq!(renderer.pick(Vec2::new(0.5, 0.5)).unwrap(), NO_INSTANCE);

    renderer.resize(extent).unwrap();
    assert!(!renderer.is_suspended());
    assert_eq!(renderer.device().swapchain().generation, generation);

    render_frames(&mut renderer, &cube_scene(), 1);
    assert_eq!(
        count_events(renderer.device(), |e| matches!(e, DeviceEvent::Presented { .. })),
        1
    );
}

#[test]
fn test_stale_surface_is_recovered_within_the_frame() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    render_frames(&mut renderer, &cube_scene(), 2);
    let generation = renderer.device().swapchain().generation;

    renderer.device().clear_events();
    renderer.device().inject_stale_surface();
    renderer
        .render_frame(&cube_scene(), &UiFrame::default())
        .expect("stale surface is not fatal");

    let device = renderer.device();
    assert_eq!(device.swapchain().generation, generation + 1);
    assert_eq!(
        count_events(device, |e| matches!(e, DeviceEvent::SwapchainRecreated { .. })),
        1
    );
    assert_eq!(count_events(device, |e| matches!(e, DeviceEvent::Presented { .. })), 1);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn test_surface_resized_behind_the_renderer() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    render_frames(&mut renderer, &cube_scene(), 1);

    let extent = Extent2d::new(160, 90);
    renderer.device().set_surface_extent(extent);
    render_frames(&mut renderer, &cube_scene(), 1);
    assert_eq!(renderer.extent(), extent);
    assert_eq!(renderer.device().swapchain().extent, extent);
}

#[test]
fn test_suboptimal_present_rebuilds_after_the_frame() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    let generation = renderer.device().swapchain().generation;

    renderer.device().inject_suboptimal_present();
    render_frames(&mut renderer, &cube_scene(), 1);
    assert_eq!(renderer.device().swapchain().generation, generation + 1);

    render_frames(&mut renderer, &cube_scene(), 1);
    assert_eq!(renderer.device().swapchain().generation, generation + 1);
}

fn font_delta() -> TexturesDelta {
    let image = ColorImage::new([4, 4], Color32::WHITE);
    TexturesDelta {
        set: vec![(TextureId::Managed(0), ImageDelta::full(image, TextureOptions::LINEAR))],
        free: Vec::new(),
    }
}

fn label_primitives() -> Vec<ClippedPrimitive> {
    let mut mesh = egui::Mesh::with_texture(TextureId::Managed(0));
    mesh.add_rect_with_uv(
        Rect::from_min_size(pos2(10.0, 10.0), vec2(60.0, 20.0)),
        Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
        Color32::WHITE,
    );
    vec![ClippedPrimitive {
        clip_rect: Rect::from_min_max(pos2(0.0, 0.0), pos2(320.0, 240.0)),
        primitive: Primitive::Mesh(mesh),
    }]
}

#[test]
fn test_ui_textures_sent_while_suspended_are_kept() {
    let mut renderer = renderer_with(test_config(2), &empty_scene());
    let extent = renderer.extent();

    renderer.resize(Extent2d::new(0, 0)).unwrap();
    let skipped = renderer
        .render_frame(&empty_scene(), &UiFrame::new(Vec::new(), font_delta(), 1.0))
        .unwrap();
    assert!(skipped.is_empty());
    renderer.resize(extent).unwrap();

    renderer.render_frame(&empty_scene(), &UiFrame::default()).unwrap();
    let without_ui = renderer.device().last_submission().unwrap().draw_calls();

    let ui = UiFrame::new(label_primitives(), TexturesDelta::default(), 1.0);
    renderer.render_frame(&empty_scene(), &ui).unwrap();
    let with_ui = renderer.device().last_submission().unwrap().draw_calls();
    assert_eq!(with_ui, without_ui + 1);
}

// ============================================================================
// Picking
// ============================================================================

#[rstest]
#[case::center(Vec2::new(0.5, 0.5), CENTER_ID)]
#[case::right(Vec2::new(0.8, 0.5), RIGHT_ID)]
#[case::top(Vec2::new(0.5, 0.1), TOP_ID)]
#[case::bottom_is_empty(Vec2::new(0.5, 0.9), NO_INSTANCE)]
#[case::corner_is_empty(Vec2::new(0.02, 0.02), NO_INSTANCE)]
#[case::outside(Vec2::new(-0.1, 0.5), NO_INSTANCE)]
fn test_pick(#[case] uv: Vec2, #[case] expected: u32) {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    render_frames(&mut renderer, &cube_scene(), 1);
    assert_eq!(renderer.pick(uv).unwrap(), expected);
}

#[test]
fn test_pick_waits_for_every_frame_in_flight() {
    let mut renderer = renderer_with(test_config(3), &cube_scene());
    render_frames(&mut renderer, &cube_scene(), 3);
    assert!(renderer.device().pending_submissions() > 0);

    assert_eq!(renderer.pick(Vec2::new(0.5, 0.5)).unwrap(), CENTER_ID);
    assert_eq!(renderer.device().pending_submissions(), 0);

    // Rendering carries on normally afterwards.
    render_frames(&mut renderer, &cube_scene(), 3);
    assert!(renderer.device().hazards().is_empty());
    assert!(renderer.device().validation_errors().is_empty());
}

#[test]
fn test_pick_follows_resize() {
    let mut renderer = renderer_with(test_config(2), &cube_scene());
    let extent = Extent2d::new(640, 200);
    renderer.device().set_surface_extent(extent);
    renderer.resize(extent).unwrap();
    render_frames(&mut renderer, &cube_scene(), 1);
    assert_eq!(renderer.pick(Vec2::new(0.5, 0.5)).unwrap(), CENTER_ID);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_drop_releases_every_device_object() {
    let device = Arc::new(HeadlessDevice::default());
    {
        let mut renderer = Renderer::initialize(Arc::clone(&device), test_config(3), &cube_scene()).unwrap();
        render_frames(&mut renderer, &cube_scene(), 4);
        renderer.pick(Vec2::new(0.5, 0.5)).unwrap();
    }
    assert_eq!(device.live_objects().total(), 0, "{:?}", device.live_objects());
    assert_eq!(device.pending_submissions(), 0);
}
