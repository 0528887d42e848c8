//! Interactive viewer: a grid of cubes on a floor, lit by a sun and a few
//! point lights, with the camera orbiting the origin.
//!
//! Left click picks the instance under the cursor and logs its id.
//!
//! ```bash
//! RUST_LOG=info cargo run --example viewer -- --frames-in-flight 3 --no-vsync
//! ```

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use glam::{Mat4, Vec2, Vec3, Vec4};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use deferred_renderer::resources::{MaterialData, MeshData};
use deferred_renderer::scene::{Camera, DirectionalLight, MeshInstance, PointLight};
use deferred_renderer::{AssetId, Extent2d, Renderer, RendererConfig, SceneSnapshot, UiFrame, NO_INSTANCE};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Deferred renderer viewer")]
struct Args {
    /// Frames the CPU may record ahead of the GPU
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,

    /// Cubes along each side of the grid
    #[arg(long, default_value_t = 8)]
    grid: u32,

    /// Initial window width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 720)]
    height: u32,
}

fn build_scene(grid: u32) -> SceneSnapshot {
    let cube = Arc::new(MeshData::cube(AssetId(1)));
    let floor = Arc::new(MeshData::plane(AssetId(2), 40.0, 40.0, 4));
    let stone = Arc::new(
        MaterialData::new(AssetId(100), "stone")
            .with_base_color(Vec4::new(0.6, 0.6, 0.6, 1.0))
            .with_metallic_roughness(0.0, 0.9),
    );
    let palette = [
        Vec4::new(0.9, 0.2, 0.2, 1.0),
        Vec4::new(0.2, 0.8, 0.3, 1.0),
        Vec4::new(0.2, 0.4, 0.9, 1.0),
    ];
    let paints: Vec<_> = palette
        .iter()
        .enumerate()
        .map(|(i, color)| {
            Arc::new(
                MaterialData::new(AssetId(200 + i as u64), &format!("paint_{}", i))
                    .with_base_color(*color)
                    .with_metallic_roughness(0.3, 0.4),
            )
        })
        .collect();

    let mut scene = SceneSnapshot::new(Camera::default());
    scene.add_instance(MeshInstance::new(floor, stone, Mat4::IDENTITY, 1).without_shadow());

    let half = grid as f32 / 2.0;
    let mut next_id = 2;
    for z in 0..grid {
        for x in 0..grid {
            let position = Vec3::new((x as f32 - half) * 2.0, 0.5, (z as f32 - half) * 2.0);
            let paint = &paints[(x + z) as usize % paints.len()];
            scene.add_instance(MeshInstance::new(
                Arc::clone(&cube),
                Arc::clone(paint),
                Mat4::from_translation(position),
                next_id,
            ));
            next_id += 1;
        }
    }

    scene.set_directional_light(DirectionalLight::new(
        Vec3::new(-0.4, -1.0, -0.3),
        Vec3::new(1.0, 0.95, 0.85),
        3.0,
    ));
    scene.add_point_light(PointLight::new(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 0.5, 0.2), 20.0, 10.0).with_shadow());
    scene.add_point_light(PointLight::new(Vec3::new(6.0, 2.0, 6.0), Vec3::new(0.3, 0.5, 1.0), 15.0, 8.0));
    scene
}

fn orbit(camera: &mut Camera, seconds: f32, radius: f32) {
    let angle = seconds * 0.3;
    camera.position = Vec3::new(angle.cos() * radius, radius * 0.6, angle.sin() * radius);
    camera.target = Vec3::ZERO;
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RendererConfig::from_env();
    if let Some(frames) = args.frames_in_flight {
        config = config.with_frames_in_flight(frames);
    }
    if args.no_vsync {
        config = config.with_vsync(false);
    }

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Deferred Renderer")
            .with_inner_size(PhysicalSize::new(args.width, args.height))
            .build(&event_loop)?,
    );

    let mut scene = build_scene(args.grid);
    let mut renderer = Renderer::with_window(Arc::clone(&window), config, &scene)?;
    let radius = args.grid as f32 * 1.8 + 4.0;
    let start = Instant::now();
    let mut cursor = Vec2::ZERO;
    let mut frames = 0u64;
    let mut released = 0usize;

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::Resized(size) => {
                    if let Err(e) = renderer.resize(Extent2d::from(size)) {
                        log::error!("Resize failed: {}", e);
                        elwt.exit();
                    }
                }
                WindowEvent::CursorMoved { position, .. } => {
                    cursor = Vec2::new(position.x as f32, position.y as f32);
                }
                WindowEvent::MouseInput {
                    state: ElementState::Pressed,
                    button: MouseButton::Left,
                    ..
                } => {
                    let size = window.inner_size();
                    if size.width == 0 || size.height == 0 {
                        return;
                    }
                    let uv = cursor / Vec2::new(size.width as f32, size.height as f32);
                    match renderer.pick(uv) {
                        Ok(NO_INSTANCE) => log::info!("Picked nothing at {:?}", uv),
                        Ok(id) => log::info!("Picked instance {} at {:?}", id, uv),
                        Err(e) => {
                            log::error!("Pick failed: {}", e);
                            elwt.exit();
                        }
                    }
                }
                WindowEvent::RedrawRequested => {
                    orbit(&mut scene.camera, start.elapsed().as_secs_f32(), radius);
                    match renderer.render_frame(&scene, &UiFrame::default()) {
                        Ok(tokens) => {
                            released += tokens.len();
                            frames += 1;
                            if frames % 600 == 0 {
                                log::info!(
                                    "{} frames, {} assets released, cache {:?}",
                                    frames,
                                    released,
                                    renderer.cache_stats()
                                );
                            }
                        }
                        Err(e) => {
                            log::error!("Frame failed: {}", e);
                            elwt.exit();
                        }
                    }
                }
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            _ => {}
        }
    })?;
    Ok(())
}
