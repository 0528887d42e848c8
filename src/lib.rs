//! Deferred Renderer - frame orchestration for a deferred Vulkan renderer
//!
//! The crate drives a fixed pipeline of passes over one multi-subpass render
//! pass, with several frames in flight:
//!
//! - **Frames in flight**: per-slot fences, semaphores and command buffers,
//!   plus a streaming ring buffer with one region per slot
//! - **Visibility culling**: main camera, sun and point light views, with
//!   upload-on-miss into a GPU resource cache
//! - **Render graph**: G-buffer, deferred and forward lighting, tone mapping,
//!   color grading, pixelation and UI composition, plus shadow and pick passes
//! - **Backends**: Vulkan via ash for hardware, and a headless device that
//!   validates recorded work and executes picking on the CPU
//!
//! Only [`RenderError::SurfaceStale`] is recoverable, and the [`Renderer`]
//! absorbs it by recreating the swapchain. Every other error is fatal.

pub mod backend;
pub mod config;
pub mod culling;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;

pub use backend::{Extent2d, GpuDevice, HeadlessDevice};
#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
pub use backend::vulkan::VulkanDevice;
pub use config::RendererConfig;
pub use error::{ErrorSeverity, RenderError, RenderResult};
pub use pipeline::UiFrame;
pub use renderer::Renderer;
pub use resources::{AssetId, AssetKind, ReleaseToken};
pub use scene::{SceneSnapshot, SharedScene, NO_INSTANCE};
