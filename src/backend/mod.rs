//! Backend abstraction layer
//!
//! Provides the device trait, the shared descriptor types and the two
//! implementations: Vulkan for hardware and an in-memory headless device.

pub mod headless;
pub mod owned;
pub mod traits;
pub mod types;

// Vulkan backend is only available on native platforms
#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
pub mod vulkan;

pub use headless::{HeadlessDevice, HeadlessOptions};
pub use owned::{DeviceObject, Owned, OwnedExt};
pub use traits::*;
pub use types::*;
