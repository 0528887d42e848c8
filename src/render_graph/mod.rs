//! Render Graph System
//!
//! A fixed graph of passes over one multi-subpass main render pass:
//!
//! ```text
//! [Sun Shadow] [Point Shadows]                (own render passes)
//!        │
//!        ▼
//! GBuffer ─► DeferredLighting ─► ForwardLighting ─► ToneMapping
//!        ─► ColorGrading ─► Pixelation ─► UI ─► CombineUI ─► swapchain
//! ```
//!
//! Attachments flow between subpasses as input attachments; the dependencies
//! are derived from each subpass's declared reads and writes. The graph owns
//! the swapchain-sized targets and rebuilds them when the swapchain changes.

mod attachment;
mod context;
mod graph;
mod packet;
mod pass;
mod subpass;
mod targets;

pub use attachment::AttachmentId;
pub use context::{ring_binding, RenderContext};
pub use graph::RenderGraph;
pub use packet::{FramePacket, PointShadowDraws, SunShadowDraws};
pub use pass::{PassId, PassInputs, PassKind, PassStage, RenderPass};
pub use subpass::{RenderPassLayout, SubpassDesc, SubpassId};
pub use targets::{GraphTargets, RenderPasses, ShadowTargets, SwapchainTargets, PICK_ID_FORMAT};
