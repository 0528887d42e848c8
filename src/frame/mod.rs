//! Frames in flight.
//!
//! The CPU records frame N+1 while the GPU still executes frame N. Every
//! per-frame object that the GPU reads is owned by exactly one frame slot and
//! only touched again after that slot's fence has been waited on:
//!
//! ```text
//! frames_in_flight = 3
//!
//! Slot 0: [Frame 0] ──► [Frame 3] ──► [Frame 6] ──►
//! Slot 1: [Frame 1] ──► [Frame 4] ──► [Frame 7] ──►
//! Slot 2: [Frame 2] ──► [Frame 5] ──► [Frame 8] ──►
//!
//! begin_frame(slot):
//!   wait(slot.fence) ──► reset(slot ring region) ──► record
//! end_frame(slot):
//!   reset(slot.fence) ──► submit(signal fence) ──► present
//! ```
//!
//! - [`FrameScheduler`] owns the slots: a command buffer, a fence and the
//!   acquire/render semaphores each.
//! - [`StreamingAllocator`] owns one host-visible buffer split into one ring
//!   region per slot. Resetting a region requires a [`SlotReady`] proof, which
//!   only the scheduler hands out after the slot's fence has signaled.

mod allocator;
mod scheduler;

pub(crate) use allocator::align_up;
pub use allocator::{RingAllocation, StreamingAllocator};
pub use scheduler::{FrameOutcome, FrameScheduler, FrameToken, SlotEvent, SlotState};

/// Proof that the GPU has finished with a frame slot.
///
/// Created by the scheduler after waiting on the slot fence; cannot be built
/// outside this module.
#[derive(Debug)]
pub struct SlotReady {
    slot: usize,
    frame_index: u64,
}

impl SlotReady {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}
