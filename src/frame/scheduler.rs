//! Frame slot rotation and CPU-GPU synchronization.

use std::collections::VecDeque;
use std::sync::Arc;

use super::{SlotReady, StreamingAllocator};
use crate::backend::{
    CommandBufferHandle, CommandList, FenceHandle, GpuDevice, Owned, PipelineStage, PresentStatus,
    SemaphoreHandle, SubmitInfo,
};
use crate::error::{RenderError, RenderResult};

/// Events kept in the slot history
const HISTORY_LEN: usize = 128;

/// Lifecycle of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never used, or its last submission is known complete
    Idle,
    /// Handed out by `begin_frame`, not yet submitted
    Recording,
    /// Submitted; the fence signals on completion
    Submitted,
}

/// Slot transitions, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    FenceSignaled { slot: usize, frame: u64 },
    RegionReset { slot: usize, frame: u64 },
    Submitted { slot: usize, frame: u64 },
    Presented { slot: usize, frame: u64, image: u32 },
    Abandoned { slot: usize, frame: u64 },
}

/// Result of ending a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented(PresentStatus),
    /// Submitted, but the presentation engine rejected the swapchain
    SurfaceStale,
}

impl FrameOutcome {
    /// Whether the swapchain should be rebuilt before the next frame.
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, FrameOutcome::Presented(PresentStatus::Optimal))
    }
}

/// A frame being recorded. Consumed by `end_frame`, `submit_offscreen` or
/// `abandon_frame`.
#[derive(Debug)]
#[must_use = "a begun frame must be ended or abandoned"]
pub struct FrameToken {
    slot: usize,
    frame_index: u64,
    completed_frame: Option<u64>,
}

impl FrameToken {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Newest frame index whose GPU work is known complete
    pub fn completed_frame(&self) -> Option<u64> {
        self.completed_frame
    }
}

struct FrameSlot<D: GpuDevice> {
    command_buffer: Owned<D, CommandBufferHandle>,
    in_flight: Owned<D, FenceHandle>,
    image_available: Owned<D, SemaphoreHandle>,
    render_finished: Owned<D, SemaphoreHandle>,
    state: SlotState,
    last_frame: Option<u64>,
}

/// Round-robin owner of the frame slots
pub struct FrameScheduler<D: GpuDevice> {
    device: Arc<D>,
    slots: Vec<FrameSlot<D>>,
    current: usize,
    frame_index: u64,
    completed_frame: Option<u64>,
    history: VecDeque<SlotEvent>,
}

impl<D: GpuDevice> FrameScheduler<D> {
    /// Slot fence waits block until the fence signals.
    pub const FENCE_TIMEOUT_NS: u64 = u64::MAX;

    /// Create `frames_in_flight` slots. Fences start signaled so the first
    /// use of each slot does not block.
    pub fn new(device: &Arc<D>, frames_in_flight: usize) -> RenderResult<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            slots.push(FrameSlot {
                command_buffer: Owned::new(device, device.allocate_command_buffer()?),
                in_flight: Owned::new(device, device.create_fence(true)?),
                image_available: Owned::new(device, device.create_semaphore()?),
                render_finished: Owned::new(device, device.create_semaphore()?),
                state: SlotState::Idle,
                last_frame: None,
            });
        }
        log::debug!("Frame scheduler created with {} slots", frames_in_flight);

        Ok(Self {
            device: Arc::clone(device),
            slots,
            current: 0,
            frame_index: 0,
            completed_frame: None,
            history: VecDeque::with_capacity(HISTORY_LEN),
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next `begin_frame` will use
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Index the next begun frame will carry
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn completed_frame(&self) -> Option<u64> {
        self.completed_frame
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn history(&self) -> impl Iterator<Item = &SlotEvent> {
        self.history.iter()
    }

    fn record_event(&mut self, event: SlotEvent) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    fn mark_complete(&mut self, slot: usize) {
        let finished = &mut self.slots[slot];
        if finished.state != SlotState::Submitted {
            return;
        }
        finished.state = SlotState::Idle;
        if let Some(frame) = finished.last_frame {
            self.completed_frame = Some(self.completed_frame.map_or(frame, |c| c.max(frame)));
            self.record_event(SlotEvent::FenceSignaled { slot, frame });
        }
    }

    /// Pick up slots whose fences have signaled without blocking.
    fn poll_completed(&mut self) -> RenderResult<()> {
        for slot in 0..self.slots.len() {
            if self.slots[slot].state == SlotState::Submitted
                && self.device.fence_signaled(self.slots[slot].in_flight.handle())?
            {
                self.mark_complete(slot);
            }
        }
        Ok(())
    }

    /// Wait until the current slot is free, then rewind its ring region.
    ///
    /// Blocks only when the GPU is `frames_in_flight` frames behind.
    pub fn begin_frame(&mut self, allocator: &mut StreamingAllocator<D>) -> RenderResult<FrameToken> {
        let slot = self.current;
        if self.slots[slot].state == SlotState::Recording {
            return Err(RenderError::InvalidHandle(format!(
                "frame slot {} is already recording",
                slot
            )));
        }

        let fence = self.slots[slot].in_flight.handle();
        self.device.wait_for_fence(fence, Self::FENCE_TIMEOUT_NS)?;
        self.mark_complete(slot);
        self.poll_completed()?;

        let frame = self.frame_index;
        allocator.reset_for_frame(&SlotReady {
            slot,
            frame_index: frame,
        });
        self.record_event(SlotEvent::RegionReset { slot, frame });
        self.slots[slot].state = SlotState::Recording;

        log::trace!("Begin frame {} (slot {})", frame, slot);

        Ok(FrameToken {
            slot,
            frame_index: frame,
            completed_frame: self.completed_frame,
        })
    }

    /// Acquire the swapchain image for `token`. `None` means the surface is
    /// stale and the frame should be abandoned.
    pub fn acquire_image(&mut self, token: &FrameToken) -> RenderResult<Option<u32>> {
        let semaphore = self.slots[token.slot].image_available.handle();
        match self.device.acquire_next_image(semaphore) {
            Ok(image) => Ok(Some(image)),
            Err(RenderError::SurfaceStale) => {
                log::debug!("Acquire reported a stale surface (frame {})", token.frame_index);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Give the slot back without submitting. Its fence stays signaled.
    pub fn abandon_frame(&mut self, token: FrameToken) {
        self.slots[token.slot].state = SlotState::Idle;
        self.record_event(SlotEvent::Abandoned {
            slot: token.slot,
            frame: token.frame_index,
        });
        log::trace!("Abandoned frame {} (slot {})", token.frame_index, token.slot);
    }

    fn submit(&mut self, token: &FrameToken, commands: &CommandList, image: Option<u32>) -> RenderResult<()> {
        let slot = &self.slots[token.slot];
        let command_buffer = slot.command_buffer.handle();
        let fence = slot.in_flight.handle();
        let wait = [(slot.image_available.handle(), PipelineStage::ColorAttachmentOutput)];
        let signal = [slot.render_finished.handle()];

        self.device.record(command_buffer, commands)?;
        // Reset only once submission is certain; an abandoned frame must
        // leave the fence signaled.
        self.device.reset_fence(fence)?;
        self.device.submit(&SubmitInfo {
            command_buffer,
            wait: if image.is_some() { &wait[..] } else { &wait[..0] },
            signal: if image.is_some() { &signal[..] } else { &signal[..0] },
            fence: Some(fence),
        })?;

        let slot = &mut self.slots[token.slot];
        slot.state = SlotState::Submitted;
        slot.last_frame = Some(token.frame_index);
        self.record_event(SlotEvent::Submitted {
            slot: token.slot,
            frame: token.frame_index,
        });

        self.current = (self.current + 1) % self.slots.len();
        self.frame_index += 1;
        Ok(())
    }

    /// Submit the frame's commands and present `image`.
    pub fn end_frame(
        &mut self,
        token: FrameToken,
        image: u32,
        commands: &CommandList,
    ) -> RenderResult<FrameOutcome> {
        self.submit(&token, commands, Some(image))?;

        let wait = self.slots[token.slot].render_finished.handle();
        match self.device.present(image, wait) {
            Ok(status) => {
                self.record_event(SlotEvent::Presented {
                    slot: token.slot,
                    frame: token.frame_index,
                    image,
                });
                log::trace!("End frame {} (slot {})", token.frame_index, token.slot);
                Ok(FrameOutcome::Presented(status))
            }
            Err(RenderError::SurfaceStale) => {
                log::debug!("Present reported a stale surface (frame {})", token.frame_index);
                Ok(FrameOutcome::SurfaceStale)
            }
            Err(e) => Err(e),
        }
    }

    /// Submit work that does not touch the swapchain.
    pub fn submit_offscreen(&mut self, token: FrameToken, commands: &CommandList) -> RenderResult<()> {
        self.submit(&token, commands, None)
    }

    /// Wait for every submitted slot.
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        log::trace!("Waiting for GPU idle ({} slots)", self.slots.len());
        for slot in 0..self.slots.len() {
            if self.slots[slot].state == SlotState::Submitted {
                let fence = self.slots[slot].in_flight.handle();
                self.device.wait_for_fence(fence, Self::FENCE_TIMEOUT_NS)?;
                self.mark_complete(slot);
            }
        }
        Ok(())
    }
}

impl<D: GpuDevice> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to drain frame slots: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::DeviceEvent;
    use crate::backend::HeadlessDevice;

    fn setup(frames: usize) -> (Arc<HeadlessDevice>, FrameScheduler<HeadlessDevice>, StreamingAllocator<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::default());
        let scheduler = FrameScheduler::new(&device, frames).unwrap();
        let allocator = StreamingAllocator::new(&device, 64 * 1024, frames).unwrap();
        (device, scheduler, allocator)
    }

    fn run_frame(
        scheduler: &mut FrameScheduler<HeadlessDevice>,
        allocator: &mut StreamingAllocator<HeadlessDevice>,
    ) -> FrameOutcome {
        let token = scheduler.begin_frame(allocator).unwrap();
        let image = scheduler.acquire_image(&token).unwrap().unwrap();
        scheduler.end_frame(token, image, &CommandList::new()).unwrap()
    }

    #[test]
    fn test_zero_frames_rejected() {
        let device = Arc::new(HeadlessDevice::default());
        assert!(FrameScheduler::new(&device, 0).is_err());
    }

    #[test]
    fn test_slots_rotate() {
        let (device, mut scheduler, mut allocator) = setup(2);
        assert_eq!(scheduler.current_slot(), 0);
        run_frame(&mut scheduler, &mut allocator);
        assert_eq!(scheduler.current_slot(), 1);
        run_frame(&mut scheduler, &mut allocator);
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.frame_index(), 2);

        // Both frames still queued on the simulated GPU.
        assert_eq!(device.pending_submissions(), 2);
        assert_eq!(scheduler.completed_frame(), None);
    }

    #[test]
    fn test_reuse_waits_for_own_fence_only() {
        let (device, mut scheduler, mut allocator) = setup(2);
        run_frame(&mut scheduler, &mut allocator);
        run_frame(&mut scheduler, &mut allocator);

        let token = scheduler.begin_frame(&mut allocator).unwrap();
        // Frame 0 completed; frame 1 is still in flight.
        assert_eq!(token.completed_frame(), Some(0));
        assert_eq!(device.pending_submissions(), 1);
        scheduler.abandon_frame(token);
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn test_abandoned_frame_keeps_fence_signaled() {
        let (device, mut scheduler, mut allocator) = setup(2);
        let token = scheduler.begin_frame(&mut allocator).unwrap();
        scheduler.abandon_frame(token);

        // The same slot is reused without blocking on an unsignaled fence.
        let token = scheduler.begin_frame(&mut allocator).unwrap();
        assert_eq!(token.slot(), 0);
        assert_eq!(token.frame_index(), 0);
        let image = scheduler.acquire_image(&token).unwrap().unwrap();
        scheduler.end_frame(token, image, &CommandList::new()).unwrap();
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn test_region_reset_follows_fence_signal() {
        let (_device, mut scheduler, mut allocator) = setup(2);
        for _ in 0..4 {
            run_frame(&mut scheduler, &mut allocator);
        }
        let events: Vec<SlotEvent> = scheduler.history().copied().collect();
        for (i, event) in events.iter().enumerate() {
            let SlotEvent::RegionReset { slot, frame } = *event else {
                continue;
            };
            if frame < 2 {
                continue;
            }
            let previous = frame - 2;
            let signaled = events[..i].iter().any(|e| {
                *e == SlotEvent::FenceSignaled {
                    slot,
                    frame: previous,
                }
            });
            assert!(signaled, "region {} reset before frame {} completed", slot, previous);
        }
    }

    #[test]
    fn test_fence_waits_block_until_signaled() {
        let (device, mut scheduler, mut allocator) = setup(2);
        for _ in 0..4 {
            run_frame(&mut scheduler, &mut allocator);
        }
        scheduler.wait_idle().unwrap();

        let timeouts: Vec<u64> = device
            .events()
            .iter()
            .filter_map(|e| match e.event {
                DeviceEvent::FenceWaited { timeout_ns, .. } => Some(timeout_ns),
                _ => None,
            })
            .collect();
        assert!(!timeouts.is_empty());
        assert!(timeouts.iter().all(|t| *t == u64::MAX), "timeouts: {:?}", timeouts);
    }

    #[test]
    fn test_wait_idle_completes_everything() {
        let (device, mut scheduler, mut allocator) = setup(3);
        for _ in 0..3 {
            run_frame(&mut scheduler, &mut allocator);
        }
        scheduler.wait_idle().unwrap();
        assert_eq!(device.pending_submissions(), 0);
        assert_eq!(scheduler.completed_frame(), Some(2));
        for slot in 0..3 {
            assert_eq!(scheduler.slot_state(slot), Some(SlotState::Idle));
        }
    }

    #[test]
    fn test_stale_acquire_returns_none() {
        let (device, mut scheduler, mut allocator) = setup(2);
        device.inject_stale_surface();
        let token = scheduler.begin_frame(&mut allocator).unwrap();
        assert_eq!(scheduler.acquire_image(&token).unwrap(), None);
        scheduler.abandon_frame(token);
    }

    #[test]
    fn test_suboptimal_present_requests_rebuild() {
        let (device, mut scheduler, mut allocator) = setup(2);
        device.inject_suboptimal_present();
        let outcome = run_frame(&mut scheduler, &mut allocator);
        assert_eq!(outcome, FrameOutcome::Presented(PresentStatus::Suboptimal));
        assert!(outcome.needs_rebuild());
    }
}
