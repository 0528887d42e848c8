//! Per-slot streaming ring.
//!
//! One host-visible buffer is split into `frames_in_flight` equal regions.
//! A frame bump-allocates from its own region only; the region is rewound when
//! the frame slot is reused, after its fence proved the GPU is done with it.
//!
//! ```text
//! ┌──────────── region 0 ────────────┬──────────── region 1 ────────────┐
//! │ camera │ lights │ instances │ ░░░░│ camera │ ui verts │ ░░░░░░░░░░░░░│
//! └──────────────────────────────────┴──────────────────────────────────┘
//!   ▲ begin               cursor ▲        ▲ begin          cursor ▲
//! ```
//!
//! Running out of space is fatal: the allocation fails before anything is
//! written, so no frame ever straddles into another slot's region.

use std::sync::Arc;

use bytemuck::Pod;

use super::SlotReady;
use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, GpuDevice, MemoryLocation, Owned, OwnedExt};
use crate::error::{RenderError, RenderResult};

/// A sub-allocation from the streaming buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingAllocation {
    /// Byte offset into the streaming buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

impl RingAllocation {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Offset as a 32-bit dynamic descriptor offset.
    pub fn dynamic_offset(&self) -> u32 {
        self.offset as u32
    }
}

#[derive(Debug, Clone, Copy)]
struct RingRegion {
    begin: u64,
    end: u64,
    cursor: u64,
}

/// Streaming allocator with one ring region per frame slot
pub struct StreamingAllocator<D: GpuDevice> {
    device: Arc<D>,
    buffer: Owned<D, BufferHandle>,
    regions: Vec<RingRegion>,
    active: usize,
    alignment: u64,
    high_water: u64,
}

impl<D: GpuDevice> StreamingAllocator<D> {
    /// Create the streaming buffer with `slots` regions of `region_size` bytes.
    ///
    /// Regions are rounded up to the device's dynamic offset alignment.
    pub fn new(device: &Arc<D>, region_size: u64, slots: usize) -> RenderResult<Self> {
        if slots == 0 || region_size == 0 {
            return Err(RenderError::InvalidConfig(
                "streaming allocator needs at least one non-empty region".into(),
            ));
        }
        let alignment = device.capabilities().dynamic_offset_alignment();
        let region_size = align_up(region_size, alignment);
        let total = region_size * slots as u64;

        let buffer = device.owned_buffer(&BufferDescriptor {
            label: "Streaming Ring".to_string(),
            size: total,
            usage: BufferUsage::UNIFORM | BufferUsage::STORAGE | BufferUsage::VERTEX | BufferUsage::INDEX,
            location: MemoryLocation::HostVisible,
        })?;

        let regions = (0..slots as u64)
            .map(|i| RingRegion {
                begin: i * region_size,
                end: (i + 1) * region_size,
                cursor: i * region_size,
            })
            .collect();

        log::debug!(
            "Streaming ring: {} regions x {} KiB (alignment {})",
            slots,
            region_size / 1024,
            alignment
        );

        Ok(Self {
            device: Arc::clone(device),
            buffer,
            regions,
            active: 0,
            alignment,
            high_water: 0,
        })
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    /// Default alignment, valid for both uniform and storage dynamic offsets.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Capacity of one region.
    pub fn region_capacity(&self) -> u64 {
        let region = &self.regions[0];
        region.end - region.begin
    }

    /// Byte range owned by `slot`.
    pub fn region(&self, slot: usize) -> Option<std::ops::Range<u64>> {
        self.regions.get(slot).map(|r| r.begin..r.end)
    }

    pub fn active_slot(&self) -> usize {
        self.active
    }

    /// Bytes allocated from the active region since it was reset.
    pub fn used(&self) -> u64 {
        let region = &self.regions[self.active];
        region.cursor - region.begin
    }

    /// Largest single-frame usage observed so far.
    pub fn high_water_mark(&self) -> u64 {
        self.high_water
    }

    /// Rewind the region of a slot the GPU has finished with and make it active.
    pub fn reset_for_frame(&mut self, ready: &SlotReady) {
        let Some(region) = self.regions.get_mut(ready.slot) else {
            return;
        };
        log::trace!(
            "Ring region {} reset for frame {} ({} bytes were used)",
            ready.slot,
            ready.frame_index,
            region.cursor - region.begin
        );
        region.cursor = region.begin;
        self.active = ready.slot;
    }

    /// Reserve `size` bytes in the active region.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> RenderResult<RingAllocation> {
        debug_assert!(alignment.is_power_of_two(), "alignment must be power of 2");
        let region = &mut self.regions[self.active];

        let offset = align_up(region.cursor, alignment.max(1));
        if offset + size > region.end {
            log::error!(
                "Ring region {} exhausted: {} bytes requested, {} of {} in use",
                self.active,
                size,
                region.cursor - region.begin,
                region.end - region.begin
            );
            return Err(RenderError::capacity(
                "streaming ring region",
                size,
                region.end.saturating_sub(offset),
            ));
        }
        region.cursor = offset + size;
        self.high_water = self.high_water.max(region.cursor - region.begin);
        Ok(RingAllocation::new(offset, size))
    }

    /// Fill the start of an allocation made by [`Self::allocate`].
    pub fn write(&self, allocation: &RingAllocation, data: &[u8]) -> RenderResult<()> {
        if data.len() as u64 > allocation.size {
            return Err(RenderError::capacity(
                "ring allocation",
                data.len() as u64,
                allocation.size,
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.device.write_buffer(self.buffer.handle(), allocation.offset, data)
    }

    /// Copy `value` into the ring at the default alignment.
    pub fn push<T: Pod>(&mut self, value: &T) -> RenderResult<RingAllocation> {
        let bytes = bytemuck::bytes_of(value);
        let allocation = self.allocate(bytes.len() as u64, self.alignment)?;
        self.device.write_buffer(self.buffer.handle(), allocation.offset, bytes)?;
        Ok(allocation)
    }

    /// Copy a slice into the ring. Empty slices reserve nothing.
    pub fn push_slice<T: Pod>(&mut self, data: &[T], alignment: u64) -> RenderResult<RingAllocation> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            let cursor = self.regions[self.active].cursor;
            return Ok(RingAllocation::new(cursor, 0));
        }
        let allocation = self.allocate(bytes.len() as u64, alignment)?;
        self.device.write_buffer(self.buffer.handle(), allocation.offset, bytes)?;
        Ok(allocation)
    }
}

/// Align a value up to the given alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use rstest::rstest;

    fn allocator(region: u64, slots: usize) -> (Arc<HeadlessDevice>, StreamingAllocator<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::default());
        let allocator = StreamingAllocator::new(&device, region, slots).unwrap();
        (device, allocator)
    }

    #[rstest]
    #[case(0, 256, 0)]
    #[case(1, 256, 256)]
    #[case(256, 256, 256)]
    #[case(257, 64, 320)]
    fn test_align_up(#[case] value: u64, #[case] alignment: u64, #[case] expected: u64) {
        assert_eq!(align_up(value, alignment), expected);
    }

    #[test]
    fn test_regions_are_disjoint() {
        let (_device, allocator) = allocator(4096, 3);
        assert_eq!(allocator.region(0), Some(0..4096));
        assert_eq!(allocator.region(1), Some(4096..8192));
        assert_eq!(allocator.region(2), Some(8192..12288));
        assert_eq!(allocator.region(3), None);
    }

    #[test]
    fn test_allocations_are_aligned_and_bounded() {
        let (_device, mut allocator) = allocator(4096, 2);
        let a = allocator.allocate(10, 256).unwrap();
        let b = allocator.allocate(10, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(allocator.used(), 266);
        assert!(b.end() <= 4096);
    }

    #[test]
    fn test_overflow_fails_before_writing() {
        let (device, mut allocator) = allocator(1024, 2);
        allocator.allocate(1000, 1).unwrap();

        let err = allocator.push(&[1u32; 16]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::CapacityExceeded {
                resource: "streaming ring region",
                requested: 64,
                ..
            }
        ));
        // Nothing spilled into the next slot's region.
        let mut next = [0u8; 64];
        device.read_buffer(allocator.buffer(), 1024, &mut next).unwrap();
        assert!(next.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_reset_rewinds_only_the_ready_slot() {
        let (_device, mut allocator) = allocator(4096, 2);
        allocator.allocate(512, 256).unwrap();
        allocator.reset_for_frame(&SlotReady {
            slot: 1,
            frame_index: 1,
        });
        assert_eq!(allocator.active_slot(), 1);
        let allocation = allocator.allocate(16, 256).unwrap();
        assert_eq!(allocation.offset, 4096);
        assert_eq!(allocator.high_water_mark(), 512);
    }

    #[test]
    fn test_push_writes_bytes() {
        let (device, mut allocator) = allocator(4096, 1);
        let allocation = allocator.push_slice(&[7u32, 9u32], 4).unwrap();
        let mut out = [0u8; 8];
        device.read_buffer(allocator.buffer(), allocation.offset, &mut out).unwrap();
        assert_eq!(u32::from_le_bytes([out[0], out[1], out[2], out[3]]), 7);
        assert_eq!(u32::from_le_bytes([out[4], out[5], out[6], out[7]]), 9);

        let empty = allocator.push_slice::<u32>(&[], 4).unwrap();
        assert_eq!(empty.size, 0);
    }
}
