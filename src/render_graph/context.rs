//! Explicit per-renderer state handed to every pass
//!
//! Passes never reach for globals: the device, configuration, swapchain
//! properties, the streaming ring and the shared layouts all come through the
//! [`RenderContext`].

use std::sync::Arc;

use bytemuck::Pod;

use crate::backend::{
    BufferHandle, Command, CommandList, DescriptorResource, DescriptorSetHandle, DescriptorWrite, Extent2d,
    GpuDevice, InstanceData, Owned, OwnedExt, SwapchainInfo, TextureFormat,
};
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};
use crate::frame::StreamingAllocator;
use crate::pipeline::layouts::{SharedLayouts, SharedSamplers};
use crate::pipeline::uniforms::{GpuParticle, GpuPointLight, LightingUniform};

/// Descriptor range covering `size` bytes of the ring buffer. Dynamic offsets
/// select the actual allocation each frame.
pub fn ring_binding(buffer: BufferHandle, binding: u32, size: u64) -> DescriptorWrite {
    DescriptorWrite {
        binding,
        resource: DescriptorResource::Buffer {
            buffer,
            offset: 0,
            size,
        },
    }
}

fn size_of<T>() -> u64 {
    std::mem::size_of::<T>() as u64
}

pub struct RenderContext<D: GpuDevice> {
    device: Arc<D>,
    config: RendererConfig,
    swapchain: SwapchainInfo,
    frame_index: u64,
    completed_frame: Option<u64>,
    commands: CommandList,
    frame_set: Owned<D, DescriptorSetHandle>,
    instance_set: Owned<D, DescriptorSetHandle>,
    particle_set: Owned<D, DescriptorSetHandle>,
    samplers: SharedSamplers<D>,
    layouts: SharedLayouts<D>,
    allocator: StreamingAllocator<D>,
}

impl<D: GpuDevice> RenderContext<D> {
    pub fn new(device: &Arc<D>, config: &RendererConfig) -> RenderResult<Self> {
        config.validate()?;
        let allocator = StreamingAllocator::new(device, config.streaming_region_size, config.frames_in_flight)?;
        let layouts = SharedLayouts::new(device)?;
        let samplers = SharedSamplers::new(device)?;
        let ring = allocator.buffer();

        let frame_set = device.owned_descriptor_set(
            layouts.frame.handle(),
            &[
                ring_binding(ring, 0, size_of::<crate::backend::CameraUniform>()),
                ring_binding(ring, 1, config.max_point_lights as u64 * size_of::<GpuPointLight>()),
                ring_binding(ring, 2, size_of::<LightingUniform>()),
                ring_binding(ring, 3, config.shadow_matrix_count() as u64 * 64),
            ],
        )?;
        let instance_set = device.owned_descriptor_set(
            layouts.instance.handle(),
            &[
                ring_binding(ring, 0, config.max_instances as u64 * size_of::<InstanceData>()),
                ring_binding(ring, 1, config.max_joints as u64 * 64),
            ],
        )?;
        let particle_set = device.owned_descriptor_set(
            layouts.particle.handle(),
            &[ring_binding(ring, 0, config.max_particles as u64 * size_of::<GpuParticle>())],
        )?;

        Ok(Self {
            device: Arc::clone(device),
            config: config.clone(),
            swapchain: device.swapchain(),
            frame_index: 0,
            completed_frame: None,
            commands: CommandList::new(),
            frame_set,
            instance_set,
            particle_set,
            samplers,
            layouts,
            allocator,
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn extent(&self) -> Extent2d {
        self.swapchain.extent
    }

    pub fn swapchain_format(&self) -> TextureFormat {
        self.swapchain.format
    }

    pub fn swapchain(&self) -> &SwapchainInfo {
        &self.swapchain
    }

    pub(crate) fn set_swapchain(&mut self, swapchain: SwapchainInfo) {
        self.swapchain = swapchain;
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Newest frame the GPU is known to have finished
    pub fn completed_frame(&self) -> Option<u64> {
        self.completed_frame
    }

    pub fn layouts(&self) -> &SharedLayouts<D> {
        &self.layouts
    }

    pub fn samplers(&self) -> &SharedSamplers<D> {
        &self.samplers
    }

    pub fn frame_set(&self) -> DescriptorSetHandle {
        self.frame_set.handle()
    }

    pub fn instance_set(&self) -> DescriptorSetHandle {
        self.instance_set.handle()
    }

    pub fn particle_set(&self) -> DescriptorSetHandle {
        self.particle_set.handle()
    }

    pub fn allocator(&self) -> &StreamingAllocator<D> {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut StreamingAllocator<D> {
        &mut self.allocator
    }

    /// Start recording `frame_index`. The slot's ring region must already be
    /// reset by the scheduler.
    pub(crate) fn begin_frame(&mut self, frame_index: u64, completed_frame: Option<u64>) {
        self.frame_index = frame_index;
        self.completed_frame = completed_frame;
        self.commands.clear();
    }

    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    pub(crate) fn take_commands(&mut self) -> CommandList {
        std::mem::take(&mut self.commands)
    }

    /// Record a non-draw command.
    pub fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Record a draw, enforcing the per-frame draw call limit.
    pub fn draw(&mut self, command: Command) -> RenderResult<()> {
        let limit = self.config.max_draw_calls;
        if self.commands.draw_calls() >= limit {
            return Err(RenderError::capacity(
                "draw calls",
                self.commands.draw_calls() as u64 + 1,
                limit as u64,
            ));
        }
        self.commands.push(command);
        Ok(())
    }

    /// Stream one value and return its dynamic offset.
    pub fn push_uniform<T: Pod>(&mut self, value: &T) -> RenderResult<u32> {
        Ok(self.allocator.push(value)?.dynamic_offset())
    }

    /// Stream `data` into an allocation sized for `capacity` elements, so the
    /// full descriptor range stays inside this frame's region.
    pub fn push_array<T: Pod>(&mut self, resource: &'static str, data: &[T], capacity: u32) -> RenderResult<u32> {
        if data.len() > capacity as usize {
            return Err(RenderError::capacity(resource, data.len() as u64, capacity as u64));
        }
        let alignment = self.allocator.alignment();
        let allocation = self.allocator.allocate(capacity.max(1) as u64 * size_of::<T>(), alignment)?;
        if !data.is_empty() {
            self.allocator.write(&allocation, bytemuck::cast_slice(data))?;
        }
        Ok(allocation.dynamic_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use bytemuck::Zeroable;

    fn context() -> RenderContext<HeadlessDevice> {
        let device = Arc::new(HeadlessDevice::default());
        let config = RendererConfig::default()
            .with_streaming_region_size(1024 * 1024)
            .with_max_instances(512)
            .with_max_draw_calls(2);
        RenderContext::new(&device, &config).unwrap()
    }

    #[test]
    fn test_draw_call_limit() {
        let mut ctx = context();
        let draw = || Command::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        };
        ctx.draw(draw()).unwrap();
        ctx.draw(draw()).unwrap();
        let err = ctx.draw(draw()).unwrap_err();
        assert!(matches!(err, RenderError::CapacityExceeded { resource: "draw calls", .. }));

        ctx.begin_frame(1, Some(0));
        assert!(ctx.commands().is_empty());
        ctx.draw(draw()).unwrap();
    }

    #[test]
    fn test_push_array_reserves_capacity() {
        let mut ctx = context();
        let first = ctx.push_array("particles", &[GpuParticle::zeroed()], 16).unwrap();
        let second = ctx.push_uniform(&0u32).unwrap();
        assert!(second as u64 >= first as u64 + 16 * size_of::<GpuParticle>());

        let err = ctx.push_array("particles", &[GpuParticle::zeroed(); 3], 2).unwrap_err();
        assert!(matches!(err, RenderError::CapacityExceeded { resource: "particles", .. }));
    }
}
