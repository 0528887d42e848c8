//! Core backend abstraction traits
//!
//! [`GpuDevice`] is the seam between frame orchestration and the graphics API.
//! The Vulkan backend implements it for real hardware; the headless backend
//! implements it in memory so frame pacing can be exercised without a GPU.

use crate::backend::types::*;
use crate::error::RenderResult;

/// Main device trait
///
/// All methods take `&self`; implementations guard their internal state so a
/// device can be shared behind an `Arc` by the scheduler, the allocator and
/// the render graph at once.
pub trait GpuDevice: Send + Sync + 'static {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &DeviceCapabilities;

    // Swapchain

    fn swapchain(&self) -> SwapchainInfo;

    /// Size the surface currently wants; zero while minimized.
    fn current_surface_extent(&self) -> RenderResult<Extent2d>;

    /// Texture wrapping swapchain image `image_index`. Owned by the device and
    /// replaced on recreation.
    fn swapchain_texture(&self, image_index: u32) -> RenderResult<TextureHandle>;

    /// Rebuild the swapchain for `extent`. The caller guarantees no submitted
    /// work still references the old images.
    fn recreate_swapchain(&self, extent: Extent2d) -> RenderResult<SwapchainInfo>;

    /// Acquire the next presentable image, signalling `signal` when it is ready.
    ///
    /// Returns [`crate::RenderError::SurfaceStale`] when the swapchain no longer
    /// matches the surface.
    fn acquire_next_image(&self, signal: SemaphoreHandle) -> RenderResult<u32>;

    /// Queue `image_index` for presentation once `wait` is signalled.
    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentStatus>;

    // Resources

    fn create_buffer(&self, desc: &BufferDescriptor) -> RenderResult<BufferHandle>;
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> RenderResult<()>;
    fn destroy_buffer(&self, buffer: BufferHandle);

    fn create_texture(&self, desc: &TextureDescriptor) -> RenderResult<TextureHandle>;
    fn write_texture(
        &self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> RenderResult<()>;
    fn destroy_texture(&self, texture: TextureHandle);

    fn create_sampler(&self, desc: &SamplerDescriptor) -> RenderResult<SamplerHandle>;
    fn destroy_sampler(&self, sampler: SamplerHandle);

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> RenderResult<RenderPassHandle>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> RenderResult<FramebufferHandle>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> RenderResult<DescriptorSetLayoutHandle>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    /// Allocate from the fixed-size descriptor pool; exhaustion is a capacity error.
    fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle>;
    fn update_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> RenderResult<()>;
    fn free_descriptor_set(&self, set: DescriptorSetHandle);

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> RenderResult<PipelineHandle>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    // Synchronization

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle>;
    fn fence_signaled(&self, fence: FenceHandle) -> RenderResult<bool>;
    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RenderResult<()>;
    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()>;
    fn destroy_fence(&self, fence: FenceHandle);

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle>;
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    // Commands

    fn allocate_command_buffer(&self) -> RenderResult<CommandBufferHandle>;

    /// Reset `command_buffer` and record `commands` into it.
    fn record(&self, command_buffer: CommandBufferHandle, commands: &CommandList) -> RenderResult<()>;
    fn free_command_buffer(&self, command_buffer: CommandBufferHandle);

    fn submit(&self, submit: &SubmitInfo<'_>) -> RenderResult<()>;

    /// Block until all submitted work has completed.
    fn wait_idle(&self) -> RenderResult<()>;
}
