//! Owning wrappers that return device objects when dropped

use std::fmt;
use std::sync::Arc;

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;

/// A device object that can be destroyed through [`GpuDevice`]
pub trait DeviceObject: Copy + fmt::Debug {
    fn release<D: GpuDevice + ?Sized>(self, device: &D);
}

impl DeviceObject for BufferHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_buffer(self);
    }
}

impl DeviceObject for TextureHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_texture(self);
    }
}

impl DeviceObject for SamplerHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_sampler(self);
    }
}

impl DeviceObject for RenderPassHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_render_pass(self);
    }
}

impl DeviceObject for FramebufferHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_framebuffer(self);
    }
}

impl DeviceObject for PipelineHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_pipeline(self);
    }
}

impl DeviceObject for DescriptorSetLayoutHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_descriptor_set_layout(self);
    }
}

impl DeviceObject for DescriptorSetHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.free_descriptor_set(self);
    }
}

impl DeviceObject for CommandBufferHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.free_command_buffer(self);
    }
}

impl DeviceObject for FenceHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_fence(self);
    }
}

impl DeviceObject for SemaphoreHandle {
    fn release<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_semaphore(self);
    }
}

/// Handle destroyed on drop
///
/// Destruction order among the fields of a struct follows declaration order,
/// so owners list dependents (framebuffers, sets) before what they reference.
pub struct Owned<D: GpuDevice, H: DeviceObject> {
    device: Arc<D>,
    handle: H,
}

impl<D: GpuDevice, H: DeviceObject> Owned<D, H> {
    pub fn new(device: &Arc<D>, handle: H) -> Self {
        Self {
            device: Arc::clone(device),
            handle,
        }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

impl<D: GpuDevice, H: DeviceObject> fmt::Debug for Owned<D, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

impl<D: GpuDevice, H: DeviceObject> Drop for Owned<D, H> {
    fn drop(&mut self) {
        self.handle.release(self.device.as_ref());
    }
}

/// Convenience constructors that wrap the freshly created handle
pub trait OwnedExt: GpuDevice + Sized {
    fn owned_buffer(self: &Arc<Self>, desc: &BufferDescriptor) -> crate::RenderResult<Owned<Self, BufferHandle>> {
        let handle = self.create_buffer(desc)?;
        Ok(Owned::new(self, handle))
    }

    fn owned_texture(self: &Arc<Self>, desc: &TextureDescriptor) -> crate::RenderResult<Owned<Self, TextureHandle>> {
        let handle = self.create_texture(desc)?;
        Ok(Owned::new(self, handle))
    }

    fn owned_sampler(self: &Arc<Self>, desc: &SamplerDescriptor) -> crate::RenderResult<Owned<Self, SamplerHandle>> {
        let handle = self.create_sampler(desc)?;
        Ok(Owned::new(self, handle))
    }

    fn owned_set_layout(
        self: &Arc<Self>,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> crate::RenderResult<Owned<Self, DescriptorSetLayoutHandle>> {
        let handle = self.create_descriptor_set_layout(desc)?;
        Ok(Owned::new(self, handle))
    }

    fn owned_descriptor_set(
        self: &Arc<Self>,
        layout: DescriptorSetLayoutHandle,
        writes: &[DescriptorWrite],
    ) -> crate::RenderResult<Owned<Self, DescriptorSetHandle>> {
        let handle = self.allocate_descriptor_set(layout)?;
        let set = Owned::new(self, handle);
        self.update_descriptor_set(handle, writes)?;
        Ok(set)
    }

    fn owned_pipeline(self: &Arc<Self>, desc: &PipelineDescriptor) -> crate::RenderResult<Owned<Self, PipelineHandle>> {
        let handle = self.create_pipeline(desc)?;
        Ok(Owned::new(self, handle))
    }

    fn owned_render_pass(
        self: &Arc<Self>,
        desc: &RenderPassDescriptor,
    ) -> crate::RenderResult<Owned<Self, RenderPassHandle>> {
        let handle = self.create_render_pass(desc)?;
        Ok(Owned::new(self, handle))
    }

    fn owned_framebuffer(
        self: &Arc<Self>,
        desc: &FramebufferDescriptor,
    ) -> crate::RenderResult<Owned<Self, FramebufferHandle>> {
        let handle = self.create_framebuffer(desc)?;
        Ok(Owned::new(self, handle))
    }
}

impl<D: GpuDevice> OwnedExt for D {}
