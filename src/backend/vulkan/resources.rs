//! Buffers, textures and samplers backed by gpu-allocator memory

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};

use super::{convert, unknown, VkBuffer, VkTexture, VulkanDevice, VulkanState};
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};

fn creation(what: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |e| convert::vk_error(e, what, RenderError::ResourceCreationFailed)
}

fn allocation_error(e: gpu_allocator::AllocationError) -> RenderError {
    match e {
        gpu_allocator::AllocationError::OutOfMemory => RenderError::OutOfMemory,
        other => RenderError::ResourceCreationFailed(other.to_string()),
    }
}

impl VulkanDevice {
    pub(super) fn create_buffer_object(
        &self,
        state: &mut VulkanState,
        desc: &BufferDescriptor,
    ) -> RenderResult<BufferHandle> {
        if desc.size == 0 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        let mut usage = convert::buffer_usage(desc.usage);
        if desc.location == MemoryLocation::DeviceLocal {
            // Host writes go through a staging copy.
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        let (buffer, allocation) = self.allocate_buffer(state, &desc.label, desc.size, usage, convert::memory_location(desc))?;
        let id = state.alloc_id();
        state.buffers.insert(
            id,
            VkBuffer {
                buffer,
                allocation: Some(allocation),
                desc: desc.clone(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn allocate_buffer(
        &self,
        state: &mut VulkanState,
        label: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: gpu_allocator::MemoryLocation,
    ) -> RenderResult<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(creation("create buffer"))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocated = state.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: label,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(allocation_error)
        });
        let allocation = match allocated {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) } {
            self.release_buffer(state, buffer, Some(allocation));
            return Err(creation("bind buffer memory")(e));
        }
        Ok((buffer, allocation))
    }

    fn release_buffer(&self, state: &mut VulkanState, buffer: vk::Buffer, allocation: Option<Allocation>) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let (Some(allocation), Ok(allocator)) = (allocation, state.allocator()) {
            if let Err(e) = allocator.free(allocation) {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
    }

    pub(super) fn write_buffer_object(
        &self,
        state: &mut VulkanState,
        handle: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        let end = offset + data.len() as u64;
        let target = state.buffers.get_mut(&handle.0).ok_or_else(|| unknown("buffer", handle.0))?;
        if end > target.desc.size {
            return Err(RenderError::capacity("buffer write", end, target.desc.size));
        }
        if let Some(mapped) = target.allocation.as_mut().and_then(|a| a.mapped_slice_mut()) {
            mapped[offset as usize..end as usize].copy_from_slice(data);
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }

        let dst = target.buffer;
        let (staging, mut staging_memory) = self.allocate_buffer(
            state,
            "Staging",
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            gpu_allocator::MemoryLocation::CpuToGpu,
        )?;
        if let Some(mapped) = staging_memory.mapped_slice_mut() {
            mapped[..data.len()].copy_from_slice(data);
        }
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: data.len() as u64,
        };
        let copied = self.immediate(state, |cb| unsafe {
            self.device.cmd_copy_buffer(cb, staging, dst, &[region]);
        });
        self.release_buffer(state, staging, Some(staging_memory));
        copied
    }

    pub(super) fn read_buffer_object(
        &self,
        state: &VulkanState,
        handle: BufferHandle,
        offset: u64,
        out: &mut [u8],
    ) -> RenderResult<()> {
        let source = state.buffer(handle)?;
        let end = offset + out.len() as u64;
        if end > source.desc.size {
            return Err(RenderError::capacity("buffer read", end, source.desc.size));
        }
        let mapped = source
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or_else(|| RenderError::InvalidHandle(format!("buffer '{}' is not host visible", source.desc.label)))?;
        out.copy_from_slice(&mapped[offset as usize..end as usize]);
        Ok(())
    }

    pub(super) fn destroy_buffer_object(&self, state: &mut VulkanState, handle: BufferHandle) {
        if let Some(buffer) = state.buffers.remove(&handle.0) {
            self.release_buffer(state, buffer.buffer, buffer.allocation);
        }
    }

    pub(super) fn create_texture_object(
        &self,
        state: &mut VulkanState,
        desc: &TextureDescriptor,
    ) -> RenderResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture '{}' has zero size",
                desc.label
            )));
        }
        let max = self.capabilities.max_texture_dimension;
        if desc.width.max(desc.height) > max {
            return Err(RenderError::capacity(
                "texture dimension",
                desc.width.max(desc.height) as u64,
                max as u64,
            ));
        }

        let format = convert::format(desc.format);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(desc.layers)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(convert::image_usage(desc))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(creation("create image"))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocated = state.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: &desc.label,
                    requirements,
                    location: gpu_allocator::MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(allocation_error)
        });
        let allocation = match allocated {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // Registered first so a failure below is cleaned up by destroy.
        let id = state.alloc_id();
        state.textures.insert(
            id,
            VkTexture {
                desc: desc.clone(),
                image,
                view: vk::ImageView::null(),
                layer_views: Vec::new(),
                allocation: Some(allocation),
            },
        );
        let handle = TextureHandle(id);
        if let Err(e) = self.finish_texture(state, handle) {
            self.destroy_texture_object(state, handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Bind memory, create views and move sampled textures into their
    /// sampling layout.
    fn finish_texture(&self, state: &mut VulkanState, handle: TextureHandle) -> RenderResult<()> {
        let texture = state.textures.get_mut(&handle.0).ok_or_else(|| unknown("texture", handle.0))?;
        let desc = texture.desc.clone();
        let image = texture.image;
        if let Some(allocation) = &texture.allocation {
            unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
                .map_err(creation("bind image memory"))?;
        }

        let format = convert::format(desc.format);
        let aspect_mask = convert::aspect(desc.format);
        let create_view = |view_type: vk::ImageViewType, base_array_layer: u32, layer_count: u32| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(view_type)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer,
                    layer_count,
                });
            unsafe { self.device.create_image_view(&view_info, None) }.map_err(creation("create image view"))
        };

        let view_type = if desc.layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        texture.view = create_view(view_type, 0, desc.layers)?;
        let attachment = desc.usage.intersects(TextureUsage::COLOR_ATTACHMENT | TextureUsage::DEPTH_ATTACHMENT);
        if desc.layers > 1 && attachment {
            for layer in 0..desc.layers {
                let view = create_view(vk::ImageViewType::TYPE_2D, layer, 1)?;
                texture.layer_views.push(view);
            }
        }

        if desc.usage.contains(TextureUsage::SAMPLED) {
            let layout = convert::sampled_layout(&desc);
            self.immediate(state, |cb| {
                self.transition(cb, image, aspect_mask, desc.layers, vk::ImageLayout::UNDEFINED, layout);
            })?;
        }
        Ok(())
    }

    pub(super) fn write_texture_object(
        &self,
        state: &mut VulkanState,
        handle: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> RenderResult<()> {
        let target = state.texture(handle)?;
        let desc = target.desc.clone();
        let image = target.image;
        if region.x + region.width > desc.width
            || region.y + region.height > desc.height
            || region.layer >= desc.layers
        {
            return Err(RenderError::ResourceCreationFailed(format!(
                "upload region {:?} outside texture '{}'",
                region, desc.label
            )));
        }
        let expected = (region.width * region.height * desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture '{}' upload expects {} bytes, got {}",
                desc.label,
                expected,
                data.len()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let (staging, mut staging_memory) = self.allocate_buffer(
            state,
            "Texture Staging",
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            gpu_allocator::MemoryLocation::CpuToGpu,
        )?;
        if let Some(mapped) = staging_memory.mapped_slice_mut() {
            mapped[..data.len()].copy_from_slice(data);
        }

        let aspect_mask = convert::aspect(desc.format);
        let (before, after) = if desc.usage.contains(TextureUsage::SAMPLED) {
            let layout = convert::sampled_layout(&desc);
            (layout, layout)
        } else {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        };
        let copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask,
                mip_level: 0,
                base_array_layer: region.layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D {
                x: region.x as i32,
                y: region.y as i32,
                z: 0,
            },
            image_extent: vk::Extent3D {
                width: region.width,
                height: region.height,
                depth: 1,
            },
        };
        let copied = self.immediate(state, |cb| unsafe {
            self.transition(cb, image, aspect_mask, desc.layers, before, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            self.device
                .cmd_copy_buffer_to_image(cb, staging, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[copy]);
            self.transition(cb, image, aspect_mask, desc.layers, vk::ImageLayout::TRANSFER_DST_OPTIMAL, after);
        });
        self.release_buffer(state, staging, Some(staging_memory));
        copied
    }

    pub(super) fn destroy_texture_object(&self, state: &mut VulkanState, handle: TextureHandle) {
        if state.swapchain.textures.contains(&handle) {
            log::warn!("Swapchain images are owned by the swapchain");
            return;
        }
        let Some(texture) = state.textures.remove(&handle.0) else {
            return;
        };
        unsafe {
            for view in texture.layer_views {
                self.device.destroy_image_view(view, None);
            }
            self.device.destroy_image_view(texture.view, None);
            self.device.destroy_image(texture.image, None);
        }
        if let (Some(allocation), Ok(allocator)) = (texture.allocation, state.allocator()) {
            if let Err(e) = allocator.free(allocation) {
                log::warn!("Failed to free texture memory: {}", e);
            }
        }
    }

    pub(super) fn create_sampler_object(
        &self,
        state: &mut VulkanState,
        desc: &SamplerDescriptor,
    ) -> RenderResult<SamplerHandle> {
        let anisotropy = desc
            .anisotropy
            .map(|a| a.clamp(1.0, self.capabilities.max_anisotropy));
        let mipmap_mode = match desc.min_filter {
            FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
        };
        let address_mode = convert::address_mode(desc.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert::filter(desc.mag_filter))
            .min_filter(convert::filter(desc.min_filter))
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare.is_some())
            .compare_op(desc.compare.map(convert::compare_op).unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }.map_err(creation("create sampler"))?;
        let id = state.alloc_id();
        state.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }
}
