//! Presentable swapchain and the textures wrapping its images

use ash::vk;

use super::{convert, VkTexture, VulkanDevice, VulkanState};
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};

pub(super) struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub textures: Vec<TextureHandle>,
    pub info: SwapchainInfo,
}

impl Swapchain {
    pub fn empty() -> Self {
        Self {
            handle: vk::SwapchainKHR::null(),
            textures: Vec::new(),
            info: SwapchainInfo {
                extent: Extent2d::default(),
                format: TextureFormat::Bgra8UnormSrgb,
                image_count: 0,
                generation: 0,
            },
        }
    }
}

fn fail(what: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |e| convert::vk_error(e, what, RenderError::SwapchainCreationFailed)
}

/// Preferred surface formats, in order
const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<(vk::SurfaceFormatKHR, TextureFormat)> {
    let srgb = |f: &&vk::SurfaceFormatKHR| f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR;
    PREFERRED_FORMATS
        .iter()
        .find_map(|wanted| formats.iter().filter(srgb).find(|f| f.format == *wanted))
        .or_else(|| formats.iter().find(|f| convert::format_back(f.format).is_some()))
        .and_then(|f| convert::format_back(f.format).map(|format| (*f, format)))
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    modes
        .iter()
        .copied()
        .find(|&m| m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

impl VulkanDevice {
    /// Surface size as the platform reports it; falls back to the window
    /// size when the surface leaves the choice to the swapchain.
    pub(super) fn surface_extent(&self) -> RenderResult<Extent2d> {
        let capabilities = unsafe {
            self.surface_fn
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(|e| convert::vk_error(e, "surface capabilities", RenderError::SwapchainCreationFailed))?;
        if capabilities.current_extent.width == u32::MAX {
            Ok(Extent2d::from(self.window.inner_size()))
        } else {
            Ok(Extent2d::new(
                capabilities.current_extent.width,
                capabilities.current_extent.height,
            ))
        }
    }

    /// Replace the swapchain in `state` with one sized for `extent`.
    ///
    /// The device must be idle. Textures wrapping the old images are removed
    /// from the object table and the old swapchain is retired.
    pub(super) fn build_swapchain(&self, state: &mut VulkanState, extent: Extent2d) -> RenderResult<SwapchainInfo> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                self.surface_fn
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                    .map_err(fail("surface capabilities"))?,
                self.surface_fn
                    .get_physical_device_surface_formats(self.physical_device, self.surface)
                    .map_err(fail("surface formats"))?,
                self.surface_fn
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                    .map_err(fail("present modes"))?,
            )
        };

        let (surface_format, format) = choose_format(&formats).ok_or_else(|| {
            RenderError::SwapchainCreationFailed(format!("no supported surface format among {:?}", formats))
        })?;
        let present_mode = choose_present_mode(&present_modes, self.vsync);

        let image_extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        if image_extent.width == 0 || image_extent.height == 0 {
            return Err(RenderError::SwapchainCreationFailed(
                "surface has zero area".into(),
            ));
        }

        let max_images = if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        };
        let min_image_count = (capabilities.min_image_count + 1).min(max_images);

        let old = std::mem::replace(&mut state.swapchain, Swapchain::empty());
        let generation = old.info.generation + 1;
        state.swapchain.info.generation = old.info.generation;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.handle);

        let created = unsafe { self.swapchain_fn.create_swapchain(&create_info, None) };
        self.retire_swapchain(state, old);
        let handle = created.map_err(fail("create swapchain"))?;
        state.swapchain.handle = handle;

        let images = unsafe { self.swapchain_fn.get_swapchain_images(handle) }.map_err(fail("swapchain images"))?;
        let desc = TextureDescriptor {
            label: "Swapchain".into(),
            width: image_extent.width,
            height: image_extent.height,
            layers: 1,
            format,
            usage: TextureUsage::COLOR_ATTACHMENT,
        };
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(fail("swapchain view"))?;
            let id = state.alloc_id();
            state.textures.insert(
                id,
                VkTexture {
                    desc: desc.clone(),
                    image: *image,
                    view,
                    layer_views: Vec::new(),
                    allocation: None,
                },
            );
            state.swapchain.textures.push(TextureHandle(id));
        }

        state.swapchain.info = SwapchainInfo {
            extent: Extent2d::new(image_extent.width, image_extent.height),
            format,
            image_count: images.len() as u32,
            generation,
        };
        log::info!(
            "Swapchain {}x{} {:?} with {} images, {:?} (generation {})",
            image_extent.width,
            image_extent.height,
            format,
            images.len(),
            present_mode,
            state.swapchain.info.generation
        );
        Ok(state.swapchain.info)
    }

    /// Destroy a swapchain's views and handle. Its images go with it.
    pub(super) fn retire_swapchain(&self, state: &mut VulkanState, swapchain: Swapchain) {
        for texture in &swapchain.textures {
            if let Some(texture) = state.textures.remove(&texture.0) {
                unsafe { self.device.destroy_image_view(texture.view, None) };
            }
        }
        if swapchain.handle != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_fn.destroy_swapchain(swapchain.handle, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_prefers_srgb_bgra() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let (_, format) = choose_format(&formats).unwrap();
        assert_eq!(format, TextureFormat::Bgra8UnormSrgb);
    }

    #[test]
    fn test_falls_back_to_any_known_format() {
        let formats = [
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let (_, format) = choose_format(&formats).unwrap();
        assert_eq!(format, TextureFormat::Bgra8Unorm);
        assert!(choose_format(&[surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)]).is_none());
    }

    #[test]
    fn test_vsync_forces_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }
}
