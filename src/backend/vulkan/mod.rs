//! Vulkan backend implementation using ash
//!
//! Every object lives in one table behind a mutex, keyed by the id inside its
//! handle. The same lock serializes queue and pool access, which Vulkan
//! requires to be externally synchronized. Fence waits release it.

mod commands;
mod convert;
mod pipeline;
mod resources;
mod swapchain;

use std::collections::HashMap;
use std::sync::Arc;

use ash::khr::{surface, swapchain as khr_swapchain};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use self::swapchain::Swapchain;
use crate::backend::traits::GpuDevice;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};

pub(super) struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    desc: BufferDescriptor,
}

pub(super) struct VkTexture {
    desc: TextureDescriptor,
    image: vk::Image,
    view: vk::ImageView,
    /// One view per array layer, for layered attachments
    layer_views: Vec<vk::ImageView>,
    /// `None` for swapchain images
    allocation: Option<Allocation>,
}

pub(super) struct VkSetLayout {
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

pub(super) struct VkDescriptorSet {
    set: vk::DescriptorSet,
    layout: u64,
}

pub(super) struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

/// Mutable device state, guarded by one lock
pub(super) struct VulkanState {
    next_id: u64,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    allocator: Option<Allocator>,
    swapchain: Swapchain,
    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkTexture>,
    samplers: HashMap<u64, vk::Sampler>,
    render_passes: HashMap<u64, vk::RenderPass>,
    framebuffers: HashMap<u64, vk::Framebuffer>,
    set_layouts: HashMap<u64, VkSetLayout>,
    descriptor_sets: HashMap<u64, VkDescriptorSet>,
    pipelines: HashMap<u64, VkPipeline>,
    fences: HashMap<u64, vk::Fence>,
    semaphores: HashMap<u64, vk::Semaphore>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
}

fn unknown(kind: &str, id: u64) -> RenderError {
    RenderError::InvalidHandle(format!("{} {}", kind, id))
}

impl VulkanState {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocator(&mut self) -> RenderResult<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| RenderError::ResourceCreationFailed("allocator already released".into()))
    }

    fn buffer(&self, handle: BufferHandle) -> RenderResult<&VkBuffer> {
        self.buffers.get(&handle.0).ok_or_else(|| unknown("buffer", handle.0))
    }

    fn texture(&self, handle: TextureHandle) -> RenderResult<&VkTexture> {
        self.textures.get(&handle.0).ok_or_else(|| unknown("texture", handle.0))
    }

    fn fence(&self, handle: FenceHandle) -> RenderResult<vk::Fence> {
        self.fences.get(&handle.0).copied().ok_or_else(|| unknown("fence", handle.0))
    }

    fn semaphore(&self, handle: SemaphoreHandle) -> RenderResult<vk::Semaphore> {
        self.semaphores
            .get(&handle.0)
            .copied()
            .ok_or_else(|| unknown("semaphore", handle.0))
    }

    fn command_buffer(&self, handle: CommandBufferHandle) -> RenderResult<vk::CommandBuffer> {
        self.command_buffers
            .get(&handle.0)
            .copied()
            .ok_or_else(|| unknown("command buffer", handle.0))
    }
}

/// A physical device that passed the suitability checks
struct Candidate {
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    capabilities: DeviceCapabilities,
}

/// Hardware device presenting to one window
pub struct VulkanDevice {
    state: Mutex<VulkanState>,
    capabilities: DeviceCapabilities,
    vsync: bool,
    max_descriptor_sets: u32,
    swapchain_fn: khr_swapchain::Device,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    surface_fn: surface::Instance,
    surface: vk::SurfaceKHR,
    instance: ash::Instance,
    _entry: ash::Entry,
    // The surface must not outlive the window
    window: Arc<winit::window::Window>,
}

impl VulkanDevice {
    /// Create an instance, a surface for `window`, the best suitable device,
    /// and a swapchain at the window's current size.
    pub fn new(window: Arc<winit::window::Window>, config: &RendererConfig) -> RenderResult<Self> {
        let init = |e: &dyn std::fmt::Display| RenderError::InitializationFailed(e.to_string());
        let entry = unsafe { ash::Entry::load() }.map_err(|e| init(&e))?;

        let display_handle = window.display_handle().map_err(|e| init(&e))?;
        let window_handle = window.window_handle().map_err(|e| init(&e))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Deferred Renderer")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"deferred-renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);
        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| init(&e))?;
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(extensions);
        let instance = unsafe { entry.create_instance(&instance_info, None) }.map_err(|e| init(&e))?;

        let surface_fn = surface::Instance::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display_handle.as_raw(), window_handle.as_raw(), None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(init(&e));
            }
        };

        let created = select_device(&instance, &surface_fn, surface)
            .and_then(|candidate| create_logical_device(&instance, &candidate).map(|device| (candidate, device)));
        let (candidate, device) = match created {
            Ok(created) => created,
            Err(e) => {
                unsafe {
                    surface_fn.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };
        log::info!(
            "Vulkan device: {} ({:?}), queue family {}",
            candidate.capabilities.name,
            candidate.capabilities.kind,
            candidate.queue_family
        );

        let queue = unsafe { device.get_device_queue(candidate.queue_family, 0) };
        let swapchain_fn = khr_swapchain::Device::new(&instance, &device);

        // From here on, Drop cleans up whatever was created.
        let mut this = Self {
            state: Mutex::new(VulkanState {
                next_id: 1,
                queue,
                command_pool: vk::CommandPool::null(),
                descriptor_pool: vk::DescriptorPool::null(),
                allocator: None,
                swapchain: Swapchain::empty(),
                buffers: HashMap::new(),
                textures: HashMap::new(),
                samplers: HashMap::new(),
                render_passes: HashMap::new(),
                framebuffers: HashMap::new(),
                set_layouts: HashMap::new(),
                descriptor_sets: HashMap::new(),
                pipelines: HashMap::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                command_buffers: HashMap::new(),
            }),
            capabilities: candidate.capabilities,
            vsync: config.vsync,
            max_descriptor_sets: config.max_descriptor_sets,
            swapchain_fn,
            device,
            physical_device: candidate.physical_device,
            surface_fn,
            surface,
            instance,
            _entry: entry,
            window,
        };
        this.create_pools(candidate.queue_family)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: this.instance.clone(),
            device: this.device.clone(),
            physical_device: this.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| RenderError::DeviceCreationFailed(e.to_string()))?;
        this.state.get_mut().allocator = Some(allocator);

        let size = Extent2d::from(this.window.inner_size());
        let extent = Extent2d::new(size.width.max(1), size.height.max(1));
        {
            let mut state = this.state.lock();
            this.build_swapchain(&mut state, extent)?;
        }
        Ok(this)
    }

    fn create_pools(&mut self, queue_family: u32) -> RenderResult<()> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { self.device.create_command_pool(&pool_info, None) }
            .map_err(|e| convert::vk_error(e, "command pool", RenderError::DeviceCreationFailed))?;
        self.state.get_mut().command_pool = command_pool;

        let max_sets = self.max_descriptor_sets;
        let pool_sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::SAMPLER,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: max_sets * 4,
        });
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let descriptor_pool = unsafe { self.device.create_descriptor_pool(&descriptor_pool_info, None) }
            .map_err(|e| convert::vk_error(e, "descriptor pool", RenderError::DeviceCreationFailed))?;
        self.state.get_mut().descriptor_pool = descriptor_pool;
        Ok(())
    }

    pub fn window(&self) -> &Arc<winit::window::Window> {
        &self.window
    }
}

fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    queue_families.iter().enumerate().find_map(|(index, family)| {
        let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let supports_surface = unsafe {
            surface_fn
                .get_physical_device_surface_support(physical_device, index as u32, surface)
                .unwrap_or(false)
        };
        (supports_graphics && supports_surface).then_some(index as u32)
    })
}

/// Check one physical device; the error explains a rejection.
fn evaluate_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Candidate, String> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    if properties.api_version < vk::API_VERSION_1_2 {
        return Err("Vulkan 1.2 is not supported".into());
    }
    let queue_family =
        find_queue_family(instance, physical_device, surface_fn, surface).ok_or("no graphics queue can present")?;

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map_err(|e| e.to_string())?;
    let has_swapchain = extensions
        .iter()
        .any(|ext| ext.extension_name_as_c_str().map_or(false, |name| name == khr_swapchain::NAME));
    if !has_swapchain {
        return Err("VK_KHR_swapchain is missing".into());
    }
    let formats = unsafe { surface_fn.get_physical_device_surface_formats(physical_device, surface) }
        .map_err(|e| e.to_string())?;
    if formats.is_empty() {
        return Err("surface reports no formats".into());
    }

    let features = unsafe { instance.get_physical_device_features(physical_device) };
    if features.sampler_anisotropy != vk::TRUE {
        return Err("anisotropic sampling is not supported".into());
    }
    let limits = properties.limits;
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown device".into());
    Ok(Candidate {
        physical_device,
        queue_family,
        capabilities: DeviceCapabilities {
            name,
            kind: convert::device_kind(properties.device_type),
            min_uniform_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_alignment: limits.min_storage_buffer_offset_alignment,
            max_anisotropy: limits.max_sampler_anisotropy,
            max_texture_dimension: limits.max_image_dimension2_d,
        },
    })
}

/// Pick the highest-ranked suitable device, discrete GPUs first.
fn select_device(
    instance: &ash::Instance,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<Candidate> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| convert::vk_error(e, "enumerate devices", RenderError::InitializationFailed))?;

    physical_devices
        .into_iter()
        .filter_map(|pd| match evaluate_device(instance, pd, surface_fn, surface) {
            Ok(candidate) => Some(candidate),
            Err(reason) => {
                let properties = unsafe { instance.get_physical_device_properties(pd) };
                let name = properties
                    .device_name_as_c_str()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                log::warn!("Skipping device {}: {}", name, reason);
                None
            }
        })
        .max_by_key(|candidate| candidate.capabilities.kind)
        .ok_or_else(|| RenderError::UnsupportedHardware("no device can render to this surface".into()))
}

fn create_logical_device(instance: &ash::Instance, candidate: &Candidate) -> RenderResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(candidate.queue_family)
        .queue_priorities(&queue_priorities);
    let device_extensions = [khr_swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        ..Default::default()
    };
    let device_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features);
    unsafe { instance.create_device(candidate.physical_device, &device_info, None) }
        .map_err(|e| convert::vk_error(e, "create device", RenderError::DeviceCreationFailed))
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn swapchain(&self) -> SwapchainInfo {
        self.state.lock().swapchain.info
    }

    fn current_surface_extent(&self) -> RenderResult<Extent2d> {
        self.surface_extent()
    }

    fn swapchain_texture(&self, image_index: u32) -> RenderResult<TextureHandle> {
        self.state
            .lock()
            .swapchain
            .textures
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| unknown("swapchain image", image_index as u64))
    }

    fn recreate_swapchain(&self, extent: Extent2d) -> RenderResult<SwapchainInfo> {
        if extent.is_empty() {
            return Err(RenderError::SwapchainCreationFailed(
                "cannot create a zero-sized swapchain".into(),
            ));
        }
        let mut state = self.state.lock();
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| convert::vk_error(e, "wait idle", RenderError::SwapchainCreationFailed))?;
        self.build_swapchain(&mut state, extent)
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> RenderResult<u32> {
        let state = self.state.lock();
        let semaphore = state.semaphore(signal)?;
        // Some platforms never report out-of-date; compare sizes ourselves.
        if self.surface_extent()? != state.swapchain.info.extent {
            return Err(RenderError::SurfaceStale);
        }
        let (image, _suboptimal) = unsafe {
            self.swapchain_fn
                .acquire_next_image(state.swapchain.handle, u64::MAX, semaphore, vk::Fence::null())
        }
        .map_err(|e| convert::vk_error(e, "acquire", RenderError::SwapchainCreationFailed))?;
        Ok(image)
    }

    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentStatus> {
        let state = self.state.lock();
        let wait_semaphores = [state.semaphore(wait)?];
        let swapchains = [state.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        match unsafe { self.swapchain_fn.queue_present(state.queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(e) => Err(convert::vk_error(e, "present", RenderError::SwapchainCreationFailed)),
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> RenderResult<BufferHandle> {
        self.create_buffer_object(&mut self.state.lock(), desc)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.write_buffer_object(&mut self.state.lock(), buffer, offset, data)
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        self.read_buffer_object(&self.state.lock(), buffer, offset, out)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.destroy_buffer_object(&mut self.state.lock(), buffer)
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        self.create_texture_object(&mut self.state.lock(), desc)
    }

    fn write_texture(&self, texture: TextureHandle, region: TextureRegion, data: &[u8]) -> RenderResult<()> {
        self.write_texture_object(&mut self.state.lock(), texture, region, data)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.destroy_texture_object(&mut self.state.lock(), texture)
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> RenderResult<SamplerHandle> {
        self.create_sampler_object(&mut self.state.lock(), desc)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        if let Some(sampler) = self.state.lock().samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> RenderResult<RenderPassHandle> {
        self.create_render_pass_object(&mut self.state.lock(), desc)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        if let Some(render_pass) = self.state.lock().render_passes.remove(&render_pass.0) {
            unsafe { self.device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> RenderResult<FramebufferHandle> {
        self.create_framebuffer_object(&mut self.state.lock(), desc)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        if let Some(framebuffer) = self.state.lock().framebuffers.remove(&framebuffer.0) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> RenderResult<DescriptorSetLayoutHandle> {
        self.create_set_layout_object(&mut self.state.lock(), desc)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.state.lock().set_layouts.remove(&layout.0) {
            unsafe { self.device.destroy_descriptor_set_layout(layout.layout, None) };
        }
    }

    fn allocate_descriptor_set(&self, layout: DescriptorSetLayoutHandle) -> RenderResult<DescriptorSetHandle> {
        self.allocate_set_object(&mut self.state.lock(), layout)
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()> {
        self.update_set_object(&self.state.lock(), set, writes)
    }

    fn free_descriptor_set(&self, set: DescriptorSetHandle) {
        let mut state = self.state.lock();
        if let Some(set) = state.descriptor_sets.remove(&set.0) {
            if let Err(e) = unsafe { self.device.free_descriptor_sets(state.descriptor_pool, &[set.set]) } {
                log::warn!("Failed to free descriptor set: {}", e);
            }
        }
    }

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> RenderResult<PipelineHandle> {
        // Shader compilation runs before taking the lock.
        let modules = self.compile_program(desc)?;
        let created = self.create_pipeline_object(&mut self.state.lock(), desc, &modules);
        for (_, module) in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
        created
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        if let Some(pipeline) = self.state.lock().pipelines.remove(&pipeline.0) {
            unsafe {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
        }
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .map_err(|e| convert::vk_error(e, "fence", RenderError::ResourceCreationFailed))?;
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn fence_signaled(&self, fence: FenceHandle) -> RenderResult<bool> {
        let fence = self.state.lock().fence(fence)?;
        unsafe { self.device.get_fence_status(fence) }
            .map_err(|e| convert::vk_error(e, "fence status", RenderError::ResourceCreationFailed))
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RenderResult<()> {
        let fence = self.state.lock().fence(fence)?;
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RenderError::Timeout("fence")),
            Err(e) => Err(convert::vk_error(e, "wait for fence", RenderError::ResourceCreationFailed)),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()> {
        let fence = self.state.lock().fence(fence)?;
        unsafe { self.device.reset_fences(&[fence]) }
            .map_err(|e| convert::vk_error(e, "reset fence", RenderError::ResourceCreationFailed))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if let Some(fence) = self.state.lock().fences.remove(&fence.0) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(|e| convert::vk_error(e, "semaphore", RenderError::ResourceCreationFailed))?;
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        if let Some(semaphore) = self.state.lock().semaphores.remove(&semaphore.0) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn allocate_command_buffer(&self) -> RenderResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(state.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| convert::vk_error(e, "command buffer", RenderError::ResourceCreationFailed))?
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::ResourceCreationFailed("no command buffer allocated".into()))?;
        let id = state.alloc_id();
        state.command_buffers.insert(id, command_buffer);
        Ok(CommandBufferHandle(id))
    }

    fn record(&self, command_buffer: CommandBufferHandle, commands: &CommandList) -> RenderResult<()> {
        let state = self.state.lock();
        let cb = state.command_buffer(command_buffer)?;
        self.record_commands(&state, cb, commands)
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        let mut state = self.state.lock();
        if let Some(cb) = state.command_buffers.remove(&command_buffer.0) {
            unsafe { self.device.free_command_buffers(state.command_pool, &[cb]) };
        }
    }

    fn submit(&self, submit: &SubmitInfo<'_>) -> RenderResult<()> {
        let state = self.state.lock();
        let command_buffers = [state.command_buffer(submit.command_buffer)?];
        let wait_semaphores = submit
            .wait
            .iter()
            .map(|(semaphore, _)| state.semaphore(*semaphore))
            .collect::<RenderResult<Vec<_>>>()?;
        let wait_stages: Vec<_> = submit
            .wait
            .iter()
            .map(|(_, stage)| convert::pipeline_stage(*stage))
            .collect();
        let signal_semaphores = submit
            .signal
            .iter()
            .map(|semaphore| state.semaphore(*semaphore))
            .collect::<RenderResult<Vec<_>>>()?;
        let fence = match submit.fence {
            Some(fence) => state.fence(fence)?,
            None => vk::Fence::null(),
        };
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe { self.device.queue_submit(state.queue, &[submit_info], fence) }
            .map_err(|e| convert::vk_error(e, "queue submit", RenderError::ResourceCreationFailed))
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let _state = self.state.lock();
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| convert::vk_error(e, "wait idle", RenderError::ResourceCreationFailed))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        unsafe {
            let _ = self.device.device_wait_idle();

            let swapchain = std::mem::replace(&mut state.swapchain, Swapchain::empty());
            for texture in &swapchain.textures {
                if let Some(texture) = state.textures.remove(&texture.0) {
                    self.device.destroy_image_view(texture.view, None);
                }
            }

            if let Some(mut allocator) = state.allocator.take() {
                for (_, buffer) in state.buffers.drain() {
                    self.device.destroy_buffer(buffer.buffer, None);
                    if let Some(allocation) = buffer.allocation {
                        let _ = allocator.free(allocation);
                    }
                }
                for (_, texture) in state.textures.drain() {
                    for view in texture.layer_views {
                        self.device.destroy_image_view(view, None);
                    }
                    self.device.destroy_image_view(texture.view, None);
                    self.device.destroy_image(texture.image, None);
                    if let Some(allocation) = texture.allocation {
                        let _ = allocator.free(allocation);
                    }
                }
                // Dropped before the device
                drop(allocator);
            }

            for (_, sampler) in state.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, framebuffer) in state.framebuffers.drain() {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for (_, pipeline) in state.pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, render_pass) in state.render_passes.drain() {
                self.device.destroy_render_pass(render_pass, None);
            }
            state.descriptor_sets.clear();
            for (_, layout) in state.set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout.layout, None);
            }
            self.device.destroy_descriptor_pool(state.descriptor_pool, None);
            state.command_buffers.clear();
            self.device.destroy_command_pool(state.command_pool, None);

            for (_, fence) in state.fences.drain() {
                self.device.destroy_fence(fence, None);
            }
            for (_, semaphore) in state.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }

            if swapchain.handle != vk::SwapchainKHR::null() {
                self.swapchain_fn.destroy_swapchain(swapchain.handle, None);
            }

            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan device destroyed");
    }
}
