//! In-memory backend
//!
//! `HeadlessDevice` keeps every resource in host memory and queues submissions
//! instead of executing them. Submitted work completes only when the CPU waits
//! for a fence (everything up to that fence) or for the whole device, which
//! makes in-flight overlap deterministic and observable:
//!
//! - every device call is appended to an event log with a logical clock,
//! - host writes that overlap ranges read by still-pending submissions are
//!   recorded as hazards,
//! - API misuse (semaphore reuse, destroying in-use objects, unbalanced render
//!   passes) is recorded as a validation error instead of crashing.
//!
//! Surface events (resize, stale, suboptimal presents) can be injected. Only
//! the id-buffer pipeline is rasterized; other draws are validated and counted.

mod raster;

use std::collections::{HashMap, VecDeque};
use std::ops::Range;

use parking_lot::Mutex;

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};

/// Creation options for [`HeadlessDevice`]
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub extent: Extent2d,
    pub image_count: u32,
    pub format: TextureFormat,
    pub max_descriptor_sets: u32,
    pub min_uniform_alignment: u64,
    pub min_storage_alignment: u64,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            extent: Extent2d::new(320, 240),
            image_count: 3,
            format: TextureFormat::Bgra8UnormSrgb,
            max_descriptor_sets: 4096,
            min_uniform_alignment: 256,
            min_storage_alignment: 64,
        }
    }
}

/// Something that happened on the device, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Acquired { image: u32 },
    Submitted { submission: u64, fence: Option<FenceHandle> },
    Completed { submission: u64 },
    FenceReset { fence: FenceHandle },
    FenceWaited { fence: FenceHandle, timeout_ns: u64 },
    Presented { image: u32, status: PresentStatus },
    PresentFailed { image: u32 },
    SwapchainRecreated { generation: u64, extent: Extent2d },
    BufferWrite { buffer: BufferHandle, range: Range<u64> },
    WaitIdle,
}

/// Event stamped with the logical clock
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub tick: u64,
    pub event: DeviceEvent,
}

/// Host write into memory a pending submission still reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hazard {
    pub buffer: BufferHandle,
    pub written: Range<u64>,
    pub read: Range<u64>,
    pub submission: u64,
}

/// Counts of live objects, used to detect leaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    /// Excludes swapchain images
    pub textures: usize,
    pub samplers: usize,
    pub render_passes: usize,
    pub framebuffers: usize,
    pub pipelines: usize,
    pub set_layouts: usize,
    pub descriptor_sets: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub command_buffers: usize,
}

impl LiveObjects {
    pub fn total(&self) -> usize {
        self.buffers
            + self.textures
            + self.samplers
            + self.render_passes
            + self.framebuffers
            + self.pipelines
            + self.set_layouts
            + self.descriptor_sets
            + self.fences
            + self.semaphores
            + self.command_buffers
    }
}

struct HeadlessBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

struct HeadlessTexture {
    desc: TextureDescriptor,
    /// Per layer; materialized on first access
    layers: Vec<Option<Vec<u8>>>,
    pending_clear: Vec<Option<ClearValue>>,
    swapchain: bool,
}

impl HeadlessTexture {
    fn new(desc: TextureDescriptor, swapchain: bool) -> Self {
        let layers = desc.layers.max(1) as usize;
        Self {
            desc,
            layers: vec![None; layers],
            pending_clear: vec![None; layers],
            swapchain,
        }
    }

    fn layer_size(&self) -> usize {
        (self.desc.width * self.desc.height * self.desc.format.bytes_per_pixel()) as usize
    }

    fn clear_layer(&mut self, layer: usize, value: ClearValue) {
        if layer < self.layers.len() {
            self.layers[layer] = None;
            self.pending_clear[layer] = Some(value);
        }
    }

    fn layer_mut(&mut self, layer: usize) -> &mut Vec<u8> {
        let size = self.layer_size();
        let format = self.desc.format;
        let clear = self.pending_clear[layer].take();
        self.layers[layer].get_or_insert_with(|| {
            let mut data = vec![0u8; size];
            if let Some(texel) = clear.and_then(|value| encode_clear(format, value)) {
                for chunk in data.chunks_exact_mut(texel.len()) {
                    chunk.copy_from_slice(&texel);
                }
            }
            data
        })
    }
}

/// Texel bytes for a clear value, when the format is simulated
fn encode_clear(format: TextureFormat, value: ClearValue) -> Option<Vec<u8>> {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match (format, value) {
        (TextureFormat::R32Uint, ClearValue::ColorUint(v)) => Some(v[0].to_le_bytes().to_vec()),
        (TextureFormat::Depth32Float, ClearValue::Depth(d)) => Some(d.to_le_bytes().to_vec()),
        (TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb, ClearValue::Color(c)) => {
            Some(vec![unorm(c[0]), unorm(c[1]), unorm(c[2]), unorm(c[3])])
        }
        (TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb, ClearValue::Color(c)) => {
            Some(vec![unorm(c[2]), unorm(c[1]), unorm(c[0]), unorm(c[3])])
        }
        // Shaded HDR targets are not simulated.
        _ => None,
    }
}

struct HeadlessSet {
    layout: DescriptorSetLayoutHandle,
    resources: HashMap<u32, DescriptorResource>,
}

#[derive(Clone)]
struct BufferRange {
    buffer: BufferHandle,
    range: Range<u64>,
}

struct PendingSubmission {
    id: u64,
    command_buffer: CommandBufferHandle,
    commands: CommandList,
    fence: Option<FenceHandle>,
    reads: Vec<BufferRange>,
    writes: Vec<BufferRange>,
    framebuffers: Vec<FramebufferHandle>,
}

struct HeadlessSwapchain {
    info: SwapchainInfo,
    images: Vec<TextureHandle>,
    acquired: Vec<bool>,
    next: u32,
}

struct HeadlessState {
    next_id: u64,
    clock: u64,
    buffers: HashMap<BufferHandle, HeadlessBuffer>,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    samplers: HashMap<SamplerHandle, SamplerDescriptor>,
    render_passes: HashMap<RenderPassHandle, RenderPassDescriptor>,
    framebuffers: HashMap<FramebufferHandle, FramebufferDescriptor>,
    set_layouts: HashMap<DescriptorSetLayoutHandle, DescriptorSetLayoutDescriptor>,
    sets: HashMap<DescriptorSetHandle, HeadlessSet>,
    pipelines: HashMap<PipelineHandle, PipelineDescriptor>,
    fences: HashMap<FenceHandle, bool>,
    semaphores: HashMap<SemaphoreHandle, bool>,
    command_buffers: HashMap<CommandBufferHandle, Option<CommandList>>,
    queue: VecDeque<PendingSubmission>,
    next_submission: u64,
    last_submission: Option<CommandList>,
    swapchain: HeadlessSwapchain,
    surface_extent: Extent2d,
    surface_stale: bool,
    suboptimal_presents: u32,
    max_descriptor_sets: u32,
    events: Vec<TimedEvent>,
    hazards: Vec<Hazard>,
    validation_errors: Vec<String>,
}

impl HeadlessState {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn log(&mut self, event: DeviceEvent) {
        self.clock += 1;
        self.events.push(TimedEvent {
            tick: self.clock,
            event,
        });
    }

    fn invalid(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("Headless validation: {}", message);
        self.validation_errors.push(message);
    }

    fn build_swapchain(&mut self, extent: Extent2d, format: TextureFormat, image_count: u32, generation: u64) {
        let mut images = Vec::with_capacity(image_count as usize);
        for i in 0..image_count {
            let handle = TextureHandle(self.alloc_id());
            let desc = TextureDescriptor {
                label: format!("Swapchain Image {}", i),
                width: extent.width,
                height: extent.height,
                layers: 1,
                format,
                usage: TextureUsage::COLOR_ATTACHMENT,
            };
            self.textures.insert(handle, HeadlessTexture::new(desc, true));
            images.push(handle);
        }
        self.swapchain = HeadlessSwapchain {
            info: SwapchainInfo {
                extent,
                format,
                image_count,
                generation,
            },
            acquired: vec![false; images.len()],
            images,
            next: 0,
        };
    }

    /// Buffer ranges a descriptor set binding resolves to with `dynamic_offsets`
    fn bound_ranges(&self, set: DescriptorSetHandle, dynamic_offsets: &[u32]) -> Vec<(u32, BufferRange)> {
        let Some(set) = self.sets.get(&set) else {
            return Vec::new();
        };
        let Some(layout) = self.set_layouts.get(&set.layout) else {
            return Vec::new();
        };
        let mut bindings = layout.bindings.clone();
        bindings.sort_by_key(|b| b.binding);

        let mut dynamic = dynamic_offsets.iter();
        let mut ranges = Vec::new();
        for binding in bindings {
            let extra = if binding.ty.is_dynamic() {
                dynamic.next().copied().unwrap_or(0) as u64
            } else {
                0
            };
            if let Some(DescriptorResource::Buffer { buffer, offset, size }) =
                set.resources.get(&binding.binding)
            {
                let start = offset + extra;
                ranges.push((
                    binding.binding,
                    BufferRange {
                        buffer: *buffer,
                        range: start..start + size,
                    },
                ));
            }
        }
        ranges
    }

    /// Validate a command list and collect the memory it touches.
    fn analyze(&mut self, commands: &CommandList) -> (Vec<BufferRange>, Vec<BufferRange>, Vec<FramebufferHandle>) {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        let mut framebuffers = Vec::new();
        let mut errors = Vec::new();
        let mut pass: Option<(RenderPassHandle, u32)> = None;
        let mut pipeline_bound = false;

        for command in commands.commands() {
            match command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    clear_values,
                    ..
                } => {
                    if pass.is_some() {
                        errors.push("render pass begun inside another render pass".to_string());
                    }
                    match self.render_passes.get(render_pass) {
                        Some(desc) if desc.attachments.len() != clear_values.len() => errors.push(format!(
                            "render pass '{}' expects {} clear values, got {}",
                            desc.label,
                            desc.attachments.len(),
                            clear_values.len()
                        )),
                        Some(_) => {}
                        None => errors.push(format!("unknown render pass {:?}", render_pass)),
                    }
                    if !self.framebuffers.contains_key(framebuffer) {
                        errors.push(format!("unknown framebuffer {:?}", framebuffer));
                    }
                    framebuffers.push(*framebuffer);
                    pass = Some((*render_pass, 0));
                    pipeline_bound = false;
                }
                Command::NextSubpass => match pass.as_mut() {
                    Some((_, subpass)) => *subpass += 1,
                    None => errors.push("next subpass outside a render pass".to_string()),
                },
                Command::EndRenderPass => {
                    match pass.take() {
                        Some((render_pass, subpass)) => {
                            let expected = self
                                .render_passes
                                .get(&render_pass)
                                .map(|d| d.subpasses.len() as u32)
                                .unwrap_or(0);
                            if subpass + 1 != expected {
                                errors.push(format!(
                                    "render pass ended in subpass {} of {}",
                                    subpass, expected
                                ));
                            }
                        }
                        None => errors.push("end of a render pass that was not begun".to_string()),
                    }
                }
                Command::BindPipeline(pipeline) => match (self.pipelines.get(pipeline), pass) {
                    (Some(desc), Some((render_pass, subpass))) => {
                        if desc.render_pass != render_pass || desc.subpass != subpass {
                            errors.push(format!(
                                "pipeline '{}' built for subpass {} bound in subpass {}",
                                desc.label, desc.subpass, subpass
                            ));
                        }
                        pipeline_bound = true;
                    }
                    (None, _) => errors.push(format!("unknown pipeline {:?}", pipeline)),
                    (_, None) => errors.push("pipeline bound outside a render pass".to_string()),
                },
                Command::BindDescriptorSet {
                    set,
                    dynamic_offsets,
                    ..
                } => {
                    if !self.sets.contains_key(set) {
                        errors.push(format!("unknown descriptor set {:?}", set));
                    }
                    reads.extend(self.bound_ranges(*set, dynamic_offsets).into_iter().map(|(_, r)| r));
                }
                Command::BindVertexBuffer { buffer, offset, size }
                | Command::BindIndexBuffer { buffer, offset, size } => {
                    reads.push(BufferRange {
                        buffer: *buffer,
                        range: *offset..offset + size,
                    });
                }
                Command::Draw { .. } | Command::DrawIndexed { .. } => {
                    if pass.is_none() || !pipeline_bound {
                        errors.push("draw without a render pass and pipeline".to_string());
                    }
                }
                Command::CopyTextureToBuffer {
                    buffer,
                    buffer_offset,
                    texture,
                    ..
                } => {
                    if pass.is_some() {
                        errors.push("copy recorded inside a render pass".to_string());
                    }
                    let texel = self
                        .textures
                        .get(texture)
                        .map(|t| t.desc.format.bytes_per_pixel() as u64)
                        .unwrap_or(4);
                    writes.push(BufferRange {
                        buffer: *buffer,
                        range: *buffer_offset..buffer_offset + texel,
                    });
                }
                Command::SetViewport(_) | Command::SetScissor(_) => {}
            }
        }
        if pass.is_some() {
            errors.push("command list ends inside a render pass".to_string());
        }
        for error in errors {
            self.invalid(error);
        }
        (reads, writes, framebuffers)
    }

    /// Execute pending submissions in order until `until` (inclusive) has run.
    fn complete_through(&mut self, until: Option<u64>) {
        while let Some(submission) = self.queue.pop_front() {
            let id = submission.id;
            if let Err(message) = self.execute(&submission.commands) {
                self.invalid(message);
            }
            if let Some(fence) = submission.fence {
                if let Some(signaled) = self.fences.get_mut(&fence) {
                    *signaled = true;
                }
            }
            self.log(DeviceEvent::Completed { submission: id });
            if Some(id) == until {
                break;
            }
        }
    }

    fn buffer_pending(&self, buffer: BufferHandle) -> bool {
        self.queue.iter().any(|s| {
            s.reads.iter().chain(s.writes.iter()).any(|r| r.buffer == buffer)
        })
    }
}

fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}

/// In-memory [`GpuDevice`] implementation
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    pub fn new(options: HeadlessOptions) -> Self {
        let capabilities = DeviceCapabilities {
            name: "Headless".to_string(),
            kind: DeviceKind::Cpu,
            min_uniform_alignment: options.min_uniform_alignment,
            min_storage_alignment: options.min_storage_alignment,
            max_anisotropy: 16.0,
            max_texture_dimension: 16384,
        };
        let mut state = HeadlessState {
            next_id: 1,
            clock: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            render_passes: HashMap::new(),
            framebuffers: HashMap::new(),
            set_layouts: HashMap::new(),
            sets: HashMap::new(),
            pipelines: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            command_buffers: HashMap::new(),
            queue: VecDeque::new(),
            next_submission: 0,
            last_submission: None,
            swapchain: HeadlessSwapchain {
                info: SwapchainInfo {
                    extent: options.extent,
                    format: options.format,
                    image_count: 0,
                    generation: 0,
                },
                images: Vec::new(),
                acquired: Vec::new(),
                next: 0,
            },
            surface_extent: options.extent,
            surface_stale: false,
            suboptimal_presents: 0,
            max_descriptor_sets: options.max_descriptor_sets,
            events: Vec::new(),
            hazards: Vec::new(),
            validation_errors: Vec::new(),
        };
        state.build_swapchain(options.extent, options.format, options.image_count.max(1), 0);
        log::info!(
            "Headless device created: {}x{}, {} swapchain images",
            options.extent.width,
            options.extent.height,
            options.image_count
        );
        Self {
            capabilities,
            state: Mutex::new(state),
        }
    }

    /// Change the surface size; the swapchain goes stale until recreated.
    pub fn set_surface_extent(&self, extent: Extent2d) {
        self.state.lock().surface_extent = extent;
    }

    pub fn surface_extent(&self) -> Extent2d {
        self.state.lock().surface_extent
    }

    /// Make acquire and present report a stale surface until the next recreation.
    pub fn inject_stale_surface(&self) {
        self.state.lock().surface_stale = true;
    }

    /// Make the next present report `Suboptimal`.
    pub fn inject_suboptimal_present(&self) {
        self.state.lock().suboptimal_presents += 1;
    }

    pub fn events(&self) -> Vec<TimedEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn hazards(&self) -> Vec<Hazard> {
        self.state.lock().hazards.clone()
    }

    pub fn validation_errors(&self) -> Vec<String> {
        self.state.lock().validation_errors.clone()
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Commands of the most recent submission
    pub fn last_submission(&self) -> Option<CommandList> {
        self.state.lock().last_submission.clone()
    }

    pub fn live_objects(&self) -> LiveObjects {
        let state = self.state.lock();
        LiveObjects {
            buffers: state.buffers.len(),
            textures: state.textures.values().filter(|t| !t.swapchain).count(),
            samplers: state.samplers.len(),
            render_passes: state.render_passes.len(),
            framebuffers: state.framebuffers.len(),
            pipelines: state.pipelines.len(),
            set_layouts: state.set_layouts.len(),
            descriptor_sets: state.sets.len(),
            fences: state.fences.len(),
            semaphores: state.semaphores.len(),
            command_buffers: state.command_buffers.len(),
        }
    }

    /// Texel bytes of one texture layer, for inspection
    pub fn texture_layer(&self, texture: TextureHandle, layer: u32) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let texture = state.textures.get_mut(&texture)?;
        if layer as usize >= texture.layers.len() {
            return None;
        }
        Some(texture.layer_mut(layer as usize).clone())
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessOptions::default())
    }
}

fn unknown(kind: &str, id: u64) -> RenderError {
    RenderError::InvalidHandle(format!("{} {}", kind, id))
}

impl GpuDevice for HeadlessDevice {
    fn name(&self) -> &'static str {
        "Headless"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn swapchain(&self) -> SwapchainInfo {
        self.state.lock().swapchain.info
    }

    fn current_surface_extent(&self) -> RenderResult<Extent2d> {
        Ok(self.state.lock().surface_extent)
    }

    fn swapchain_texture(&self, image_index: u32) -> RenderResult<TextureHandle> {
        self.state
            .lock()
            .swapchain
            .images
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| unknown("swapchain image", image_index as u64))
    }

    fn recreate_swapchain(&self, extent: Extent2d) -> RenderResult<SwapchainInfo> {
        let mut state = self.state.lock();
        if extent.is_empty() {
            return Err(RenderError::SwapchainCreationFailed(
                "cannot create a zero-sized swapchain".into(),
            ));
        }
        if !state.queue.is_empty() {
            let pending = state.queue.len();
            state.invalid(format!(
                "swapchain recreated with {} submissions pending",
                pending
            ));
        }
        let old = std::mem::take(&mut state.swapchain.images);
        for image in old {
            state.textures.remove(&image);
        }
        let info = state.swapchain.info;
        let generation = info.generation + 1;
        state.build_swapchain(extent, info.format, info.image_count, generation);
        state.surface_stale = false;
        state.log(DeviceEvent::SwapchainRecreated { generation, extent });
        log::debug!(
            "Headless swapchain recreated: {}x{} (generation {})",
            extent.width,
            extent.height,
            generation
        );
        Ok(state.swapchain.info)
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> RenderResult<u32> {
        let mut state = self.state.lock();
        if state.surface_stale || state.surface_extent != state.swapchain.info.extent {
            return Err(RenderError::SurfaceStale);
        }
        match state.semaphores.get(&signal).copied() {
            Some(true) => state.invalid("acquire signals a semaphore that is already signaled"),
            Some(false) => {}
            None => return Err(unknown("semaphore", signal.0)),
        }
        let count = state.swapchain.images.len() as u32;
        let mut image = None;
        for step in 0..count {
            let candidate = (state.swapchain.next + step) % count;
            if !state.swapchain.acquired[candidate as usize] {
                image = Some(candidate);
                break;
            }
        }
        let Some(image) = image else {
            return Err(RenderError::Timeout("swapchain image"));
        };
        state.swapchain.acquired[image as usize] = true;
        state.swapchain.next = (image + 1) % count;
        state.semaphores.insert(signal, true);
        state.log(DeviceEvent::Acquired { image });
        Ok(image)
    }

    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentStatus> {
        let mut state = self.state.lock();
        match state.semaphores.get(&wait).copied() {
            Some(true) => {
                state.semaphores.insert(wait, false);
            }
            Some(false) => state.invalid("present waits on an unsignaled semaphore"),
            None => return Err(unknown("semaphore", wait.0)),
        }
        let acquired = state
            .swapchain
            .acquired
            .get(image_index as usize)
            .copied()
            .unwrap_or(false);
        if acquired {
            state.swapchain.acquired[image_index as usize] = false;
        } else {
            state.invalid(format!("present of image {} that was not acquired", image_index));
        }
        if state.surface_stale || state.surface_extent != state.swapchain.info.extent {
            state.log(DeviceEvent::PresentFailed { image: image_index });
            return Err(RenderError::SurfaceStale);
        }
        let status = if state.suboptimal_presents > 0 {
            state.suboptimal_presents -= 1;
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        };
        state.log(DeviceEvent::Presented {
            image: image_index,
            status,
        });
        Ok(status)
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> RenderResult<BufferHandle> {
        if desc.size == 0 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        let mut state = self.state.lock();
        let handle = BufferHandle(state.alloc_id());
        state.buffers.insert(
            handle,
            HeadlessBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let mut state = self.state.lock();
        let written = offset..offset + data.len() as u64;

        let mut hazards = Vec::new();
        for submission in &state.queue {
            for read in submission.reads.iter().filter(|r| r.buffer == buffer) {
                if overlaps(&read.range, &written) {
                    hazards.push(Hazard {
                        buffer,
                        written: written.clone(),
                        read: read.range.clone(),
                        submission: submission.id,
                    });
                }
            }
        }
        for hazard in hazards {
            log::error!(
                "Host write {:?} overlaps range {:?} read by pending submission {}",
                hazard.written,
                hazard.read,
                hazard.submission
            );
            state.hazards.push(hazard);
        }

        let target = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| unknown("buffer", buffer.0))?;
        if target.desc.location != MemoryLocation::HostVisible && !target.desc.usage.contains(BufferUsage::COPY_DST) {
            return Err(RenderError::ResourceCreationFailed(format!(
                "buffer '{}' is not writable from the host",
                target.desc.label
            )));
        }
        if written.end > target.desc.size {
            return Err(RenderError::capacity("buffer write", written.end, target.desc.size));
        }
        target.data[written.start as usize..written.end as usize].copy_from_slice(data);
        state.log(DeviceEvent::BufferWrite {
            buffer,
            range: written,
        });
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        let mut state = self.state.lock();
        let range = offset..offset + out.len() as u64;
        let written_by_pending = state.queue.iter().any(|s| {
            s.writes
                .iter()
                .any(|w| w.buffer == buffer && overlaps(&w.range, &range))
        });
        if written_by_pending {
            state.invalid(format!(
                "host read of {:?} in buffer {:?} before the GPU write completed",
                range, buffer
            ));
        }
        let source = state
            .buffers
            .get(&buffer)
            .ok_or_else(|| unknown("buffer", buffer.0))?;
        if range.end > source.desc.size {
            return Err(RenderError::capacity("buffer read", range.end, source.desc.size));
        }
        out.copy_from_slice(&source.data[range.start as usize..range.end as usize]);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        if state.buffer_pending(buffer) {
            state.invalid(format!("buffer {:?} destroyed while in use", buffer));
        }
        state.buffers.remove(&buffer);
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture '{}' has zero size",
                desc.label
            )));
        }
        if desc.width.max(desc.height) > self.capabilities.max_texture_dimension {
            return Err(RenderError::capacity(
                "texture dimension",
                desc.width.max(desc.height) as u64,
                self.capabilities.max_texture_dimension as u64,
            ));
        }
        let mut state = self.state.lock();
        let handle = TextureHandle(state.alloc_id());
        state.textures.insert(handle, HeadlessTexture::new(desc.clone(), false));
        Ok(handle)
    }

    fn write_texture(
        &self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> RenderResult<()> {
        let mut state = self.state.lock();
        let target = state
            .textures
            .get_mut(&texture)
            .ok_or_else(|| unknown("texture", texture.0))?;
        let desc = &target.desc;
        let bpp = desc.format.bytes_per_pixel() as usize;
        if region.x + region.width > desc.width
            || region.y + region.height > desc.height
            || region.layer >= desc.layers
        {
            return Err(RenderError::ResourceCreationFailed(format!(
                "upload region {:?} outside texture '{}'",
                region, desc.label
            )));
        }
        let expected = region.width as usize * region.height as usize * bpp;
        if data.len() != expected {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture '{}' upload expects {} bytes, got {}",
                desc.label,
                expected,
                data.len()
            )));
        }
        let width = desc.width as usize;
        let layer = target.layer_mut(region.layer as usize);
        let row_bytes = region.width as usize * bpp;
        for row in 0..region.height as usize {
            let dst = ((region.y as usize + row) * width + region.x as usize) * bpp;
            let src = row * row_bytes;
            layer[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
        Ok(())
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.state.lock();
        if state.textures.get(&texture).is_some_and(|t| t.swapchain) {
            state.invalid("swapchain images are owned by the swapchain");
            return;
        }
        state.textures.remove(&texture);
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> RenderResult<SamplerHandle> {
        let mut state = self.state.lock();
        let handle = SamplerHandle(state.alloc_id());
        state.samplers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().samplers.remove(&sampler);
    }

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> RenderResult<RenderPassHandle> {
        for dependency in &desc.dependencies {
            if let (Some(src), Some(dst)) = (dependency.src, dependency.dst) {
                if src > dst {
                    return Err(RenderError::InvalidGraph(format!(
                        "render pass '{}' has a backward dependency {} -> {}",
                        desc.label, src, dst
                    )));
                }
            }
        }
        let attachment_count = desc.attachments.len() as u32;
        let references = desc.subpasses.iter().flat_map(|s| {
            s.inputs.iter().chain(s.colors.iter()).chain(s.depth.iter())
        });
        for reference in references {
            if reference.attachment >= attachment_count {
                return Err(RenderError::InvalidGraph(format!(
                    "render pass '{}' references attachment {} of {}",
                    desc.label, reference.attachment, attachment_count
                )));
            }
        }
        let mut state = self.state.lock();
        let handle = RenderPassHandle(state.alloc_id());
        state.render_passes.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.state.lock().render_passes.remove(&render_pass);
    }

    fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> RenderResult<FramebufferHandle> {
        let mut state = self.state.lock();
        let pass = state
            .render_passes
            .get(&desc.render_pass)
            .ok_or_else(|| unknown("render pass", desc.render_pass.0))?;
        if pass.attachments.len() != desc.attachments.len() {
            return Err(RenderError::ResourceCreationFailed(format!(
                "framebuffer '{}' has {} attachments, render pass expects {}",
                desc.label,
                desc.attachments.len(),
                pass.attachments.len()
            )));
        }
        for (view, attachment) in desc.attachments.iter().zip(&pass.attachments) {
            let texture = state
                .textures
                .get(&view.texture)
                .ok_or_else(|| unknown("texture", view.texture.0))?;
            if texture.desc.format != attachment.format
                || texture.desc.width < desc.extent.width
                || texture.desc.height < desc.extent.height
            {
                return Err(RenderError::ResourceCreationFailed(format!(
                    "framebuffer '{}' attachment '{}' does not match the render pass",
                    desc.label, texture.desc.label
                )));
            }
        }
        let handle = FramebufferHandle(state.alloc_id());
        state.framebuffers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        let mut state = self.state.lock();
        if state.queue.iter().any(|s| s.framebuffers.contains(&framebuffer)) {
            state.invalid(format!("framebuffer {:?} destroyed while in use", framebuffer));
        }
        state.framebuffers.remove(&framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> RenderResult<DescriptorSetLayoutHandle> {
        let mut state = self.state.lock();
        let handle = DescriptorSetLayoutHandle(state.alloc_id());
        state.set_layouts.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state.lock().set_layouts.remove(&layout);
    }

    fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        if !state.set_layouts.contains_key(&layout) {
            return Err(unknown("descriptor set layout", layout.0));
        }
        let live = state.sets.len() as u64;
        if live >= state.max_descriptor_sets as u64 {
            return Err(RenderError::capacity(
                "descriptor pool",
                live + 1,
                state.max_descriptor_sets as u64,
            ));
        }
        let handle = DescriptorSetHandle(state.alloc_id());
        state.sets.insert(
            handle,
            HeadlessSet {
                layout,
                resources: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn update_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> RenderResult<()> {
        let mut state = self.state.lock();
        let layout = state
            .sets
            .get(&set)
            .map(|s| s.layout)
            .ok_or_else(|| unknown("descriptor set", set.0))?;
        let bindings = state
            .set_layouts
            .get(&layout)
            .map(|l| l.bindings.clone())
            .unwrap_or_default();
        for write in writes {
            let Some(binding) = bindings.iter().find(|b| b.binding == write.binding) else {
                return Err(RenderError::InvalidHandle(format!(
                    "binding {} not in set layout",
                    write.binding
                )));
            };
            let compatible = matches!(
                (binding.ty, write.resource),
                (BindingType::UniformBuffer { .. } | BindingType::StorageBuffer { .. }, DescriptorResource::Buffer { .. })
                    | (BindingType::SampledTexture { .. }, DescriptorResource::Texture(_))
                    | (BindingType::Sampler { .. }, DescriptorResource::Sampler(_))
            );
            if !compatible {
                return Err(RenderError::InvalidHandle(format!(
                    "binding {} has type {:?}, written with {:?}",
                    write.binding, binding.ty, write.resource
                )));
            }
        }
        if let Some(target) = state.sets.get_mut(&set) {
            for write in writes {
                target.resources.insert(write.binding, write.resource);
            }
        }
        Ok(())
    }

    fn free_descriptor_set(&self, set: DescriptorSetHandle) {
        self.state.lock().sets.remove(&set);
    }

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> RenderResult<PipelineHandle> {
        let mut state = self.state.lock();
        let pass = state
            .render_passes
            .get(&desc.render_pass)
            .ok_or_else(|| unknown("render pass", desc.render_pass.0))?;
        let Some(subpass) = pass.subpasses.get(desc.subpass as usize) else {
            return Err(RenderError::PipelineCreationFailed(format!(
                "pipeline '{}' targets missing subpass {}",
                desc.label, desc.subpass
            )));
        };
        if subpass.colors.len() != desc.color_targets.len() {
            return Err(RenderError::PipelineCreationFailed(format!(
                "pipeline '{}' writes {} color targets, subpass has {}",
                desc.label,
                desc.color_targets.len(),
                subpass.colors.len()
            )));
        }
        if desc.depth.is_some() && subpass.depth.is_none() {
            return Err(RenderError::PipelineCreationFailed(format!(
                "pipeline '{}' tests depth in a subpass without depth",
                desc.label
            )));
        }
        for layout in &desc.set_layouts {
            if !state.set_layouts.contains_key(layout) {
                return Err(unknown("descriptor set layout", layout.0));
            }
        }
        let handle = PipelineHandle(state.alloc_id());
        state.pipelines.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(&pipeline);
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let mut state = self.state.lock();
        let handle = FenceHandle(state.alloc_id());
        state.fences.insert(handle, signaled);
        Ok(handle)
    }

    fn fence_signaled(&self, fence: FenceHandle) -> RenderResult<bool> {
        self.state
            .lock()
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| unknown("fence", fence.0))
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RenderResult<()> {
        let mut state = self.state.lock();
        let signaled = state
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| unknown("fence", fence.0))?;
        if !signaled {
            let Some(submission) = state
                .queue
                .iter()
                .find(|s| s.fence == Some(fence))
                .map(|s| s.id)
            else {
                // Nothing will ever signal it.
                return Err(RenderError::Timeout("fence"));
            };
            state.complete_through(Some(submission));
        }
        state.log(DeviceEvent::FenceWaited { fence, timeout_ns });
        Ok(())
    }

    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()> {
        let mut state = self.state.lock();
        if state.queue.iter().any(|s| s.fence == Some(fence)) {
            state.invalid(format!("fence {:?} reset while its submission is pending", fence));
        }
        let signaled = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| unknown("fence", fence.0))?;
        *signaled = false;
        state.log(DeviceEvent::FenceReset { fence });
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if state.queue.iter().any(|s| s.fence == Some(fence)) {
            state.invalid(format!("fence {:?} destroyed while pending", fence));
        }
        state.fences.remove(&fence);
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let handle = SemaphoreHandle(state.alloc_id());
        state.semaphores.insert(handle, false);
        Ok(handle)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn allocate_command_buffer(&self) -> RenderResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        let handle = CommandBufferHandle(state.alloc_id());
        state.command_buffers.insert(handle, None);
        Ok(handle)
    }

    fn record(&self, command_buffer: CommandBufferHandle, commands: &CommandList) -> RenderResult<()> {
        let mut state = self.state.lock();
        if state.queue.iter().any(|s| s.command_buffer == command_buffer) {
            state.invalid(format!(
                "command buffer {:?} re-recorded while its submission is pending",
                command_buffer
            ));
        }
        let slot = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or_else(|| unknown("command buffer", command_buffer.0))?;
        *slot = Some(commands.clone());
        Ok(())
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        self.state.lock().command_buffers.remove(&command_buffer);
    }

    fn submit(&self, submit: &SubmitInfo<'_>) -> RenderResult<()> {
        let mut state = self.state.lock();
        let commands = state
            .command_buffers
            .get(&submit.command_buffer)
            .ok_or_else(|| unknown("command buffer", submit.command_buffer.0))?
            .clone()
            .ok_or_else(|| RenderError::InvalidHandle("submit of an unrecorded command buffer".into()))?;

        for (semaphore, _) in submit.wait {
            match state.semaphores.get(semaphore).copied() {
                Some(true) => {
                    state.semaphores.insert(*semaphore, false);
                }
                Some(false) => state.invalid("submit waits on a semaphore nothing signals"),
                None => return Err(unknown("semaphore", semaphore.0)),
            }
        }
        for semaphore in submit.signal {
            match state.semaphores.get(semaphore).copied() {
                Some(false) => {
                    state.semaphores.insert(*semaphore, true);
                }
                Some(true) => state.invalid("submit signals a semaphore that is already signaled"),
                None => return Err(unknown("semaphore", semaphore.0)),
            }
        }
        if let Some(fence) = submit.fence {
            match state.fences.get(&fence).copied() {
                Some(true) => state.invalid(format!("fence {:?} submitted while signaled", fence)),
                Some(false) => {}
                None => return Err(unknown("fence", fence.0)),
            }
        }

        let (reads, writes, framebuffers) = state.analyze(&commands);
        let id = state.next_submission;
        state.next_submission += 1;
        state.last_submission = Some(commands.clone());
        state.queue.push_back(PendingSubmission {
            id,
            command_buffer: submit.command_buffer,
            commands,
            fence: submit.fence,
            reads,
            writes,
            framebuffers,
        });
        state.log(DeviceEvent::Submitted {
            submission: id,
            fence: submit.fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.state.lock();
        state.complete_through(None);
        state.log(DeviceEvent::WaitIdle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_buffer(device: &HeadlessDevice, size: u64) -> BufferHandle {
        device
            .create_buffer(&BufferDescriptor {
                label: "test".into(),
                size,
                usage: BufferUsage::STORAGE,
                location: MemoryLocation::HostVisible,
            })
            .unwrap()
    }

    #[test]
    fn test_buffer_write_and_read() {
        let device = HeadlessDevice::default();
        let buffer = host_buffer(&device, 16);
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 6];
        device.read_buffer(buffer, 2, &mut out).unwrap();
        assert_eq!(out, [0, 0, 1, 2, 3, 4]);

        let overflow = device.write_buffer(buffer, 14, &[0; 4]);
        assert!(matches!(overflow, Err(RenderError::CapacityExceeded { .. })));
    }

    #[test]
    fn test_fence_completes_only_when_waited() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();
        let cmd = device.allocate_command_buffer().unwrap();
        device.record(cmd, &CommandList::new()).unwrap();
        device
            .submit(&SubmitInfo {
                command_buffer: cmd,
                wait: &[],
                signal: &[],
                fence: Some(fence),
            })
            .unwrap();

        assert!(!device.fence_signaled(fence).unwrap());
        assert_eq!(device.pending_submissions(), 1);

        device.wait_for_fence(fence, u64::MAX).unwrap();
        assert!(device.fence_signaled(fence).unwrap());
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_waiting_on_unsubmitted_fence_times_out() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();
        assert_eq!(
            device.wait_for_fence(fence, 1_000),
            Err(RenderError::Timeout("fence"))
        );
    }

    #[test]
    fn test_stale_surface_until_recreated() {
        let device = HeadlessDevice::default();
        let semaphore = device.create_semaphore().unwrap();

        device.set_surface_extent(Extent2d::new(100, 50));
        assert_eq!(
            device.acquire_next_image(semaphore),
            Err(RenderError::SurfaceStale)
        );

        let info = device.recreate_swapchain(Extent2d::new(100, 50)).unwrap();
        assert_eq!(info.generation, 1);
        assert_eq!(info.extent, Extent2d::new(100, 50));
        assert!(device.acquire_next_image(semaphore).is_ok());
    }

    #[test]
    fn test_descriptor_pool_exhaustion() {
        let device = HeadlessDevice::new(HeadlessOptions {
            max_descriptor_sets: 1,
            ..Default::default()
        });
        let layout = device
            .create_descriptor_set_layout(&DescriptorSetLayoutDescriptor {
                label: "empty".into(),
                bindings: Vec::new(),
            })
            .unwrap();
        device.allocate_descriptor_set(layout).unwrap();
        assert!(matches!(
            device.allocate_descriptor_set(layout),
            Err(RenderError::CapacityExceeded { resource: "descriptor pool", .. })
        ));
    }

    #[test]
    fn test_lazy_clear_fills_layer() {
        let device = HeadlessDevice::default();
        let texture = device
            .create_texture(&TextureDescriptor {
                label: "ids".into(),
                width: 2,
                height: 2,
                layers: 1,
                format: TextureFormat::R32Uint,
                usage: TextureUsage::COLOR_ATTACHMENT,
            })
            .unwrap();
        {
            let mut state = device.state.lock();
            let target = state.textures.get_mut(&texture).unwrap();
            target.clear_layer(0, ClearValue::ColorUint([7, 0, 0, 0]));
        }
        let data = device.texture_layer(texture, 0).unwrap();
        assert_eq!(&data[0..4], &7u32.to_le_bytes());
        assert_eq!(&data[12..16], &7u32.to_le_bytes());
    }
}
