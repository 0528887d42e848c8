//! Translation from backend-neutral descriptors to Vulkan enums and flags

use ash::vk;

use crate::backend::types::*;
use crate::error::RenderError;

pub(super) fn format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

/// Surface formats the swapchain can adopt
pub(super) fn format_back(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8UnormSrgb),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8UnormSrgb),
        _ => None,
    }
}

pub(super) fn aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(super) fn image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Layout a texture is in whenever shaders sample it.
///
/// Depth attachments that are also read as input attachments stay in the
/// read-only depth layout; everything else is sampled from the shader layout.
pub(super) fn sampled_layout(desc: &TextureDescriptor) -> vk::ImageLayout {
    if desc.format.is_depth() && desc.usage.contains(TextureUsage::INPUT_ATTACHMENT) {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

pub(super) fn image_usage(desc: &TextureDescriptor) -> vk::ImageUsageFlags {
    let usage = desc.usage;
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::INPUT_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }
    flags
}

pub(super) fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

/// Host-visible buffers that are only ever copied into are readbacks.
pub(super) fn memory_location(desc: &BufferDescriptor) -> gpu_allocator::MemoryLocation {
    match desc.location {
        MemoryLocation::HostVisible if desc.usage == BufferUsage::COPY_DST => {
            gpu_allocator::MemoryLocation::GpuToCpu
        }
        MemoryLocation::HostVisible => gpu_allocator::MemoryLocation::CpuToGpu,
        MemoryLocation::DeviceLocal => gpu_allocator::MemoryLocation::GpuOnly,
    }
}

pub(super) fn compare_op(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub(super) fn filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub(super) fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

pub(super) fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(super) fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub(super) fn attachment_reference(reference: &AttachmentReference) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment: reference.attachment,
        layout: image_layout(reference.layout),
    }
}

/// Stages and access masks covering an access scope.
///
/// An empty scope is the top or bottom of the pipe, depending on the side.
pub(super) fn access_scope(scope: AccessScope, src: bool) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    let fragment_tests =
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let mut stages = vk::PipelineStageFlags::empty();
    let mut access = vk::AccessFlags::empty();
    if scope.contains(AccessScope::COLOR_WRITE) {
        stages |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        access |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if scope.contains(AccessScope::COLOR_READ) {
        stages |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        access |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
    }
    if scope.contains(AccessScope::DEPTH_WRITE) {
        stages |= fragment_tests;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if scope.contains(AccessScope::DEPTH_READ) {
        stages |= fragment_tests;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if scope.contains(AccessScope::SHADER_READ) {
        stages |= vk::PipelineStageFlags::FRAGMENT_SHADER;
        access |= vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ;
    }
    if scope.contains(AccessScope::TRANSFER_READ) {
        stages |= vk::PipelineStageFlags::TRANSFER;
        access |= vk::AccessFlags::TRANSFER_READ;
    }
    if stages.is_empty() {
        stages = if src {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        };
    }
    (stages, access)
}

pub(super) fn subpass_index(index: Option<u32>) -> u32 {
    index.unwrap_or(vk::SUBPASS_EXTERNAL)
}

pub(super) fn descriptor_type(ty: BindingType) -> vk::DescriptorType {
    match ty {
        BindingType::UniformBuffer { dynamic: false } => vk::DescriptorType::UNIFORM_BUFFER,
        BindingType::UniformBuffer { dynamic: true } => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        BindingType::StorageBuffer { dynamic: false } => vk::DescriptorType::STORAGE_BUFFER,
        BindingType::StorageBuffer { dynamic: true } => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        BindingType::SampledTexture { .. } => vk::DescriptorType::SAMPLED_IMAGE,
        BindingType::Sampler { .. } => vk::DescriptorType::SAMPLER,
    }
}

pub(super) fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    flags
}

pub(super) fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32x4 => vk::Format::R32G32B32A32_UINT,
        VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
    }
}

pub(super) fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(super) fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
    }
}

pub(super) fn blend_attachment(blend: Option<BlendState>) -> vk::PipelineColorBlendAttachmentState {
    let write_mask = vk::ColorComponentFlags::RGBA;
    match blend {
        None => vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: write_mask,
            ..Default::default()
        },
        Some(state) => vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: blend_factor(state.color.src_factor),
            dst_color_blend_factor: blend_factor(state.color.dst_factor),
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: blend_factor(state.alpha.src_factor),
            dst_alpha_blend_factor: blend_factor(state.alpha.dst_factor),
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: write_mask,
        },
    }
}

pub(super) fn clear_value(value: ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::ColorUint(uint32) => vk::ClearValue {
            color: vk::ClearColorValue { uint32 },
        },
        ClearValue::Depth(depth) => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        },
    }
}

pub(super) fn pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    match stage {
        PipelineStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        PipelineStage::Transfer => vk::PipelineStageFlags::TRANSFER,
        PipelineStage::AllCommands => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

pub(super) fn device_kind(ty: vk::PhysicalDeviceType) -> DeviceKind {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceKind::Virtual,
        vk::PhysicalDeviceType::CPU => DeviceKind::Cpu,
        _ => DeviceKind::Other,
    }
}

/// Map a Vulkan failure onto the renderer's error kinds.
///
/// Memory exhaustion, device loss and out-of-date surfaces have dedicated
/// kinds; anything else is reported through `other` with `context` attached.
pub(super) fn vk_error(
    result: vk::Result,
    context: &str,
    other: impl FnOnce(String) -> RenderError,
) -> RenderError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            RenderError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SurfaceStale,
        _ => other(format!("{}: {}", context, result)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip_for_surface_formats() {
        for format in [
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb,
        ] {
            assert_eq!(format_back(self::format(format)), Some(format));
        }
        assert_eq!(format_back(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn test_readback_buffers_live_in_host_cached_memory() {
        let desc = BufferDescriptor {
            label: "readback".into(),
            size: 4,
            usage: BufferUsage::COPY_DST,
            location: MemoryLocation::HostVisible,
        };
        assert_eq!(memory_location(&desc), gpu_allocator::MemoryLocation::GpuToCpu);
    }

    #[test]
    fn test_empty_scope_maps_to_pipe_ends() {
        let (src, access) = access_scope(AccessScope::empty(), true);
        assert_eq!(src, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert!(access.is_empty());
        let (dst, _) = access_scope(AccessScope::empty(), false);
        assert_eq!(dst, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_out_of_date_is_stale_surface() {
        let error = vk_error(vk::Result::ERROR_OUT_OF_DATE_KHR, "present", RenderError::SwapchainCreationFailed);
        assert!(error.is_recoverable());
        let error = vk_error(vk::Result::ERROR_INITIALIZATION_FAILED, "device", RenderError::DeviceCreationFailed);
        assert!(matches!(error, RenderError::DeviceCreationFailed(_)));
    }
}
