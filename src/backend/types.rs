//! Common types shared between backends

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::pipeline::shaders::ShaderProgram;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a texture together with its default view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a render pass object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassHandle(pub(crate) u64);

/// Handle to a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Handle to a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutHandle(pub(crate) u64);

/// Handle to a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Handle to a primary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferHandle(pub(crate) u64);

/// Handle to a fence (CPU-observable completion signal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub(crate) u64);

/// Handle to a semaphore (GPU-side ordering signal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub(crate) u64);

/// Two-dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-area surface.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl From<winit::dpi::PhysicalSize<u32>> for Extent2d {
    fn from(size: winit::dpi::PhysicalSize<u32>) -> Self {
        Self::new(size.width, size.height)
    }
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    R32Uint,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Uint
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const COLOR_ATTACHMENT = 1 << 3;
        const DEPTH_ATTACHMENT = 1 << 4;
        const INPUT_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const INDEX = 1 << 2;
        const VERTEX = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE = 1 << 5;
    }
}

bitflags! {
    /// Shader stage visibility for descriptor bindings
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Where buffer memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Host-visible, persistently mapped
    HostVisible,
    /// Device-local, written through staging
    DeviceLocal,
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Array layers; values above one create a 2D array
    pub layers: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: String::new(),
            width: 1,
            height: 1,
            layers: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        }
    }
}

impl TextureDescriptor {
    pub fn byte_size(&self) -> usize {
        (self.width * self.height * self.layers * self.format.bytes_per_pixel()) as usize
    }
}

/// Sub-rectangle of one texture layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub layer: u32,
}

impl TextureRegion {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            layer: 0,
        }
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Compare function for depth tests and comparison samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: String,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode: AddressMode,
    pub anisotropy: Option<f32>,
    pub compare: Option<CompareFunction>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: String::new(),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
            anisotropy: None,
            compare: None,
        }
    }
}

/// Attachment load behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    Load,
    DontCare,
}

/// Attachment store behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// Image layouts the render passes move attachments through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    ColorAttachment,
    DepthAttachment,
    DepthReadOnly,
    ShaderReadOnly,
    TransferSrc,
    Present,
}

/// Clear value for one attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    ColorUint([u32; 4]),
    Depth(f32),
}

/// One attachment of a render pass
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDescriptor {
    pub format: TextureFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

/// Reference to an attachment slot within a subpass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentReference {
    pub attachment: u32,
    pub layout: ImageLayout,
}

/// One subpass of a render pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubpassDescriptor {
    pub inputs: Vec<AttachmentReference>,
    pub colors: Vec<AttachmentReference>,
    pub depth: Option<AttachmentReference>,
}

bitflags! {
    /// Memory access scopes used to build subpass dependencies
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessScope: u32 {
        const COLOR_WRITE = 1 << 0;
        const COLOR_READ = 1 << 1;
        const DEPTH_WRITE = 1 << 2;
        const DEPTH_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const TRANSFER_READ = 1 << 5;
    }
}

/// Execution and memory dependency between two subpasses
///
/// `None` stands for work outside the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src: Option<u32>,
    pub dst: Option<u32>,
    pub src_access: AccessScope,
    pub dst_access: AccessScope,
    /// Consumer only reads the pixel it shades
    pub by_region: bool,
}

/// Render pass descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDescriptor {
    pub label: String,
    pub attachments: Vec<AttachmentDescriptor>,
    pub subpasses: Vec<SubpassDescriptor>,
    pub dependencies: Vec<SubpassDependency>,
}

/// Framebuffer attachment: a texture, optionally one layer of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentView {
    pub texture: TextureHandle,
    pub layer: Option<u32>,
}

impl From<TextureHandle> for AttachmentView {
    fn from(texture: TextureHandle) -> Self {
        Self {
            texture,
            layer: None,
        }
    }
}

/// Framebuffer descriptor
#[derive(Debug, Clone)]
pub struct FramebufferDescriptor {
    pub label: String,
    pub render_pass: RenderPassHandle,
    pub attachments: Vec<AttachmentView>,
    pub extent: Extent2d,
}

/// Sampled texture dimensionality as seen by shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureViewKind {
    D2,
    D2Array,
}

/// Sample type of a sampled texture binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Float,
    Depth,
    Uint,
}

/// Binding type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    UniformBuffer { dynamic: bool },
    StorageBuffer { dynamic: bool },
    SampledTexture {
        view: TextureViewKind,
        sample: SampleKind,
    },
    Sampler { comparison: bool },
}

impl BindingType {
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            BindingType::UniformBuffer { dynamic: true } | BindingType::StorageBuffer { dynamic: true }
        )
    }
}

/// Descriptor set layout entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: BindingType,
    pub stages: ShaderStages,
}

/// Descriptor set layout descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSetLayoutDescriptor {
    pub label: String,
    pub bindings: Vec<DescriptorBinding>,
}

/// Resource written into a descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// Buffer range; for dynamic bindings `offset` is the base the dynamic
    /// offset is added to.
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Texture(TextureHandle),
    Sampler(SamplerHandle),
}

/// Descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub resource: DescriptorResource,
}

/// Vertex input layouts known to the pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// Vertices generated from the vertex index
    None,
    /// [`Vertex`]
    Mesh,
    /// [`UiVertex`]
    Ui,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32x4,
    Unorm8x4,
}

/// Vertex attribute description
#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

impl VertexLayout {
    pub fn stride(&self) -> u32 {
        match self {
            VertexLayout::None => 0,
            VertexLayout::Mesh => std::mem::size_of::<Vertex>() as u32,
            VertexLayout::Ui => std::mem::size_of::<UiVertex>() as u32,
        }
    }

    pub fn attributes(&self) -> &'static [VertexAttribute] {
        const MESH: [VertexAttribute; 6] = [
            VertexAttribute { location: 0, format: VertexFormat::Float32x3, offset: 0 },
            VertexAttribute { location: 1, format: VertexFormat::Float32x3, offset: 12 },
            VertexAttribute { location: 2, format: VertexFormat::Float32x2, offset: 24 },
            VertexAttribute { location: 3, format: VertexFormat::Float32x4, offset: 32 },
            VertexAttribute { location: 4, format: VertexFormat::Uint32x4, offset: 48 },
            VertexAttribute { location: 5, format: VertexFormat::Float32x4, offset: 64 },
        ];
        const UI: [VertexAttribute; 3] = [
            VertexAttribute { location: 0, format: VertexFormat::Float32x2, offset: 0 },
            VertexAttribute { location: 1, format: VertexFormat::Float32x2, offset: 8 },
            VertexAttribute { location: 2, format: VertexFormat::Unorm8x4, offset: 16 },
        ];
        match self {
            VertexLayout::None => &[],
            VertexLayout::Mesh => &MESH,
            VertexLayout::Ui => &UI,
        }
    }
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Blend component state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

/// Blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
        }
    }

    /// Blending for premultiplied-alpha sources such as egui meshes.
    pub fn premultiplied_alpha() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
        }
    }

    pub fn additive() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::One,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::Zero,
                dst_factor: BlendFactor::One,
            },
        }
    }
}

/// Depth test configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub write: bool,
    pub compare: CompareFunction,
    /// Constant and slope depth bias, used by shadow pipelines
    pub bias: Option<(i32, u32)>,
}

/// Graphics pipeline descriptor
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub label: String,
    pub program: ShaderProgram,
    pub vertex_layout: VertexLayout,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    /// One entry per color attachment of the subpass
    pub color_targets: Vec<Option<BlendState>>,
    pub depth: Option<DepthState>,
    pub cull_mode: CullMode,
}

/// Viewport in framebuffer pixels; the backends map +Y clip space to the top row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn full(extent: Extent2d) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
        }
    }
}

/// Scissor rectangle in framebuffer pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn full(extent: Extent2d) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Pipeline stage a semaphore wait blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ColorAttachmentOutput,
    Transfer,
    AllCommands,
}

/// Queue submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo<'a> {
    pub command_buffer: CommandBufferHandle,
    pub wait: &'a [(SemaphoreHandle, PipelineStage)],
    pub signal: &'a [SemaphoreHandle],
    pub fence: Option<FenceHandle>,
}

/// Outcome of a successful present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
}

/// Snapshot of the presentable swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: Extent2d,
    pub format: TextureFormat,
    pub image_count: u32,
    /// Increments on every recreation
    pub generation: u64,
}

impl SwapchainInfo {
    /// Compare everything except the generation counter.
    pub fn same_structure(&self, other: &SwapchainInfo) -> bool {
        self.extent == other.extent
            && self.format == other.format
            && self.image_count == other.image_count
    }
}

/// Physical device category, used to rank candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceKind {
    Cpu,
    Virtual,
    Other,
    Integrated,
    Discrete,
}

/// Properties the renderer sizes itself against
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub name: String,
    pub kind: DeviceKind,
    pub min_uniform_alignment: u64,
    pub min_storage_alignment: u64,
    pub max_anisotropy: f32,
    pub max_texture_dimension: u32,
}

impl DeviceCapabilities {
    /// Alignment satisfying both uniform and storage dynamic offsets.
    pub fn dynamic_offset_alignment(&self) -> u64 {
        self.min_uniform_alignment
            .max(self.min_storage_alignment)
            .next_power_of_two()
    }
}

/// A single recorded GPU command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2d,
        clear_values: Vec<ClearValue>,
    },
    NextSubpass,
    EndRenderPass,
    BindPipeline(PipelineHandle),
    BindDescriptorSet {
        pipeline: PipelineHandle,
        index: u32,
        set: DescriptorSetHandle,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    CopyTextureToBuffer {
        texture: TextureHandle,
        x: u32,
        y: u32,
        buffer: BufferHandle,
        buffer_offset: u64,
    },
}

/// Commands recorded on the CPU and replayed into a device command buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
    draw_calls: u32,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        if matches!(command, Command::Draw { .. } | Command::DrawIndexed { .. }) {
            self.draw_calls += 1;
        }
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn draw_calls(&self) -> u32 {
        self.draw_calls
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.draw_calls = 0;
    }

    /// Number of subpass transitions recorded
    pub fn subpass_transitions(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::NextSubpass))
            .count()
    }
}

/// Standard vertex with position, normal, UV, tangent and skinning data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
    pub joints: [u32; 4],
    pub weights: Vec4,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
            tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            joints: [0; 4],
            weights: Vec4::ZERO,
        }
    }
}

/// UI vertex in logical points, premultiplied sRGB color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [u8; 4],
}

/// Camera uniform data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    pub position: Vec4, // w unused
    pub near_far: Vec4, // x=near, y=far, zw unused
    pub viewport: Vec4, // xy=size, zw=1/size
}

/// Per-instance data read from a storage buffer by the geometry stages
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model: Mat4,
    pub normal_matrix: Mat4,
    pub instance_id: u32,
    pub joint_offset: u32,
    pub joint_count: u32,
    pub _padding: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_struct_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 80);
        assert_eq!(std::mem::size_of::<UiVertex>(), 20);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 368);
        assert_eq!(std::mem::size_of::<InstanceData>(), 144);
        assert_eq!(VertexLayout::Mesh.stride(), 80);
    }

    #[test]
    fn test_command_list_counts_draws() {
        let mut list = CommandList::new();
        list.push(Command::NextSubpass);
        list.push(Command::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        });
        list.push(Command::DrawIndexed {
            index_count: 36,
            instance_count: 4,
            first_index: 0,
            vertex_offset: 0,
            first_instance: 0,
        });
        assert_eq!(list.draw_calls(), 2);
        assert_eq!(list.subpass_transitions(), 1);

        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.draw_calls(), 0);
    }

    #[test]
    fn test_dynamic_offset_alignment() {
        let caps = DeviceCapabilities {
            name: "test".into(),
            kind: DeviceKind::Discrete,
            min_uniform_alignment: 64,
            min_storage_alignment: 16,
            max_anisotropy: 16.0,
            max_texture_dimension: 16384,
        };
        assert_eq!(caps.dynamic_offset_alignment(), 64);
    }

    #[test]
    fn test_scissor_contains() {
        let rect = ScissorRect {
            x: 10,
            y: 20,
            width: 1,
            height: 1,
        };
        assert!(rect.contains(10, 20));
        assert!(!rect.contains(11, 20));
        assert!(!rect.contains(10, 21));
    }
}
