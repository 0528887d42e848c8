//! WGSL shader programs.
//!
//! Every pipeline is built from one closed set of programs. Sources are
//! assembled from shared chunks so struct layouts stay identical between
//! programs; the Rust mirrors live in `backend::types` and `pipeline::uniforms`.
//!
//! Bind group conventions:
//!
//! | Group | Contents |
//! |-------|----------|
//! | 0 | frame: camera, point lights, lighting, shadow matrices (dynamic) |
//! | 1 | instances + joint palette (dynamic), or per-pass inputs |
//! | 2 | material, or shadow maps for the lighting subpass |
//! | 3 | shadow maps for forward shading |
//!
//! G-buffer inputs are read with `textureLoad` at the fragment's own pixel,
//! which keeps the lighting subpasses tile-local.

use crate::error::{RenderError, RenderResult};

/// Vertex entry point name shared by all programs
pub const VERTEX_ENTRY: &str = "vs_main";
/// Fragment entry point name shared by all programs
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Shader stage for compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn entry_point(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => VERTEX_ENTRY,
            ShaderStage::Fragment => FRAGMENT_ENTRY,
        }
    }
}

/// Closed set of shader programs used by the render passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    GBuffer,
    DeferredLighting,
    ForwardLighting,
    Particles,
    ToneMapping,
    ColorGrading,
    Pixelation,
    Ui,
    CombineUi,
    ShadowDepth,
    PickId,
}

impl ShaderProgram {
    pub const ALL: [ShaderProgram; 11] = [
        ShaderProgram::GBuffer,
        ShaderProgram::DeferredLighting,
        ShaderProgram::ForwardLighting,
        ShaderProgram::Particles,
        ShaderProgram::ToneMapping,
        ShaderProgram::ColorGrading,
        ShaderProgram::Pixelation,
        ShaderProgram::Ui,
        ShaderProgram::CombineUi,
        ShaderProgram::ShadowDepth,
        ShaderProgram::PickId,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ShaderProgram::GBuffer => "gbuffer",
            ShaderProgram::DeferredLighting => "deferred_lighting",
            ShaderProgram::ForwardLighting => "forward_lighting",
            ShaderProgram::Particles => "particles",
            ShaderProgram::ToneMapping => "tone_mapping",
            ShaderProgram::ColorGrading => "color_grading",
            ShaderProgram::Pixelation => "pixelation",
            ShaderProgram::Ui => "ui",
            ShaderProgram::CombineUi => "combine_ui",
            ShaderProgram::ShadowDepth => "shadow_depth",
            ShaderProgram::PickId => "pick_id",
        }
    }

    /// Depth-only programs have no fragment stage.
    pub fn has_fragment(&self) -> bool {
        !matches!(self, ShaderProgram::ShadowDepth)
    }

    /// Complete WGSL source
    pub fn source(&self) -> String {
        let chunks: &[&str] = match self {
            ShaderProgram::GBuffer => &[CAMERA, FRAME_CAMERA, MESH_INPUT, INSTANCES, MATERIAL, GBUFFER],
            ShaderProgram::DeferredLighting => &[
                CAMERA,
                FRAME_ALL,
                FULLSCREEN,
                LIGHTING_BINDINGS_DEFERRED,
                SHADOW_BINDINGS_GROUP2,
                BRDF,
                DEFERRED_LIGHTING,
            ],
            ShaderProgram::ForwardLighting => &[
                CAMERA,
                FRAME_ALL,
                MESH_INPUT,
                INSTANCES,
                MATERIAL,
                SHADOW_BINDINGS_GROUP3,
                BRDF,
                FORWARD,
            ],
            ShaderProgram::Particles => &[CAMERA, FRAME_CAMERA, PARTICLES],
            ShaderProgram::ToneMapping => &[POST_COMMON, FULLSCREEN, TONE_MAPPING],
            ShaderProgram::ColorGrading => &[POST_COMMON, FULLSCREEN, COLOR_GRADING],
            ShaderProgram::Pixelation => &[POST_COMMON, FULLSCREEN, PIXELATION],
            ShaderProgram::Ui => &[COLOR_SPACE, UI],
            ShaderProgram::CombineUi => &[POST_COMMON, COLOR_SPACE, FULLSCREEN, COMBINE_UI],
            ShaderProgram::ShadowDepth => &[CAMERA, FRAME_CAMERA, MESH_INPUT, INSTANCES, SHADOW_DEPTH],
            ShaderProgram::PickId => &[CAMERA, FRAME_CAMERA, MESH_INPUT, INSTANCES, PICK_ID],
        };
        chunks.concat()
    }

    /// Parse and validate the program.
    pub fn validate(&self) -> RenderResult<(naga::Module, naga::valid::ModuleInfo)> {
        let source = self.source();
        let module = naga::front::wgsl::parse_str(&source).map_err(|e| {
            RenderError::ShaderCompilationFailed(format!(
                "{}: {}",
                self.label(),
                e.emit_to_string(&source)
            ))
        })?;
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| {
            RenderError::ShaderCompilationFailed(format!("{}: validation error: {:?}", self.label(), e))
        })?;
        Ok((module, info))
    }

    /// Compile one stage to SPIR-V words.
    pub fn to_spirv(&self, stage: ShaderStage) -> RenderResult<Vec<u32>> {
        let (module, info) = self.validate()?;

        let options = naga::back::spv::Options {
            lang_version: (1, 3),
            flags: naga::back::spv::WriterFlags::empty(),
            ..Default::default()
        };
        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: match stage {
                ShaderStage::Vertex => naga::ShaderStage::Vertex,
                ShaderStage::Fragment => naga::ShaderStage::Fragment,
            },
            entry_point: stage.entry_point().to_string(),
        };

        naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options)).map_err(|e| {
            RenderError::ShaderCompilationFailed(format!(
                "{} ({:?}): SPIR-V generation failed: {:?}",
                self.label(),
                stage,
                e
            ))
        })
    }
}

const CAMERA: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
    // xy = size in pixels, zw = 1 / size
    viewport: vec4<f32>,
}
"#;

const FRAME_CAMERA: &str = r#"
@group(0) @binding(0) var<uniform> camera: CameraUniforms;
"#;

const FRAME_ALL: &str = r#"
struct PointLight {
    // xyz = position, w = radius
    position_radius: vec4<f32>,
    // xyz = color, w = intensity
    color_intensity: vec4<f32>,
    // x = first shadow layer or -1, yzw = unused
    shadow: vec4<f32>,
}

struct LightingUniforms {
    // xyz = direction the light travels, w = 1 when enabled
    sun_direction: vec4<f32>,
    // rgb = color * intensity
    sun_color: vec4<f32>,
    ambient: vec4<f32>,
    clear_color: vec4<f32>,
    // x = point light count, y = 1 when the sun casts shadows
    counts: vec4<u32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(0) @binding(1) var<storage, read> point_lights: array<PointLight>;
@group(0) @binding(2) var<uniform> lighting: LightingUniforms;
// [0] = sun, [1 + layer] = point shadow face
@group(0) @binding(3) var<storage, read> shadow_matrices: array<mat4x4<f32>>;
"#;

const FULLSCREEN: &str = r#"
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

// Fullscreen triangle vertex shader
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> FullscreenOutput {
    var output: FullscreenOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}
"#;

const MESH_INPUT: &str = r#"
struct VertexInput {
    @builtin(instance_index) instance_index: u32,
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
    @location(4) joints: vec4<u32>,
    @location(5) weights: vec4<f32>,
}
"#;

const INSTANCES: &str = r#"
struct InstanceData {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    instance_id: u32,
    joint_offset: u32,
    joint_count: u32,
    _padding: u32,
}

@group(1) @binding(0) var<storage, read> instances: array<InstanceData>;
@group(1) @binding(1) var<storage, read> joint_matrices: array<mat4x4<f32>>;

// Object-to-world transform including linear blend skinning
fn world_transform(instance: InstanceData, joints: vec4<u32>, weights: vec4<f32>) -> mat4x4<f32> {
    if instance.joint_count == 0u {
        return instance.model;
    }
    let last = instance.joint_count - 1u;
    let base = instance.joint_offset;
    let skin = joint_matrices[base + min(joints.x, last)] * weights.x
        + joint_matrices[base + min(joints.y, last)] * weights.y
        + joint_matrices[base + min(joints.z, last)] * weights.z
        + joint_matrices[base + min(joints.w, last)] * weights.w;
    return instance.model * skin;
}

fn normal_transform(instance: InstanceData, world: mat4x4<f32>) -> mat4x4<f32> {
    if instance.joint_count == 0u {
        return instance.normal_matrix;
    }
    return world;
}
"#;

const MATERIAL: &str = r#"
struct MaterialUniforms {
    base_color: vec4<f32>,
    // rgb = emissive factor
    emissive: vec4<f32>,
    // x = metallic, y = roughness, z = occlusion strength, w = alpha cutoff
    params: vec4<f32>,
}

@group(2) @binding(0) var<uniform> material: MaterialUniforms;
@group(2) @binding(1) var material_sampler: sampler;
@group(2) @binding(2) var base_color_texture: texture_2d<f32>;
@group(2) @binding(3) var normal_texture: texture_2d<f32>;
@group(2) @binding(4) var metallic_roughness_texture: texture_2d<f32>;
@group(2) @binding(5) var occlusion_texture: texture_2d<f32>;
@group(2) @binding(6) var emissive_texture: texture_2d<f32>;

struct MeshOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) world_tangent: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> MeshOutput {
    var output: MeshOutput;
    let instance = instances[input.instance_index];
    let world = world_transform(instance, input.joints, input.weights);
    let normal_matrix = normal_transform(instance, world);
    let world_pos = world * vec4<f32>(input.position, 1.0);
    output.world_position = world_pos.xyz;
    output.clip_position = camera.view_proj * world_pos;
    output.world_normal = normalize((normal_matrix * vec4<f32>(input.normal, 0.0)).xyz);
    output.world_tangent = vec4<f32>(
        normalize((world * vec4<f32>(input.tangent.xyz, 0.0)).xyz),
        input.tangent.w,
    );
    output.uv = input.uv;
    return output;
}

struct SurfaceSample {
    base_color: vec4<f32>,
    normal: vec3<f32>,
    metallic: f32,
    roughness: f32,
    occlusion: f32,
    emissive: vec3<f32>,
}

fn sample_surface(input: MeshOutput) -> SurfaceSample {
    var surface: SurfaceSample;
    let base = textureSample(base_color_texture, material_sampler, input.uv);
    let tangent_normal = textureSample(normal_texture, material_sampler, input.uv).xyz * 2.0 - 1.0;
    let metallic_roughness = textureSample(metallic_roughness_texture, material_sampler, input.uv);
    let occlusion = textureSample(occlusion_texture, material_sampler, input.uv).r;
    let emissive = textureSample(emissive_texture, material_sampler, input.uv).rgb;

    let n = normalize(input.world_normal);
    let t = normalize(input.world_tangent.xyz - n * dot(n, input.world_tangent.xyz));
    let b = cross(n, t) * input.world_tangent.w;

    surface.base_color = base * material.base_color;
    surface.normal = normalize(mat3x3<f32>(t, b, n) * tangent_normal);
    // glTF packing: G = roughness, B = metallic
    surface.metallic = metallic_roughness.b * material.params.x;
    surface.roughness = clamp(metallic_roughness.g * material.params.y, 0.04, 1.0);
    surface.occlusion = mix(1.0, occlusion, material.params.z);
    surface.emissive = emissive * material.emissive.rgb;
    return surface;
}
"#;

const GBUFFER: &str = r#"
struct GBufferOutput {
    // rgb = albedo, a = occlusion
    @location(0) albedo: vec4<f32>,
    // xyz = world normal, w = roughness
    @location(1) normal: vec4<f32>,
    // rgb = emissive, a = metallic
    @location(2) material: vec4<f32>,
}

@fragment
fn fs_main(input: MeshOutput) -> GBufferOutput {
    let surface = sample_surface(input);
    if surface.base_color.a < material.params.w {
        discard;
    }
    var output: GBufferOutput;
    output.albedo = vec4<f32>(surface.base_color.rgb, surface.occlusion);
    output.normal = vec4<f32>(surface.normal, surface.roughness);
    output.material = vec4<f32>(saturate(surface.emissive), surface.metallic);
    return output;
}
"#;

const LIGHTING_BINDINGS_DEFERRED: &str = r#"
@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_material: texture_2d<f32>;
@group(1) @binding(3) var gbuffer_depth: texture_depth_2d;
"#;

const SHADOW_BINDINGS_GROUP2: &str = r#"
@group(2) @binding(0) var sun_shadow_map: texture_depth_2d;
@group(2) @binding(1) var point_shadow_maps: texture_depth_2d_array;
@group(2) @binding(2) var shadow_sampler: sampler_comparison;
"#;

const SHADOW_BINDINGS_GROUP3: &str = r#"
@group(3) @binding(0) var sun_shadow_map: texture_depth_2d;
@group(3) @binding(1) var point_shadow_maps: texture_depth_2d_array;
@group(3) @binding(2) var shadow_sampler: sampler_comparison;
"#;

const BRDF: &str = r#"
const PI: f32 = 3.14159265359;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / (PI * d * d);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let gv = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let gl = n_dot_l / (n_dot_l * (1.0 - k) + k);
    return gv * gl;
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(1.0 - cos_theta, 5.0);
}

fn brdf(n: vec3<f32>, v: vec3<f32>, l: vec3<f32>, albedo: vec3<f32>, metallic: f32, roughness: f32) -> vec3<f32> {
    let h = normalize(v + l);
    let n_dot_l = max(dot(n, l), 0.0);
    let n_dot_v = max(dot(n, v), 0.0001);
    let n_dot_h = max(dot(n, h), 0.0);
    let h_dot_v = max(dot(h, v), 0.0);

    let f0 = mix(vec3<f32>(0.04), albedo, metallic);
    let f = fresnel_schlick(h_dot_v, f0);
    let d = distribution_ggx(n_dot_h, roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, roughness);
    let specular = f * (d * g / max(4.0 * n_dot_v * n_dot_l, 0.0001));
    let diffuse = (vec3<f32>(1.0) - f) * (1.0 - metallic) * albedo / PI;
    return (diffuse + specular) * n_dot_l;
}

// Shadow map coordinates: xy = texture uv, z = depth
fn project_shadow(light_view_proj: mat4x4<f32>, world_pos: vec3<f32>) -> vec3<f32> {
    let clip = light_view_proj * vec4<f32>(world_pos, 1.0);
    let ndc = clip.xyz / clip.w;
    return vec3<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5, ndc.z);
}

fn sun_shadow(world_pos: vec3<f32>) -> f32 {
    if lighting.counts.y == 0u {
        return 1.0;
    }
    let coord = project_shadow(shadow_matrices[0], world_pos);
    if coord.x < 0.0 || coord.x > 1.0 || coord.y < 0.0 || coord.y > 1.0 || coord.z > 1.0 {
        return 1.0;
    }
    return textureSampleCompareLevel(sun_shadow_map, shadow_sampler, coord.xy, coord.z - 0.002);
}

// Face order: +X, -X, +Y, -Y, +Z, -Z
fn cube_face(d: vec3<f32>) -> u32 {
    let a = abs(d);
    if a.x >= a.y && a.x >= a.z {
        return select(1u, 0u, d.x > 0.0);
    }
    if a.y >= a.z {
        return select(3u, 2u, d.y > 0.0);
    }
    return select(5u, 4u, d.z > 0.0);
}

fn point_shadow(light: PointLight, world_pos: vec3<f32>) -> f32 {
    if light.shadow.x < 0.0 {
        return 1.0;
    }
    let layer = u32(light.shadow.x) + cube_face(world_pos - light.position_radius.xyz);
    let coord = project_shadow(shadow_matrices[1u + layer], world_pos);
    return textureSampleCompareLevel(point_shadow_maps, shadow_sampler, coord.xy, i32(layer), coord.z - 0.0005);
}

fn shade(world_pos: vec3<f32>, n: vec3<f32>, v: vec3<f32>, albedo: vec3<f32>, metallic: f32, roughness: f32) -> vec3<f32> {
    var color = vec3<f32>(0.0);
    if lighting.sun_direction.w > 0.5 {
        let l = normalize(-lighting.sun_direction.xyz);
        color += brdf(n, v, l, albedo, metallic, roughness) * lighting.sun_color.rgb * sun_shadow(world_pos);
    }
    for (var i = 0u; i < lighting.counts.x; i = i + 1u) {
        let light = point_lights[i];
        let to_light = light.position_radius.xyz - world_pos;
        let distance = length(to_light);
        let radius = light.position_radius.w;
        if distance >= radius {
            continue;
        }
        let falloff = 1.0 - distance / radius;
        let attenuation = falloff * falloff * light.color_intensity.w;
        let l = to_light / max(distance, 0.0001);
        color += brdf(n, v, l, albedo, metallic, roughness)
            * light.color_intensity.rgb
            * attenuation
            * point_shadow(light, world_pos);
    }
    return color;
}
"#;

const DEFERRED_LIGHTING: &str = r#"
fn reconstruct_world_position(pixel: vec2<f32>, depth: f32) -> vec3<f32> {
    let uv = pixel * camera.viewport.zw;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let view_pos = camera.inv_proj * ndc;
    let world = camera.inv_view * (view_pos / view_pos.w);
    return world.xyz;
}

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let albedo_sample = textureLoad(gbuffer_albedo, pixel, 0);
    let normal_sample = textureLoad(gbuffer_normal, pixel, 0);
    let material_sample = textureLoad(gbuffer_material, pixel, 0);
    let depth = textureLoad(gbuffer_depth, pixel, 0);

    // Background
    if depth >= 1.0 {
        return lighting.clear_color;
    }

    let world_pos = reconstruct_world_position(input.position.xy, depth);
    let n = normalize(normal_sample.xyz);
    let v = normalize(camera.position.xyz - world_pos);
    let albedo = albedo_sample.rgb;

    var color = lighting.ambient.rgb * albedo * albedo_sample.a + material_sample.rgb;
    color += shade(world_pos, n, v, albedo, material_sample.a, normal_sample.w);
    return vec4<f32>(color, 1.0);
}
"#;

const FORWARD: &str = r#"
@fragment
fn fs_main(input: MeshOutput) -> @location(0) vec4<f32> {
    let surface = sample_surface(input);
    let v = normalize(camera.position.xyz - input.world_position);
    var color = lighting.ambient.rgb * surface.base_color.rgb * surface.occlusion + surface.emissive;
    color += shade(
        input.world_position,
        surface.normal,
        v,
        surface.base_color.rgb,
        surface.metallic,
        surface.roughness,
    );
    return vec4<f32>(color, surface.base_color.a);
}
"#;

const PARTICLES: &str = r#"
struct Particle {
    // xyz = position, w = size
    position_size: vec4<f32>,
    color: vec4<f32>,
}

@group(1) @binding(0) var<storage, read> particles: array<Particle>;

struct ParticleOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) corner: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> ParticleOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let particle = particles[instance_index];
    let corner = corners[vertex_index % 6u];

    // Camera-facing billboard
    let right = camera.inv_view[0].xyz;
    let up = camera.inv_view[1].xyz;
    let size = particle.position_size.w;
    let world = particle.position_size.xyz + (right * corner.x + up * corner.y) * size;

    var output: ParticleOutput;
    output.clip_position = camera.view_proj * vec4<f32>(world, 1.0);
    output.corner = corner;
    output.color = particle.color;
    return output;
}

@fragment
fn fs_main(input: ParticleOutput) -> @location(0) vec4<f32> {
    let falloff = saturate(1.0 - length(input.corner));
    let alpha = input.color.a * falloff;
    return vec4<f32>(input.color.rgb * alpha, alpha);
}
"#;

const POST_COMMON: &str = r#"
struct PostUniforms {
    // x = exposure, y = gamma
    tonemap: vec4<f32>,
    // rgb = lift, w = saturation
    lift: vec4<f32>,
    // rgb = gamma, w = contrast
    gamma: vec4<f32>,
    gain: vec4<f32>,
    // x = tonemap operator, y = pixel block, z = palette levels, w = flags
    options: vec4<u32>,
}

const FLAG_DITHER: u32 = 1u;
const FLAG_ENCODE_SRGB: u32 = 2u;

@group(0) @binding(0) var<uniform> post: PostUniforms;
@group(0) @binding(1) var input_texture: texture_2d<f32>;
@group(0) @binding(2) var overlay_texture: texture_2d<f32>;
"#;

const TONE_MAPPING: &str = r#"
fn aces_tonemap(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return saturate((color * (a * color + b)) / (color * (c * color + d) + e));
}

fn reinhard_tonemap(color: vec3<f32>) -> vec3<f32> {
    return color / (color + vec3<f32>(1.0));
}

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let color = textureLoad(input_texture, pixel, 0).rgb * post.tonemap.x;

    var mapped: vec3<f32>;
    switch post.options.x {
        case 0u: { mapped = reinhard_tonemap(color); }
        case 1u: { mapped = aces_tonemap(color); }
        default: { mapped = saturate(color); }
    }

    let corrected = pow(mapped, vec3<f32>(1.0 / post.tonemap.y));
    return vec4<f32>(corrected, 1.0);
}
"#;

const COLOR_GRADING: &str = r#"
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    var color = textureLoad(input_texture, pixel, 0).rgb;

    // Lift / gamma / gain
    color = color * post.gain.rgb + post.lift.rgb * (vec3<f32>(1.0) - color);
    color = pow(max(color, vec3<f32>(0.0)), vec3<f32>(1.0) / max(post.gamma.rgb, vec3<f32>(0.001)));

    let luma = dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));
    color = mix(vec3<f32>(luma), color, post.lift.w);
    color = (color - vec3<f32>(0.5)) * post.gamma.w + vec3<f32>(0.5);

    return vec4<f32>(saturate(color), 1.0);
}
"#;

const PIXELATION: &str = r#"
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    var bayer = array<f32, 16>(
        0.03125, 0.53125, 0.15625, 0.65625,
        0.78125, 0.28125, 0.90625, 0.40625,
        0.21875, 0.71875, 0.09375, 0.59375,
        0.96875, 0.46875, 0.84375, 0.34375,
    );

    let block = max(post.options.y, 1u);
    let size = textureDimensions(input_texture);
    let pixel = vec2<u32>(input.position.xy);
    let cell = pixel / block;
    let center = min(cell * block + vec2<u32>(block / 2u), size - vec2<u32>(1u));
    var color = textureLoad(input_texture, vec2<i32>(center), 0).rgb;

    let levels = post.options.z;
    if levels > 1u {
        var threshold = 0.5;
        if (post.options.w & FLAG_DITHER) != 0u {
            threshold = bayer[(cell.y % 4u) * 4u + cell.x % 4u];
        }
        let steps = f32(levels - 1u);
        color = floor(color * steps + vec3<f32>(threshold)) / steps;
    }
    return vec4<f32>(saturate(color), 1.0);
}
"#;

const COLOR_SPACE: &str = r#"
fn srgb_to_linear(c: vec3<f32>) -> vec3<f32> {
    let lower = c / 12.92;
    let higher = pow((c + vec3<f32>(0.055)) / 1.055, vec3<f32>(2.4));
    return select(higher, lower, c < vec3<f32>(0.04045));
}

fn linear_to_srgb(c: vec3<f32>) -> vec3<f32> {
    let lower = c * 12.92;
    let higher = 1.055 * pow(c, vec3<f32>(1.0 / 2.4)) - vec3<f32>(0.055);
    return select(higher, lower, c < vec3<f32>(0.0031308));
}
"#;

const UI: &str = r#"
struct UiUniforms {
    // xy = screen size in points
    screen_size: vec4<f32>,
}

@group(0) @binding(0) var<uniform> ui: UiUniforms;
@group(1) @binding(0) var ui_texture: texture_2d<f32>;
@group(1) @binding(1) var ui_sampler: sampler;

struct UiInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct UiOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(input: UiInput) -> UiOutput {
    var output: UiOutput;
    output.position = vec4<f32>(
        2.0 * input.position.x / ui.screen_size.x - 1.0,
        1.0 - 2.0 * input.position.y / ui.screen_size.y,
        0.0,
        1.0,
    );
    output.uv = input.uv;
    // Vertex colors arrive premultiplied in gamma space.
    output.color = vec4<f32>(srgb_to_linear(input.color.rgb), input.color.a);
    return output;
}

@fragment
fn fs_main(input: UiOutput) -> @location(0) vec4<f32> {
    return textureSample(ui_texture, ui_sampler, input.uv) * input.color;
}
"#;

const COMBINE_UI: &str = r#"
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let scene = textureLoad(input_texture, pixel, 0);
    let overlay = textureLoad(overlay_texture, pixel, 0);

    // Premultiplied "over"
    var color = overlay.rgb + scene.rgb * (1.0 - overlay.a);
    if (post.options.w & FLAG_ENCODE_SRGB) != 0u {
        color = linear_to_srgb(color);
    }
    return vec4<f32>(color, 1.0);
}
"#;

const SHADOW_DEPTH: &str = r#"
@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    let instance = instances[input.instance_index];
    let world = world_transform(instance, input.joints, input.weights);
    return camera.view_proj * world * vec4<f32>(input.position, 1.0);
}
"#;

const PICK_ID: &str = r#"
struct PickOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) @interpolate(flat) id: u32,
}

@vertex
fn vs_main(input: VertexInput) -> PickOutput {
    let instance = instances[input.instance_index];
    let world = world_transform(instance, input.joints, input.weights);
    var output: PickOutput;
    output.clip_position = camera.view_proj * world * vec4<f32>(input.position, 1.0);
    output.id = instance.instance_id;
    return output;
}

@fragment
fn fs_main(input: PickOutput) -> @location(0) u32 {
    return input.id;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::gbuffer(ShaderProgram::GBuffer)]
    #[case::deferred_lighting(ShaderProgram::DeferredLighting)]
    #[case::forward_lighting(ShaderProgram::ForwardLighting)]
    #[case::particles(ShaderProgram::Particles)]
    #[case::tone_mapping(ShaderProgram::ToneMapping)]
    #[case::color_grading(ShaderProgram::ColorGrading)]
    #[case::pixelation(ShaderProgram::Pixelation)]
    #[case::ui(ShaderProgram::Ui)]
    #[case::combine_ui(ShaderProgram::CombineUi)]
    #[case::shadow_depth(ShaderProgram::ShadowDepth)]
    #[case::pick_id(ShaderProgram::PickId)]
    fn test_program_compiles(#[case] program: ShaderProgram) {
        if let Err(e) = program.validate() {
            panic!("{}", e);
        }
        assert!(!program.to_spirv(ShaderStage::Vertex).unwrap().is_empty());
        if program.has_fragment() {
            assert!(!program.to_spirv(ShaderStage::Fragment).unwrap().is_empty());
        }
    }

    #[test]
    fn test_all_programs_listed_once() {
        let mut labels: Vec<&str> = ShaderProgram::ALL.iter().map(|p| p.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), ShaderProgram::ALL.len());
    }
}
