//! Render passes, framebuffers, descriptor sets and graphics pipelines

use std::ffi::CString;

use ash::vk;

use super::{convert, unknown, VkDescriptorSet, VkPipeline, VkSetLayout, VulkanDevice, VulkanState};
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::shaders::ShaderStage;

fn pipeline_error(what: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |e| convert::vk_error(e, what, RenderError::PipelineCreationFailed)
}

/// Resolved resource for one descriptor write
enum WriteInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

impl VulkanDevice {
    pub(super) fn create_render_pass_object(
        &self,
        state: &mut VulkanState,
        desc: &RenderPassDescriptor,
    ) -> RenderResult<RenderPassHandle> {
        let attachments: Vec<_> = desc
            .attachments
            .iter()
            .map(|a| vk::AttachmentDescription {
                format: convert::format(a.format),
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: convert::load_op(a.load_op),
                store_op: convert::store_op(a.store_op),
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: convert::image_layout(a.initial_layout),
                final_layout: convert::image_layout(a.final_layout),
                ..Default::default()
            })
            .collect();

        // References must outlive the subpass descriptions pointing at them.
        let references: Vec<(Vec<vk::AttachmentReference>, Vec<vk::AttachmentReference>, Option<vk::AttachmentReference>)> =
            desc.subpasses
                .iter()
                .map(|s| {
                    (
                        s.inputs.iter().map(convert::attachment_reference).collect(),
                        s.colors.iter().map(convert::attachment_reference).collect(),
                        s.depth.as_ref().map(convert::attachment_reference),
                    )
                })
                .collect();
        let subpasses: Vec<_> = references
            .iter()
            .map(|(inputs, colors, depth)| {
                let subpass = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .input_attachments(inputs)
                    .color_attachments(colors);
                match depth {
                    Some(depth) => subpass.depth_stencil_attachment(depth),
                    None => subpass,
                }
            })
            .collect();

        let dependencies: Vec<_> = desc
            .dependencies
            .iter()
            .map(|d| {
                let (src_stage_mask, src_access_mask) = convert::access_scope(d.src_access, true);
                let (dst_stage_mask, dst_access_mask) = convert::access_scope(d.dst_access, false);
                vk::SubpassDependency {
                    src_subpass: convert::subpass_index(d.src),
                    dst_subpass: convert::subpass_index(d.dst),
                    src_stage_mask,
                    dst_stage_mask,
                    src_access_mask,
                    dst_access_mask,
                    dependency_flags: if d.by_region {
                        vk::DependencyFlags::BY_REGION
                    } else {
                        vk::DependencyFlags::empty()
                    },
                }
            })
            .collect();

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { self.device.create_render_pass(&render_pass_info, None) }.map_err(|e| {
            convert::vk_error(e, &format!("render pass '{}'", desc.label), RenderError::InvalidGraph)
        })?;
        let id = state.alloc_id();
        state.render_passes.insert(id, render_pass);
        log::debug!(
            "Created render pass '{}' with {} subpasses",
            desc.label,
            desc.subpasses.len()
        );
        Ok(RenderPassHandle(id))
    }

    pub(super) fn create_framebuffer_object(
        &self,
        state: &mut VulkanState,
        desc: &FramebufferDescriptor,
    ) -> RenderResult<FramebufferHandle> {
        let render_pass = state
            .render_passes
            .get(&desc.render_pass.0)
            .copied()
            .ok_or_else(|| unknown("render pass", desc.render_pass.0))?;
        let views = desc
            .attachments
            .iter()
            .map(|view| {
                let texture = state.texture(view.texture)?;
                match view.layer {
                    None => Ok(texture.view),
                    Some(layer) => texture.layer_views.get(layer as usize).copied().ok_or_else(|| {
                        RenderError::ResourceCreationFailed(format!(
                            "framebuffer '{}' uses layer {} of '{}'",
                            desc.label, layer, texture.desc.label
                        ))
                    }),
                }
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);
        let framebuffer = unsafe { self.device.create_framebuffer(&framebuffer_info, None) }
            .map_err(|e| convert::vk_error(e, "create framebuffer", RenderError::ResourceCreationFailed))?;
        let id = state.alloc_id();
        state.framebuffers.insert(id, framebuffer);
        Ok(FramebufferHandle(id))
    }

    pub(super) fn create_set_layout_object(
        &self,
        state: &mut VulkanState,
        desc: &DescriptorSetLayoutDescriptor,
    ) -> RenderResult<DescriptorSetLayoutHandle> {
        let bindings: Vec<_> = desc
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(convert::descriptor_type(b.ty))
                    .descriptor_count(1)
                    .stage_flags(convert::shader_stages(b.stages))
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(pipeline_error("descriptor set layout"))?;
        let id = state.alloc_id();
        state.set_layouts.insert(
            id,
            VkSetLayout {
                layout,
                bindings: desc.bindings.clone(),
            },
        );
        Ok(DescriptorSetLayoutHandle(id))
    }

    pub(super) fn allocate_set_object(
        &self,
        state: &mut VulkanState,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        let set_layout = state
            .set_layouts
            .get(&layout.0)
            .map(|l| l.layout)
            .ok_or_else(|| unknown("descriptor set layout", layout.0))?;
        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(state.descriptor_pool)
            .set_layouts(&set_layouts);
        let live = state.descriptor_sets.len() as u64;
        let set = match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets
                .into_iter()
                .next()
                .ok_or_else(|| RenderError::ResourceCreationFailed("no descriptor set allocated".into()))?,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                return Err(RenderError::capacity(
                    "descriptor pool",
                    live + 1,
                    self.max_descriptor_sets as u64,
                ));
            }
            Err(e) => return Err(convert::vk_error(e, "allocate descriptor set", RenderError::ResourceCreationFailed)),
        };
        let id = state.alloc_id();
        state.descriptor_sets.insert(id, VkDescriptorSet { set, layout: layout.0 });
        Ok(DescriptorSetHandle(id))
    }

    pub(super) fn update_set_object(
        &self,
        state: &VulkanState,
        handle: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> RenderResult<()> {
        let set = state
            .descriptor_sets
            .get(&handle.0)
            .ok_or_else(|| unknown("descriptor set", handle.0))?;
        let layout = state
            .set_layouts
            .get(&set.layout)
            .ok_or_else(|| unknown("descriptor set layout", set.layout))?;

        let mut resolved = Vec::with_capacity(writes.len());
        for write in writes {
            let binding = layout
                .bindings
                .iter()
                .find(|b| b.binding == write.binding)
                .ok_or_else(|| RenderError::InvalidHandle(format!("descriptor binding {}", write.binding)))?;
            let info = match write.resource {
                DescriptorResource::Buffer { buffer, offset, size } => WriteInfo::Buffer(vk::DescriptorBufferInfo {
                    buffer: state.buffer(buffer)?.buffer,
                    offset,
                    range: size,
                }),
                DescriptorResource::Texture(texture) => {
                    let texture = state.texture(texture)?;
                    WriteInfo::Image(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: texture.view,
                        image_layout: convert::sampled_layout(&texture.desc),
                    })
                }
                DescriptorResource::Sampler(sampler) => WriteInfo::Image(vk::DescriptorImageInfo {
                    sampler: state
                        .samplers
                        .get(&sampler.0)
                        .copied()
                        .ok_or_else(|| unknown("sampler", sampler.0))?,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }),
            };
            resolved.push((write.binding, convert::descriptor_type(binding.ty), info));
        }

        let descriptor_writes: Vec<_> = resolved
            .iter()
            .map(|(binding, ty, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set.set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty);
                match info {
                    WriteInfo::Buffer(buffer) => write.buffer_info(std::slice::from_ref(buffer)),
                    WriteInfo::Image(image) => write.image_info(std::slice::from_ref(image)),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&descriptor_writes, &[]) };
        Ok(())
    }

    /// Compile the program's stages into shader modules.
    pub(super) fn compile_program(&self, desc: &PipelineDescriptor) -> RenderResult<Vec<(ShaderStage, vk::ShaderModule)>> {
        let mut stages = vec![ShaderStage::Vertex];
        if desc.program.has_fragment() {
            stages.push(ShaderStage::Fragment);
        }
        let mut modules = Vec::with_capacity(stages.len());
        for stage in stages {
            let compiled = desc.program.to_spirv(stage).and_then(|words| {
                let module_info = vk::ShaderModuleCreateInfo::default().code(&words);
                unsafe { self.device.create_shader_module(&module_info, None) }
                    .map_err(|e| convert::vk_error(e, "shader module", RenderError::ShaderCompilationFailed))
            });
            match compiled {
                Ok(module) => modules.push((stage, module)),
                Err(e) => {
                    for (_, module) in modules {
                        unsafe { self.device.destroy_shader_module(module, None) };
                    }
                    return Err(e);
                }
            }
        }
        Ok(modules)
    }

    pub(super) fn create_pipeline_object(
        &self,
        state: &mut VulkanState,
        desc: &PipelineDescriptor,
        modules: &[(ShaderStage, vk::ShaderModule)],
    ) -> RenderResult<PipelineHandle> {
        let render_pass = state
            .render_passes
            .get(&desc.render_pass.0)
            .copied()
            .ok_or_else(|| unknown("render pass", desc.render_pass.0))?;
        let set_layouts = desc
            .set_layouts
            .iter()
            .map(|h| {
                state
                    .set_layouts
                    .get(&h.0)
                    .map(|l| l.layout)
                    .ok_or_else(|| unknown("descriptor set layout", h.0))
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let entry_names = modules
            .iter()
            .map(|(stage, _)| CString::new(stage.entry_point()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RenderError::PipelineCreationFailed(e.to_string()))?;
        let shader_stages: Vec<_> = modules
            .iter()
            .zip(&entry_names)
            .map(|((stage, module), name)| {
                let flags = match stage {
                    ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
                    ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
                };
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(flags)
                    .module(*module)
                    .name(name)
            })
            .collect();

        let vertex_bindings: Vec<_> = match desc.vertex_layout {
            VertexLayout::None => Vec::new(),
            layout => vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: layout.stride(),
                input_rate: vk::VertexInputRate::VERTEX,
            }],
        };
        let vertex_attributes: Vec<_> = desc
            .vertex_layout
            .attributes()
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: 0,
                format: convert::vertex_format(a.format),
                offset: a.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let (bias_constant, bias_slope) = desc
            .depth
            .and_then(|d| d.bias)
            .map(|(constant, slope)| (constant as f32, slope as f32))
            .unwrap_or((0.0, 0.0));
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert::cull_mode(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(bias_constant != 0.0 || bias_slope != 0.0)
            .depth_bias_constant_factor(bias_constant)
            .depth_bias_slope_factor(bias_slope)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = match desc.depth {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(depth.write)
                .depth_compare_op(convert::compare_op(depth.compare)),
            None => vk::PipelineDepthStencilStateCreateInfo::default(),
        };
        let blend_attachments: Vec<_> = desc.color_targets.iter().map(|b| convert::blend_attachment(*b)).collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None) }
            .map_err(pipeline_error("pipeline layout"))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(desc.subpass);
        let created = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match created {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(convert::vk_error(
                    e,
                    &format!("pipeline '{}'", desc.label),
                    RenderError::PipelineCreationFailed,
                ));
            }
        };
        let Some(pipeline) = pipeline else {
            unsafe { self.device.destroy_pipeline_layout(layout, None) };
            return Err(RenderError::PipelineCreationFailed(format!(
                "pipeline '{}' was not created",
                desc.label
            )));
        };

        let id = state.alloc_id();
        state.pipelines.insert(id, VkPipeline { pipeline, layout });
        log::debug!("Created pipeline '{}' ({})", desc.label, desc.program.label());
        Ok(PipelineHandle(id))
    }
}
