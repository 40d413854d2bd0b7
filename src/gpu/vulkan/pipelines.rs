use std::ffi::CStr;
use std::rc::Rc;

use ash::vk;

use crate::gpu::{
    BindingKind, Features, GPUError, PipelineState, Reflection, Result, ShaderStage, VertexLayout,
};

use super::conversions::{blend_attachment, vk_format};
use super::device::Core;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// States every graphics pipeline leaves to the command buffer.
const DYNAMIC_STATES: [vk::DynamicState; 7] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::PRIMITIVE_TOPOLOGY,
    vk::DynamicState::CULL_MODE,
    vk::DynamicState::FRONT_FACE,
    vk::DynamicState::DEPTH_BIAS,
    vk::DynamicState::DEPTH_BIAS_ENABLE,
];

/// Push-descriptor set 0 and the pipeline layout around it. Shared by a
/// shader and every pipeline compiled from it.
pub(super) struct ShaderLayout {
    pub(super) set_layout: vk::DescriptorSetLayout,
    pub(super) pipeline_layout: vk::PipelineLayout,
}

impl ShaderLayout {
    fn new(core: &Core, reflection: &Reflection) -> Result<Self> {
        let mut bindings = Vec::with_capacity(reflection.bindings.len());
        for binding in reflection.bindings.values() {
            if binding.set != 0 {
                return Err(GPUError::Shader(format!(
                    "'{}' is in descriptor set {}; only set 0 is supported",
                    binding.name, binding.set
                )));
            }
            if binding.kind == BindingKind::AccelerationStructure {
                return Err(GPUError::UnsupportedFeature(Features::RAYTRACING));
            }
            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.kind.into())
                    .descriptor_count(1)
                    .stage_flags(binding.stages.into())
                    .build(),
            );
        }
        let info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&bindings);
        let set_layout = unsafe { core.device.create_descriptor_set_layout(&info, None)? };
        let set_layouts = [set_layout];
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let pipeline_layout = match unsafe { core.device.create_pipeline_layout(&info, None) } {
            Ok(layout) => layout,
            Err(err) => {
                unsafe { core.device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(err.into());
            }
        };
        Ok(Self {
            set_layout,
            pipeline_layout,
        })
    }

    fn destroy(self, core: &Core) {
        unsafe {
            core.device.destroy_pipeline_layout(self.pipeline_layout, None);
            core.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Frees the layout once its last owner lets go.
pub(super) fn release_layout(core: &Core, layout: Rc<ShaderLayout>) {
    if let Ok(layout) = Rc::try_unwrap(layout) {
        layout.destroy(core);
    }
}

pub struct VkShader {
    pub(super) modules: Vec<(ShaderStage, vk::ShaderModule)>,
    pub(super) layout: Rc<ShaderLayout>,
    pub(super) vertex_layout: VertexLayout,
}

impl VkShader {
    pub(super) fn new(
        core: &Core,
        debug_name: &str,
        stages: &[(ShaderStage, &[u32])],
        reflection: &Reflection,
        vertex_layout: &VertexLayout,
    ) -> Result<Self> {
        let layout = Rc::new(ShaderLayout::new(core, reflection)?);
        let mut modules = Vec::with_capacity(stages.len());
        for (stage, words) in stages {
            let info = vk::ShaderModuleCreateInfo::builder().code(words);
            match unsafe { core.device.create_shader_module(&info, None) } {
                Ok(module) => {
                    core.set_name(module, &format!("{}.{:?}", debug_name, stage));
                    modules.push((*stage, module));
                }
                Err(err) => {
                    for (_, module) in modules {
                        unsafe { core.device.destroy_shader_module(module, None) };
                    }
                    release_layout(core, layout);
                    return Err(err.into());
                }
            }
        }
        Ok(Self {
            modules,
            layout,
            vertex_layout: vertex_layout.clone(),
        })
    }

    pub(super) fn destroy(self, core: &Core) {
        for (_, module) in self.modules {
            unsafe { core.device.destroy_shader_module(module, None) };
        }
        release_layout(core, self.layout);
    }
}

pub struct VkPipeline {
    pub(super) raw: vk::Pipeline,
    pub(super) layout: Rc<ShaderLayout>,
}

impl VkPipeline {
    /// Compiles a graphics pipeline for dynamic rendering into one color
    /// attachment plus the shared depth/stencil format.
    pub(super) fn graphics(
        core: &Core,
        shader: &VkShader,
        state: &PipelineState,
        color_format: vk::Format,
    ) -> Result<Self> {
        let stages: Vec<_> = shader
            .modules
            .iter()
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage((*stage).into())
                    .module(*module)
                    .name(ENTRY_POINT)
                    .build()
            })
            .collect();

        let vertex_bindings = if shader.vertex_layout.attributes.is_empty() {
            Vec::new()
        } else {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: shader.vertex_layout.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        };
        let vertex_attribs: Vec<_> = shader
            .vertex_layout
            .attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: 0,
                format: vk_format(attr.format),
                offset: attr.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attribs);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(state.topology.into());
        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let mut depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder();
        if let Some(depth) = state.depth {
            depth_stencil = depth_stencil
                .depth_test_enable(true)
                .depth_write_enable(depth.write_mask)
                .depth_compare_op(depth.func.into());
        }
        if let Some(stencil) = state.stencil {
            depth_stencil = depth_stencil
                .stencil_test_enable(true)
                .front(stencil.into())
                .back(stencil.into());
        }

        let attachments = [blend_attachment(state.blend)];
        let blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

        let color_formats = [color_format];
        let mut rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(core.depth_format)
            .stencil_attachment_format(core.depth_format);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut rendering)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(shader.layout.pipeline_layout);
        let raw = unsafe {
            core.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info.build()], None)
                .map_err(|(_, err)| err)?
        }[0];
        Ok(Self {
            raw,
            layout: Rc::clone(&shader.layout),
        })
    }

    pub(super) fn destroy(self, core: &Core) {
        unsafe { core.device.destroy_pipeline(self.raw, None) };
        release_layout(core, self.layout);
    }
}
