use crate::{
    core::shaders::load_shader_module,
    vertex::Vertex,
};

use std::{mem::size_of, path::PathBuf};

use glam::Mat4;
use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::*;

/// Size of the push constant block: one model matrix.
pub const PUSH_CONSTANT_SIZE: u32 = size_of::<Mat4>() as u32;

/// What a pipeline is built against. Changes whenever the
/// render targets are rebuilt.
#[derive(Copy, Clone, Debug)]
pub struct PipelineTarget {
    pub render_pass: vk::RenderPass,
    pub samples: vk::SampleCountFlags,
    pub set_layout: vk::DescriptorSetLayout,
    pub extent: vk::Extent2D,
}

/// A graphics pipeline and its layout.
#[derive(Copy, Clone, Debug, Default)]
pub struct PipelineState {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineState {
    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

/// Builds and tears down the pipeline of one kind of drawable.
///
/// The renderer calls `destroy` before the render targets go
/// away and `build` once the new ones exist, exactly once per
/// swapchain generation.
pub trait PipelineProvider {
    unsafe fn build(&mut self, device: &Device, target: &PipelineTarget) -> Result<()>;

    unsafe fn destroy(&mut self, device: &Device);

    /// The current pipeline, if built.
    fn state(&self) -> Option<&PipelineState>;
}

/// Opaque, depth-tested, per-vertex colored meshes.
pub struct MeshPipeline {
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    state: Option<PipelineState>,
}

impl MeshPipeline {
    pub fn new(vertex_shader: impl Into<PathBuf>, fragment_shader: impl Into<PathBuf>) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            state: None,
        }
    }
}

impl PipelineProvider for MeshPipeline {
    unsafe fn build(&mut self, device: &Device, target: &PipelineTarget) -> Result<()> {
        if self.state.is_some() {
            warn!("Mesh pipeline rebuilt without being destroyed first.");
            self.destroy(device);
        }

        let vert = load_shader_module(device, &self.vertex_shader)?;
        let frag = match load_shader_module(device, &self.fragment_shader) {
            Ok(module) => module,
            Err(error) => {
                device.destroy_shader_module(vert, None);
                return Err(error);
            }
        };

        let state = create_mesh_pipeline(device, target, vert, frag);

        // Modules are only needed while the pipeline is compiled.
        device.destroy_shader_module(vert, None);
        device.destroy_shader_module(frag, None);

        self.state = Some(state?);
        info!("Mesh pipeline created.");
        Ok(())
    }

    unsafe fn destroy(&mut self, device: &Device) {
        if let Some(state) = self.state.take() {
            state.destroy(device);
            info!("Mesh pipeline destroyed.");
        }
    }

    fn state(&self) -> Option<&PipelineState> {
        self.state.as_ref()
    }
}

pub unsafe fn create_pipeline_layout(
    device: &Device,
    set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .offset(0)
        .size(PUSH_CONSTANT_SIZE);

    let set_layouts = &[set_layout];
    let push_constant_ranges = &[push_constant_range];
    let info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    Ok(device.create_pipeline_layout(&info, None)?)
}

unsafe fn create_mesh_pipeline(
    device: &Device,
    target: &PipelineTarget,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
) -> Result<PipelineState> {
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert)
        .name(b"main\0");

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag)
        .name(b"main\0");

    let binding_descriptions = &[Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are set when recording, so a resize
    // alone would not need a new pipeline. These values are
    // ignored but keep the counts right.
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(target.extent.width as f32)
        .height(target.extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(target.extent);

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
        .dynamic_states(dynamic_states);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(target.samples);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(false);

    let attachments = &[attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(attachments);

    let layout = create_pipeline_layout(device, target.set_layout)?;

    let stages = &[vert_stage, frag_stage];
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(target.render_pass)
        .subpass(0)
        .base_pipeline_handle(vk::Pipeline::null())
        .base_pipeline_index(-1);

    let pipeline = match device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) {
        Ok((pipelines, _)) => pipelines[0],
        Err(error) => {
            device.destroy_pipeline_layout(layout, None);
            return Err(error.into());
        }
    };

    Ok(PipelineState { layout, pipeline })
}

/// Raw bytes of a model matrix, as pushed to the vertex stage.
pub fn push_constant_bytes(model: &Mat4) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            model as *const Mat4 as *const u8,
            PUSH_CONSTANT_SIZE as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_hold_one_matrix() {
        assert_eq!(PUSH_CONSTANT_SIZE, 64);
        assert_eq!(push_constant_bytes(&Mat4::IDENTITY).len(), 64);
    }

    #[test]
    fn push_constant_bytes_are_column_major() {
        let model = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let bytes = push_constant_bytes(&model);
        let translation_x = f32::from_le_bytes([bytes[48], bytes[49], bytes[50], bytes[51]]);
        assert_eq!(translation_x, 1.0);
    }

    #[test]
    fn unbuilt_pipeline_has_no_state() {
        let pipeline = MeshPipeline::new("a.vert.spv", "a.frag.spv");
        assert!(pipeline.state().is_none());
    }
}
