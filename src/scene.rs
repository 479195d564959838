//! What the renderer needs from whoever owns the things being
//! drawn.

use crate::core::pipeline::PipelineProvider;

use glam::Mat4;
use vulkanalia::prelude::v1_0::*;

/// Per-frame uniform block, bound at set 0, binding 0.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

/// One indexed draw with its model matrix, pushed as a
/// constant.
#[derive(Copy, Clone, Debug)]
pub struct Drawable {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub model: Mat4,
}

pub trait Scene {
    /// Pipeline used for every drawable of this scene. Built
    /// and destroyed by the renderer along with the swapchain.
    fn pipeline(&self) -> &dyn PipelineProvider;

    fn pipeline_mut(&mut self) -> &mut dyn PipelineProvider;

    fn drawables(&self) -> &[Drawable];

    /// Called once per frame, while the CPU owns the slot's
    /// uniform buffer.
    fn frame_uniforms(&mut self, extent: vk::Extent2D) -> FrameUniforms;

    /// Releases scene-owned GPU resources. The device is idle
    /// and the pipeline already destroyed.
    unsafe fn destroy(&mut self, device: &Device);
}
