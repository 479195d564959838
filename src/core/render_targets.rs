use crate::core::{
    devices::DeviceContext,
    memory::{create_attachment, GpuImage},
    swapchain::SwapchainState,
};

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};
use log::*;

/// Depth formats in order of preference.
pub const DEPTH_FORMATS: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal-tiling features include
/// `features`.
pub fn pick_supported_format(
    candidates: &[vk::Format],
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates
        .iter()
        .cloned()
        .find(|&f| properties(f).optimal_tiling_features.contains(features))
}

pub unsafe fn get_depth_format(ctx: &DeviceContext) -> Result<vk::Format> {
    pick_supported_format(
        DEPTH_FORMATS,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |f| ctx.instance.get_physical_device_format_properties(ctx.physical_device, f),
    )
    .ok_or_else(|| anyhow!("Failed to find supported depth format."))
}

pub fn is_multisampled(samples: vk::SampleCountFlags) -> bool {
    samples != vk::SampleCountFlags::_1
}

/// Attachments per framebuffer: color and depth, plus the
/// resolve target when multisampling.
pub fn attachment_count(samples: vk::SampleCountFlags) -> usize {
    if is_multisampled(samples) { 3 } else { 2 }
}

/// Clear values in attachment order. The resolve attachment is
/// never loaded, but still takes a slot.
pub fn clear_values(samples: vk::SampleCountFlags, color: [f32; 4]) -> Vec<vk::ClearValue> {
    let color = vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    };
    let depth = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
    };

    if is_multisampled(samples) {
        vec![color, depth, color]
    } else {
        vec![color, depth]
    }
}

pub unsafe fn create_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    let multisampled = is_multisampled(samples);

    // With multisampling the color attachment is an internal
    // image resolved into the swapchain image at the end of the
    // subpass; without it we draw into the swapchain directly.
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        })
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        })
        .build();

    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let resolve_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    let resolve_attachment_ref = vk::AttachmentReference::builder()
        .attachment(2)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = &[color_attachment_ref];
    let resolve_attachments = &[resolve_attachment_ref];
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref);
    if multisampled {
        subpass = subpass.resolve_attachments(resolve_attachments);
    }

    // The image handed over by the acquire may still be read by
    // the presentation engine, and the depth buffer by the
    // previous frame; both writes wait for those stages.
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);

    let attachments = if multisampled {
        vec![color_attachment, depth_attachment, resolve_attachment]
    } else {
        vec![color_attachment, depth_attachment]
    };

    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = device.create_render_pass(&info, None)?;

    info!("Render pass created ({} attachments).", attachments.len());
    Ok(render_pass)
}

/// Everything drawn into that depends on the swapchain images.
/// Rebuilt together with the swapchain.
pub struct RenderTargets {
    pub render_pass: vk::RenderPass,
    pub samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
    pub depth: GpuImage,
    /// Multisampled color target, absent at one sample per
    /// pixel.
    pub color: Option<GpuImage>,
    /// One framebuffer per swapchain image, in the same order.
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
    /// Swapchain generation these targets were built against.
    pub generation: u64,
}

impl RenderTargets {
    pub unsafe fn create(
        ctx: &DeviceContext,
        swapchain: &SwapchainState,
        generation: u64,
    ) -> Result<Self> {
        let device = &ctx.device;
        let samples = ctx.msaa_samples;
        let extent = swapchain.extent;
        let depth_format = get_depth_format(ctx)?;

        let mut targets = Self {
            render_pass: create_render_pass(device, swapchain.format.format, depth_format, samples)?,
            samples,
            depth_format,
            depth: GpuImage::default(),
            color: None,
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            extent,
            generation,
        };

        // Partially built targets are torn down through the same
        // path as complete ones; null handles are ignored by the
        // destroy calls.
        if let Err(error) = targets.create_attachments(ctx, swapchain) {
            targets.destroy(device);
            return Err(error);
        }

        info!("Render targets created for generation {}.", generation);
        Ok(targets)
    }

    unsafe fn create_attachments(
        &mut self,
        ctx: &DeviceContext,
        swapchain: &SwapchainState,
    ) -> Result<()> {
        let device = &ctx.device;

        if is_multisampled(self.samples) {
            self.color = Some(create_attachment(
                device,
                &ctx.memory_properties,
                self.extent,
                self.samples,
                swapchain.format.format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
            )?);
            debug!("Multisampled color target created.");
        }

        self.depth = create_attachment(
            device,
            &ctx.memory_properties,
            self.extent,
            self.samples,
            self.depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        debug!("Depth target created ({:?}).", self.depth_format);

        for &view in &swapchain.image_views {
            let attachments = match &self.color {
                Some(color) => vec![color.view, self.depth.view, view],
                None => vec![view, self.depth.view],
            };

            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            self.framebuffers.push(device.create_framebuffer(&info, None)?);
        }

        Ok(())
    }

    pub unsafe fn destroy(&self, device: &Device) {
        self.framebuffers
            .iter()
            .for_each(|&f| device.destroy_framebuffer(f, None));
        device.destroy_render_pass(self.render_pass, None);

        if let Some(color) = &self.color {
            color.destroy(device);
        }
        self.depth.destroy(device);

        info!("Render targets of generation {} destroyed.", self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multisampling_adds_a_resolve_attachment() {
        assert_eq!(attachment_count(vk::SampleCountFlags::_1), 2);
        assert_eq!(attachment_count(vk::SampleCountFlags::_4), 3);
        assert_eq!(attachment_count(vk::SampleCountFlags::_8), 3);
    }

    #[test]
    fn clear_values_match_attachments() {
        let color = [0.0, 0.0, 1.0, 1.0];
        for samples in [vk::SampleCountFlags::_1, vk::SampleCountFlags::_2] {
            assert_eq!(clear_values(samples, color).len(), attachment_count(samples));
        }

        let values = clear_values(vk::SampleCountFlags::_4, color);
        unsafe {
            assert_eq!(values[0].color.float32, color);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
        }
    }

    #[test]
    fn preferred_depth_format_comes_first() {
        let picked = pick_supported_format(
            DEPTH_FORMATS,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            },
        );
        assert_eq!(picked, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn unsupported_candidates_are_skipped() {
        let picked = pick_supported_format(
            DEPTH_FORMATS,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |f| vk::FormatProperties {
                optimal_tiling_features: if f == vk::Format::D24_UNORM_S8_UINT {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::FormatFeatureFlags::empty()
                },
                ..Default::default()
            },
        );
        assert_eq!(picked, Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn no_supported_format_yields_none() {
        let picked = pick_supported_format(
            DEPTH_FORMATS,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties::default(),
        );
        assert_eq!(picked, None);
    }
}
