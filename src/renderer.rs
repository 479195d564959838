use crate::{
    config::RendererConfig,
    core::{
        devices::DeviceContext,
        frame::FrameResources,
        pipeline::{push_constant_bytes, PipelineTarget},
        render_targets::{clear_values, RenderTargets},
        swapchain::{choose_extent, SwapchainState},
    },
    frame_loop::{FrameBackend, FrameLoop, FrameOutcome, FrameStats},
    scene::Scene,
};

use vulkanalia::{
    prelude::v1_0::*,
    vk::{KhrSurfaceExtension, KhrSwapchainExtension},
    VkResult,
};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use anyhow::{anyhow, Result};
use log::*;

/// The Vulkan objects a frame touches, driven by `FrameLoop`.
pub struct VulkanBackend {
    ctx: DeviceContext,
    frames: FrameResources,
    swapchain: Option<SwapchainState>,
    targets: Option<RenderTargets>,
    scene: Option<Box<dyn Scene>>,
    clear_color: [f32; 4],
}

impl VulkanBackend {
    unsafe fn create<W>(window: &W, config: &RendererConfig) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let mut ctx = DeviceContext::create(window, config)?;
        let frames = match FrameResources::create(&ctx) {
            Ok(frames) => frames,
            Err(error) => {
                ctx.destroy();
                return Err(error);
            }
        };

        Ok(Self {
            ctx,
            frames,
            swapchain: None,
            targets: None,
            scene: None,
            clear_color: config.clear_color,
        })
    }

    fn pipeline_target(&self) -> Option<PipelineTarget> {
        self.targets.as_ref().map(|t| PipelineTarget {
            render_pass: t.render_pass,
            samples: t.samples,
            set_layout: self.frames.descriptors.layout,
            extent: t.extent,
        })
    }

    unsafe fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = &self.ctx.device;
        let targets = self.targets
            .as_ref()
            .ok_or_else(|| anyhow!("Recording without render targets."))?;
        let frame = &self.frames.slots[slot];
        let command_buffer = frame.command_buffer;

        // The slot's fence has been waited on, so both the
        // command buffer and the uniform buffer are ours again.
        if let Some(scene) = self.scene.as_mut() {
            let uniforms = scene.frame_uniforms(targets.extent);
            self.frames.write_uniforms(slot, &uniforms);
        }

        device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;

        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(command_buffer, &info)?;

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(targets.extent)
            .build();

        let clear_values = clear_values(targets.samples, self.clear_color);
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(targets.render_pass)
            .framebuffer(targets.framebuffers[image_index as usize])
            .render_area(render_area)
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);

        let pipeline = self.scene
            .as_ref()
            .and_then(|s| s.pipeline().state().copied().map(|p| (s, p)));

        if let Some((scene, pipeline)) = pipeline {
            let viewport = vk::Viewport::builder()
                .x(0.0)
                .y(0.0)
                .width(targets.extent.width as f32)
                .height(targets.extent.height as f32)
                .min_depth(0.0)
                .max_depth(1.0);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[render_area]);

            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                &[frame.descriptor_set],
                &[],
            );

            for drawable in scene.drawables() {
                device.cmd_push_constants(
                    command_buffer,
                    pipeline.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    push_constant_bytes(&drawable.model),
                );
                device.cmd_bind_vertex_buffers(command_buffer, 0, &[drawable.vertex_buffer], &[0]);
                device.cmd_bind_index_buffer(
                    command_buffer,
                    drawable.index_buffer,
                    0,
                    vk::IndexType::UINT32,
                );
                device.cmd_draw_indexed(command_buffer, drawable.index_count, 1, 0, 0, 0);
            }
        }

        device.cmd_end_render_pass(command_buffer);
        device.end_command_buffer(command_buffer)?;

        Ok(())
    }

    unsafe fn destroy(&mut self) {
        // No-ops after a clean teardown.
        self.destroy_pipeline();
        self.destroy_render_targets();
        self.destroy_swapchain();

        if let Some(mut scene) = self.scene.take() {
            scene.destroy(&self.ctx.device);
            info!("Scene resources destroyed.");
        }

        self.frames.destroy(&self.ctx.device);
        self.ctx.destroy();
    }
}

impl FrameBackend for VulkanBackend {
    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.device.device_wait_idle()? };
        Ok(())
    }

    fn destroy_pipeline(&mut self) {
        if let Some(scene) = self.scene.as_mut() {
            unsafe { scene.pipeline_mut().destroy(&self.ctx.device) };
        }
    }

    fn destroy_render_targets(&mut self) {
        if let Some(targets) = self.targets.take() {
            unsafe { targets.destroy(&self.ctx.device) };
        }
    }

    fn destroy_swapchain(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            unsafe { swapchain.destroy(&self.ctx.device) };
        }
    }

    fn surface_extent(&mut self, requested: vk::Extent2D) -> Result<vk::Extent2D> {
        let capabilities = unsafe {
            self.ctx.instance.get_physical_device_surface_capabilities_khr(
                self.ctx.physical_device,
                self.ctx.surface,
            )?
        };

        Ok(choose_extent(&capabilities, requested))
    }

    fn create_swapchain(&mut self, requested: vk::Extent2D) -> Result<vk::Extent2D> {
        let swapchain = unsafe { SwapchainState::create(&self.ctx, requested)? };
        let extent = swapchain.extent;
        self.swapchain = Some(swapchain);
        Ok(extent)
    }

    fn create_render_targets(&mut self, generation: u64) -> Result<()> {
        let swapchain = self.swapchain
            .as_ref()
            .ok_or_else(|| anyhow!("Render targets requested without a swapchain."))?;

        self.targets = Some(unsafe { RenderTargets::create(&self.ctx, swapchain, generation)? });
        Ok(())
    }

    fn create_pipeline(&mut self) -> Result<()> {
        let target = match self.pipeline_target() {
            Some(target) => target,
            None => return Err(anyhow!("Pipeline requested without render targets.")),
        };

        if let Some(scene) = self.scene.as_mut() {
            unsafe { scene.pipeline_mut().build(&self.ctx.device, &target)? };
        }

        Ok(())
    }

    fn recycle_sync(&mut self, slot: usize) -> Result<()> {
        unsafe { self.frames.recycle_sync(&self.ctx.device, slot) }
    }

    fn wait_for_slot(&mut self, slot: usize) -> VkResult<()> {
        let fence = self.frames.slots[slot].sync.in_flight;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX)? };
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, vk::SuccessCode)> {
        // Without a swapchain there is nothing to acquire; asking
        // for a rebuild is the only sensible answer.
        let swapchain = match &self.swapchain {
            Some(swapchain) => swapchain.swapchain,
            None => return Err(vk::ErrorCode::OUT_OF_DATE_KHR),
        };

        unsafe {
            self.ctx.device.acquire_next_image_khr(
                swapchain,
                u64::MAX,
                self.frames.slots[slot].sync.image_available,
                vk::Fence::null(),
            )
        }
    }

    fn reset_slot(&mut self, slot: usize) -> VkResult<()> {
        let fence = self.frames.slots[slot].sync.in_flight;
        unsafe { self.ctx.device.reset_fences(&[fence]) }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        unsafe { self.record_commands(slot, image_index) }
    }

    fn submit(&mut self, slot: usize) -> VkResult<()> {
        let frame = &self.frames.slots[slot];

        // Color output waits for the image to be released by the
        // presentation engine; earlier stages may start at once.
        let wait_semaphores = &[frame.sync.image_available];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[frame.command_buffer];
        let signal_semaphores = &[frame.sync.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                &[submit_info],
                frame.sync.in_flight,
            )?
        };

        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<vk::SuccessCode> {
        let swapchain = match &self.swapchain {
            Some(swapchain) => swapchain.swapchain,
            None => return Err(vk::ErrorCode::OUT_OF_DATE_KHR),
        };

        let wait_semaphores = &[self.frames.slots[slot].sync.render_finished];
        let swapchains = &[swapchain];
        let image_indices = &[image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        unsafe { self.ctx.device.queue_present_khr(self.ctx.present_queue, &info) }
    }
}

/// Entry point of the renderer: one call per application tick.
pub struct Renderer {
    backend: VulkanBackend,
    frames: FrameLoop,
    destroyed: bool,
}

impl Renderer {
    /// Connects to the GPU and builds the first swapchain for a
    /// `width` x `height` window.
    pub unsafe fn initialize<W>(
        window: &W,
        width: u32,
        height: u32,
        enable_validation: bool,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let config = RendererConfig::default().with_validation(enable_validation);
        Self::with_config(window, width, height, config)
    }

    pub unsafe fn with_config<W>(
        window: &W,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        info!(
            "Initializing renderer ({}x{}, validation {}).",
            width,
            height,
            if config.enable_validation { "on" } else { "off" },
        );

        let mut backend = VulkanBackend::create(window, &config)?;
        let mut frames = FrameLoop::new(vk::Extent2D { width, height });

        if let Err(error) = frames.build(&mut backend) {
            let _ = backend.wait_idle();
            backend.destroy();
            return Err(error);
        }

        Ok(Self { backend, frames, destroyed: false })
    }

    /// Replaces the scene drawn every frame. The previous scene,
    /// if any, is destroyed.
    pub unsafe fn set_scene(&mut self, scene: Box<dyn Scene>) -> Result<()> {
        self.backend.wait_idle()?;
        self.backend.destroy_pipeline();
        if let Some(mut previous) = self.backend.scene.take() {
            previous.destroy(&self.backend.ctx.device);
        }

        self.backend.scene = Some(scene);

        // Without render targets the pipeline is built with the
        // next swapchain.
        if self.backend.targets.is_some() {
            self.backend.create_pipeline()?;
        }

        Ok(())
    }

    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.frames.notify_resize(width, height);
    }

    /// Renders one frame, rebuilding the swapchain first if it
    /// was invalidated. Only unrecoverable failures are returned
    /// as errors.
    pub unsafe fn render_frame(&mut self) -> Result<FrameOutcome> {
        if self.destroyed {
            return Err(anyhow!("Renderer used after shutdown."));
        }

        self.frames.tick(&mut self.backend)
    }

    /// Waits for the GPU and destroys every object in reverse
    /// creation order. Safe to call more than once.
    pub unsafe fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Err(error) = self.frames.teardown(&mut self.backend) {
            warn!("Device did not go idle before shutdown: {}", error);
        }

        self.backend.destroy();
        info!("Renderer shut down after {} frame(s).", self.frames.stats().presents);
    }

    pub fn context(&self) -> &DeviceContext {
        &self.backend.ctx
    }

    pub fn frame_index(&self) -> usize {
        self.frames.frame_index()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.frames.extent()
    }

    pub fn generation(&self) -> u64 {
        self.frames.generation()
    }

    pub fn stats(&self) -> FrameStats {
        self.frames.stats()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        unsafe { self.shutdown() };
    }
}
