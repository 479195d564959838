use crate::{
    config::MAX_FRAMES_IN_FLIGHT,
    core::{
        descriptors::DescriptorState,
        devices::DeviceContext,
        memory::{create_buffer, GpuBuffer},
    },
    scene::FrameUniforms,
};

use std::{ffi::c_void, mem::size_of, ptr::copy_nonoverlapping as memcpy};

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::*;

/// Synchronization primitives of one frame slot.
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameSync {
    /// Signaled by the presentation engine once the acquired
    /// image may be written.
    pub image_available: vk::Semaphore,
    /// Signaled by the graphics queue once drawing is done and
    /// the image may be presented.
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU is done with this slot's command
    /// buffer. Created signaled so the first wait returns.
    pub in_flight: vk::Fence,
}

impl FrameSync {
    pub unsafe fn create(device: &Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self::default();
        let result = (|| -> Result<()> {
            sync.image_available = device.create_semaphore(&semaphore_info, None)?;
            sync.render_finished = device.create_semaphore(&semaphore_info, None)?;
            sync.in_flight = device.create_fence(&fence_info, None)?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(sync),
            Err(error) => {
                sync.destroy(device);
                Err(error)
            }
        }
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}

/// Everything a single in-flight frame owns.
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
    pub uniform: GpuBuffer,
    /// Persistent mapping of `uniform`, host coherent.
    pub uniform_mapped: *mut c_void,
    pub descriptor_set: vk::DescriptorSet,
}

/// The ring of frame slots and the objects they share. Lives as
/// long as the device.
pub struct FrameResources {
    pub command_pool: vk::CommandPool,
    pub slots: Vec<FrameSlot>,
    pub descriptors: DescriptorState,
}

impl FrameResources {
    pub unsafe fn create(ctx: &DeviceContext) -> Result<Self> {
        let device = &ctx.device;

        // Each buffer is re-recorded every time its slot comes
        // round, so buffers must be individually resettable.
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.queue_families.graphics);
        let command_pool = device.create_command_pool(&info, None)?;
        info!("Command pool created.");

        let mut uniforms = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        let mut syncs = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);

        match Self::create_slots(ctx, command_pool, &mut uniforms, &mut syncs) {
            Ok(frames) => Ok(frames),
            Err(error) => {
                for sync in &syncs {
                    sync.destroy(device);
                }
                for (uniform, _) in &uniforms {
                    device.unmap_memory(uniform.memory);
                    uniform.destroy(device);
                }
                // Command buffers go with their pool.
                device.destroy_command_pool(command_pool, None);
                Err(error)
            }
        }
    }

    /// Fills in everything that lives in the pool. Whatever was
    /// created before a failure is left in `uniforms` and `syncs`
    /// for the caller to release.
    unsafe fn create_slots(
        ctx: &DeviceContext,
        command_pool: vk::CommandPool,
        uniforms: &mut Vec<(GpuBuffer, *mut c_void)>,
        syncs: &mut Vec<FrameSync>,
    ) -> Result<Self> {
        let device = &ctx.device;

        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);
        let command_buffers = device.allocate_command_buffers(&info)?;

        let range = size_of::<FrameUniforms>() as vk::DeviceSize;
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let uniform = create_buffer(
                device,
                &ctx.memory_properties,
                range,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let mapped = match uniform.map(device) {
                Ok(mapped) => mapped,
                Err(error) => {
                    uniform.destroy(device);
                    return Err(error);
                }
            };
            uniforms.push((uniform, mapped));
        }
        info!("Uniform buffers created.");

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            syncs.push(FrameSync::create(device)?);
        }
        info!("Sync objects created.");

        // Last, so nothing after it can fail.
        let buffers = uniforms.iter().map(|(u, _)| *u).collect::<Vec<_>>();
        let descriptors = DescriptorState::create(device, &buffers, range)?;

        let slots = uniforms
            .iter()
            .zip(syncs.iter())
            .enumerate()
            .map(|(i, (&(uniform, uniform_mapped), &sync))| FrameSlot {
                command_buffer: command_buffers[i],
                sync,
                uniform,
                uniform_mapped,
                descriptor_set: descriptors.sets[i],
            })
            .collect();

        Ok(Self { command_pool, slots, descriptors })
    }

    /// Replaces the semaphores and fence of a slot whose state
    /// is unknown after a failed frame. The device must be idle.
    pub unsafe fn recycle_sync(&mut self, device: &Device, slot: usize) -> Result<()> {
        let fresh = FrameSync::create(device)?;
        let frame = &mut self.slots[slot];
        frame.sync.destroy(device);
        frame.sync = fresh;

        debug!("Sync objects of frame slot {} recreated.", slot);
        Ok(())
    }

    /// Copies the uniform block into the slot's mapped buffer.
    /// Only valid while the CPU owns the slot.
    pub unsafe fn write_uniforms(&self, slot: usize, uniforms: &FrameUniforms) {
        memcpy(uniforms, self.slots[slot].uniform_mapped.cast(), 1);
    }

    pub unsafe fn destroy(&self, device: &Device) {
        self.descriptors.destroy(device);

        for slot in &self.slots {
            slot.sync.destroy(device);
            device.unmap_memory(slot.uniform.memory);
            slot.uniform.destroy(device);
        }
        info!("Frame slots destroyed.");

        // Command buffers go with their pool.
        device.destroy_command_pool(self.command_pool, None);
        info!("Command pool destroyed.");
    }
}
