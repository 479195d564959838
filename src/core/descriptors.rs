use crate::core::memory::GpuBuffer;

use vulkanalia::prelude::v1_0::*;
use anyhow::Result;
use log::*;

/// Binding of the per-frame uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;

/// The single set layout shared by every pipeline, its pool and
/// one set per frame slot.
pub struct DescriptorState {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl DescriptorState {
    /// Creates the layout, a pool sized for exactly one set per
    /// uniform buffer, and writes each set once.
    pub unsafe fn create(
        device: &Device,
        uniform_buffers: &[GpuBuffer],
        range: vk::DeviceSize,
    ) -> Result<Self> {
        let layout = create_descriptor_set_layout(device)?;

        let pool = match create_descriptor_pool(device, uniform_buffers.len() as u32) {
            Ok(pool) => pool,
            Err(error) => {
                device.destroy_descriptor_set_layout(layout, None);
                return Err(error);
            }
        };

        let state = Self { layout, pool, sets: Vec::new() };
        match state.allocate(device, uniform_buffers, range) {
            Ok(sets) => Ok(Self { sets, ..state }),
            Err(error) => {
                state.destroy(device);
                Err(error)
            }
        }
    }

    unsafe fn allocate(
        &self,
        device: &Device,
        uniform_buffers: &[GpuBuffer],
        range: vk::DeviceSize,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![self.layout; uniform_buffers.len()];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = device.allocate_descriptor_sets(&info)?;

        // The buffers never change for the lifetime of the sets,
        // so they are written once here and never again.
        for (&set, uniform) in sets.iter().zip(uniform_buffers) {
            let buffer_info = vk::DescriptorBufferInfo::builder()
                .buffer(uniform.buffer)
                .offset(0)
                .range(range);

            let buffer_infos = &[buffer_info];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(buffer_infos);

            device.update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
        }

        info!("Descriptor sets created.");
        Ok(sets)
    }

    pub unsafe fn destroy(&self, device: &Device) {
        // Sets are freed with their pool.
        device.destroy_descriptor_pool(self.pool, None);
        device.destroy_descriptor_set_layout(self.layout, None);

        info!("Descriptor pool and layout destroyed.");
    }
}

pub unsafe fn create_descriptor_set_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
    let ubo_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(UNIFORM_BINDING)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);

    let bindings = &[ubo_binding];
    let info = vk::DescriptorSetLayoutCreateInfo::builder()
        .bindings(bindings);

    let layout = device.create_descriptor_set_layout(&info, None)?;

    info!("Descriptor set layout created.");
    Ok(layout)
}

pub unsafe fn create_descriptor_pool(device: &Device, sets: u32) -> Result<vk::DescriptorPool> {
    let ubo_size = vk::DescriptorPoolSize::builder()
        .type_(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(sets);

    let pool_sizes = &[ubo_size];
    let info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(pool_sizes)
        .max_sets(sets);

    let pool = device.create_descriptor_pool(&info, None)?;

    info!("Descriptor pool created.");
    Ok(pool)
}
