use crate::error::RenderError;

use std::ffi::c_void;

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};

/// Index of the first memory type allowed by `type_bits` that
/// has at least the `required` properties.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && memory.memory_types[i as usize].property_flags.contains(required)
        })
        .ok_or(anyhow!(RenderError::NoMemoryType {
            type_bits,
            properties: required,
        }))
}

/// A buffer and the memory bound to it.
#[derive(Copy, Clone, Debug, Default)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Maps the whole buffer. Only valid for host-visible memory.
    pub unsafe fn map(&self, device: &Device) -> Result<*mut c_void> {
        Ok(device.map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?)
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

/// An image, the memory bound to it and the view used to
/// attach it.
#[derive(Copy, Clone, Debug, Default)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl GpuImage {
    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

pub unsafe fn create_buffer(
    device: &Device,
    memory: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = device.create_buffer(&buffer_info, None)?;

    // The driver may need more than `size` bytes, with its own
    // alignment; the allocation follows its requirements.
    let requirements = device.get_buffer_memory_requirements(buffer);
    let memory_type = match find_memory_type(memory, requirements.memory_type_bits, properties) {
        Ok(index) => index,
        Err(error) => {
            device.destroy_buffer(buffer, None);
            return Err(error);
        }
    };

    let memory_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);

    let buffer_memory = match device.allocate_memory(&memory_info, None) {
        Ok(buffer_memory) => buffer_memory,
        Err(error) => {
            device.destroy_buffer(buffer, None);
            return Err(error.into());
        }
    };

    if let Err(error) = device.bind_buffer_memory(buffer, buffer_memory, 0) {
        device.destroy_buffer(buffer, None);
        device.free_memory(buffer_memory, None);
        return Err(error.into());
    }

    Ok(GpuBuffer { buffer, memory: buffer_memory, size })
}

/// Creates a single-level, device-local 2D image.
pub unsafe fn create_image_2d(
    device: &Device,
    memory: &vk::PhysicalDeviceMemoryProperties,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .format(format)
        .mip_levels(1)
        .array_layers(1)
        .samples(samples)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = device.create_image(&info, None)?;
    let requirements = device.get_image_memory_requirements(image);
    let memory_type = match find_memory_type(
        memory,
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(index) => index,
        Err(error) => {
            device.destroy_image(image, None);
            return Err(error);
        }
    };

    let info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);

    let image_memory = match device.allocate_memory(&info, None) {
        Ok(image_memory) => image_memory,
        Err(error) => {
            device.destroy_image(image, None);
            return Err(error.into());
        }
    };

    if let Err(error) = device.bind_image_memory(image, image_memory, 0) {
        device.destroy_image(image, None);
        device.free_memory(image_memory, None);
        return Err(error.into());
    }

    Ok((image, image_memory))
}

pub unsafe fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspects: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let components = vk::ComponentMapping::builder()
        .r(vk::ComponentSwizzle::IDENTITY)
        .g(vk::ComponentSwizzle::IDENTITY)
        .b(vk::ComponentSwizzle::IDENTITY)
        .a(vk::ComponentSwizzle::IDENTITY)
        .build();

    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspects)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build();

    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::_2D)
        .format(format)
        .components(components)
        .subresource_range(subresource_range);

    Ok(device.create_image_view(&info, None)?)
}

/// Creates an image with its view in one go.
pub unsafe fn create_attachment(
    device: &Device,
    memory: &vk::PhysicalDeviceMemoryProperties,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    aspects: vk::ImageAspectFlags,
) -> Result<GpuImage> {
    let (image, image_memory) = create_image_2d(device, memory, extent, samples, format, usage)?;
    let view = match create_image_view(device, image, format, aspects) {
        Ok(view) => view,
        Err(error) => {
            device.destroy_image(image, None);
            device.free_memory(image_memory, None);
            return Err(error);
        }
    };

    Ok(GpuImage { image, memory: image_memory, view })
}
