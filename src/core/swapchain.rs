use crate::core::{
    devices::DeviceContext,
    memory::create_image_view,
};

use vulkanalia::{
    prelude::v1_0::*,
    vk::KhrSurfaceExtension,
    vk::KhrSwapchainExtension,
};
use anyhow::Result;
use log::*;

/// What a surface offers on a given physical device.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
            formats: instance
                .get_physical_device_surface_formats_khr(physical_device, surface)?,
            present_modes: instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
        })
    }
}

/// Prefers 8-bit BGRA in sRGB, otherwise takes whatever the
/// surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .cloned()
        .unwrap_or_default()
}

/// MAILBOX when available, otherwise FIFO, which every
/// implementation must support.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .cloned()
        .find(|&m| m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface dictates the extent unless it reports the
/// `u32::MAX` sentinel, in which case the requested size is
/// clamped to what the surface accepts.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One image more than the minimum, so the driver never blocks
/// us on its own bookkeeping. A maximum of 0 means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// Presentable images and the parameters they were created with.
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    /// One view per image, in the same order.
    pub image_views: Vec<vk::ImageView>,
}

impl SwapchainState {
    pub unsafe fn create(ctx: &DeviceContext, requested: vk::Extent2D) -> Result<Self> {
        // Surface properties change with the window, so they are
        // queried again on every build.
        let support = SwapchainSupport::get(&ctx.instance, ctx.surface, ctx.physical_device)?;

        let format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, requested);
        let image_count = choose_image_count(&support.capabilities);

        // Images used by two different families are shared
        // concurrently rather than transferred explicitly.
        let families = ctx.queue_families.unique();
        let (sharing_mode, family_indices) = if ctx.queue_families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        } else {
            (vk::SharingMode::CONCURRENT, &families[..])
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let device = &ctx.device;
        let swapchain = device.create_swapchain_khr(&info, None)?;
        let images = device.get_swapchain_images_khr(swapchain)?;

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_image_view(device, image, format.format, vk::ImageAspectFlags::COLOR) {
                Ok(view) => image_views.push(view),
                Err(error) => {
                    image_views.iter().for_each(|&v| device.destroy_image_view(v, None));
                    device.destroy_swapchain_khr(swapchain, None);
                    return Err(error);
                }
            }
        }

        info!(
            "Swapchain created ({}x{}, {} images, {:?}, {:?}).",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode,
        );

        Ok(Self {
            swapchain,
            format,
            present_mode,
            extent,
            images,
            image_views,
        })
    }

    pub unsafe fn destroy(&self, device: &Device) {
        self.image_views
            .iter()
            .for_each(|&v| device.destroy_image_view(v, None));
        device.destroy_swapchain_khr(self.swapchain, None);

        info!("Destroyed the swapchain and related objects.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn capabilities(current: vk::Extent2D, min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 2160),
            min_image_count: min_count,
            max_image_count: max_count,
            ..Default::default()
        }
    }

    #[test]
    fn srgb_bgra_is_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), formats[1]);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), formats[0]);
    }

    #[test]
    fn mailbox_then_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn current_extent_wins_when_defined() {
        let caps = capabilities(extent(800, 600), 2, 3);
        assert_eq!(choose_extent(&caps, extent(1920, 1080)), extent(800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_request() {
        let caps = capabilities(extent(u32::MAX, u32::MAX), 2, 3);
        assert_eq!(choose_extent(&caps, extent(1920, 1080)), extent(1920, 1080));
        assert_eq!(choose_extent(&caps, extent(10_000, 0)), extent(4096, 1));
    }

    #[test]
    fn image_count_is_min_plus_one() {
        assert_eq!(choose_image_count(&capabilities(extent(1, 1), 2, 8)), 3);
    }

    #[test]
    fn image_count_respects_max() {
        assert_eq!(choose_image_count(&capabilities(extent(1, 1), 3, 3)), 3);
    }

    #[test]
    fn zero_max_means_unbounded() {
        assert_eq!(choose_image_count(&capabilities(extent(1, 1), 4, 0)), 5);
    }
}
