use crate::{
    config::{RendererConfig, PORTABILITY_MACOS_VERSION, VALIDATION_LAYER},
    core::{
        debug::DebugSink,
        instance::create_instance,
        queues::QueueFamilyIndices,
        swapchain::SwapchainSupport,
    },
    error::RenderError,
};

use std::collections::HashSet;

use thiserror::Error;
use vulkanalia::{
    prelude::v1_0::*,
    loader::{LibloadingLoader, LIBRARY},
    window as vk_window,
    vk::ExtDebugUtilsExtension,
    vk::KhrSurfaceExtension,
};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use anyhow::{anyhow, Result};
use log::*;

/// Device extensions every candidate must expose.
pub const REQUIRED_EXTENSIONS: &[vk::ExtensionName] = &[
    vk::KHR_SWAPCHAIN_EXTENSION.name,
];

/// Reason a physical device was rejected.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SuitabilityError(pub &'static str);

/// The properties of a qualified physical device that decide
/// which one is picked.
#[derive(Copy, Clone, Debug)]
pub struct DeviceRating {
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
}

impl DeviceRating {
    pub fn from_properties(properties: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            device_type: properties.device_type,
            max_image_dimension_2d: properties.limits.max_image_dimension_2d,
        }
    }

    /// Discrete GPUs always win over integrated ones; within a
    /// type, the largest supported texture size wins.
    pub fn score(&self) -> u64 {
        let discrete = if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            1000
        } else {
            0
        };

        discrete + self.max_image_dimension_2d as u64
    }
}

/// Returns the highest scored candidate. On a tie the one
/// enumerated first is kept.
pub fn select_best<T>(candidates: impl IntoIterator<Item = (T, u64)>) -> Option<T> {
    let mut best: Option<(T, u64)> = None;
    for (candidate, score) in candidates {
        let better = match &best {
            Some((_, current)) => score > *current,
            None => true,
        };

        if better {
            best = Some((candidate, score));
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// Highest sample count supported by both color and depth
/// framebuffer attachments, capped at 8.
pub fn max_usable_sample_count(
    color: vk::SampleCountFlags,
    depth: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let counts = color & depth;
    [
        vk::SampleCountFlags::_8,
        vk::SampleCountFlags::_4,
        vk::SampleCountFlags::_2,
    ]
    .iter()
    .cloned()
    .find(|c| counts.contains(*c))
    .unwrap_or(vk::SampleCountFlags::_1)
}

unsafe fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = instance
        .enumerate_device_extension_properties(physical_device, None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();

    if REQUIRED_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        Ok(())
    } else {
        Err(anyhow!(SuitabilityError("Missing required device extensions.")))
    }
}

unsafe fn check_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let indices = QueueFamilyIndices::get(instance, surface, physical_device)?;
    check_physical_device_extensions(instance, physical_device)?;

    // A device that can present but offers no format or mode
    // for this surface cannot build a swapchain.
    let support = SwapchainSupport::get(instance, surface, physical_device)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(anyhow!(SuitabilityError("Insufficient swapchain support.")));
    }

    Ok(indices)
}

pub unsafe fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let mut candidates = Vec::new();
    for device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(device);

        match check_physical_device(instance, surface, device) {
            Ok(indices) => {
                let score = DeviceRating::from_properties(&properties).score();
                debug!("Candidate physical device ({}) scored {}.", properties.device_name, score);
                candidates.push(((device, indices), score));
            },
            Err(error) => {
                warn!("Skipping physical device ({}): {}", properties.device_name, error);
            },
        }
    }

    let (device, indices) = select_best(candidates)
        .ok_or(anyhow!(RenderError::NoSuitableDevice))?;

    let properties = instance.get_physical_device_properties(device);
    info!("Selected physical device: {}", properties.device_name);
    Ok((device, indices))
}

pub unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    indices: &QueueFamilyIndices,
    validation: bool,
) -> Result<Device> {
    // One queue per distinct family; asking twice for the same
    // family is invalid.
    let priorities = &[1.0];
    let queue_infos = indices
        .unique()
        .iter()
        .map(|&i| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(i)
                .queue_priorities(priorities)
                .build()
        })
        .collect::<Vec<_>>();

    // Device layers are deprecated but still honoured by older
    // loaders.
    let layers = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let mut extensions = REQUIRED_EXTENSIONS
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::builder();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = instance.create_device(physical_device, &info, None)?;

    info!("Logical device created.");
    Ok(device)
}

/// Everything tied to the lifetime of the GPU connection. Built
/// once, destroyed last.
pub struct DeviceContext {
    pub entry: Entry,
    pub instance: Instance,
    /// Owned receiver for validation messages. Boxed so that the
    /// pointer registered with the messenger stays valid.
    pub debug_sink: Box<DebugSink>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    /// Rasterization samples used by every render target and
    /// pipeline.
    pub msaa_samples: vk::SampleCountFlags,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    pub unsafe fn create<W>(window: &W, config: &RendererConfig) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let debug_sink = Box::new(DebugSink::new());
        let (instance, debug_messenger) = create_instance(window, &entry, config, &debug_sink)?;

        let surface = match vk_window::create_surface(&instance, window, window) {
            Ok(surface) => surface,
            Err(error) => {
                destroy_surface_and_instance(&instance, debug_messenger, vk::SurfaceKHR::null());
                return Err(error.into());
            }
        };
        info!("Surface created.");

        let selected = pick_physical_device(&instance, surface).and_then(|picked| {
            let (physical_device, queue_families) = picked;
            let device = create_logical_device(
                &entry,
                &instance,
                physical_device,
                &queue_families,
                config.enable_validation,
            )?;
            Ok((physical_device, queue_families, device))
        });

        let (physical_device, queue_families, device) = match selected {
            Ok(selected) => selected,
            Err(error) => {
                destroy_surface_and_instance(&instance, debug_messenger, surface);
                return Err(error);
            }
        };

        let graphics_queue = device.get_device_queue(queue_families.graphics, 0);
        let present_queue = device.get_device_queue(queue_families.present, 0);

        let properties = instance.get_physical_device_properties(physical_device);
        let msaa_samples = if config.multisampling {
            max_usable_sample_count(
                properties.limits.framebuffer_color_sample_counts,
                properties.limits.framebuffer_depth_sample_counts,
            )
        } else {
            vk::SampleCountFlags::_1
        };
        info!("Using {:?} sample(s) per pixel.", msaa_samples);

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        Ok(Self {
            entry,
            instance,
            debug_sink,
            debug_messenger,
            surface,
            physical_device,
            device,
            queue_families,
            graphics_queue,
            present_queue,
            msaa_samples,
            memory_properties,
        })
    }

    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        destroy_surface_and_instance(&self.instance, self.debug_messenger.take(), self.surface);
        info!(
            "Destroyed the Vulkan instance ({} validation warning(s), {} error(s)).",
            self.debug_sink.warnings(),
            self.debug_sink.errors(),
        );
    }
}

/// Destroys the surface, the messenger and the instance, in
/// that order. A null surface is skipped by the driver.
unsafe fn destroy_surface_and_instance(
    instance: &Instance,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface: vk::SurfaceKHR,
) {
    instance.destroy_surface_khr(surface, None);

    if let Some(messenger) = debug_messenger {
        instance.destroy_debug_utils_messenger_ext(messenger, None);
    }

    instance.destroy_instance(None);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(device_type: vk::PhysicalDeviceType, max: u32) -> DeviceRating {
        DeviceRating { device_type, max_image_dimension_2d: max }
    }

    #[test]
    fn discrete_gpu_outscores_larger_integrated() {
        let discrete = rating(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let integrated = rating(vk::PhysicalDeviceType::INTEGRATED_GPU, 9000);
        assert_eq!(discrete.score(), 9192);
        assert_eq!(integrated.score(), 9000);
        assert!(discrete.score() > integrated.score());
    }

    #[test]
    fn highest_score_is_selected() {
        let picked = select_best(vec![("a", 10), ("b", 2000), ("c", 500)]);
        assert_eq!(picked, Some("b"));
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let picked = select_best(vec![("first", 4096), ("second", 4096)]);
        assert_eq!(picked, Some("first"));
    }

    #[test]
    fn no_candidates_selects_nothing() {
        assert_eq!(select_best(Vec::<(u8, u64)>::new()), None);
    }

    #[test]
    fn sample_count_respects_both_attachments() {
        let color = vk::SampleCountFlags::_1
            | vk::SampleCountFlags::_2
            | vk::SampleCountFlags::_4
            | vk::SampleCountFlags::_8;
        let depth = vk::SampleCountFlags::_1 | vk::SampleCountFlags::_2 | vk::SampleCountFlags::_4;
        assert_eq!(max_usable_sample_count(color, depth), vk::SampleCountFlags::_4);
    }

    #[test]
    fn sample_count_is_capped_at_eight() {
        let all = vk::SampleCountFlags::all();
        assert_eq!(max_usable_sample_count(all, all), vk::SampleCountFlags::_8);
    }

    #[test]
    fn sample_count_falls_back_to_one() {
        let one = vk::SampleCountFlags::_1;
        assert_eq!(max_usable_sample_count(one, one), vk::SampleCountFlags::_1);
        assert_eq!(
            max_usable_sample_count(vk::SampleCountFlags::_2, vk::SampleCountFlags::_4),
            vk::SampleCountFlags::_1,
        );
    }
}
