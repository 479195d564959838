use crate::{
    config::{RendererConfig, PORTABILITY_MACOS_VERSION, VALIDATION_LAYER},
    core::debug::{debug_callback, DebugSink},
    error::RenderError,
};

use std::{collections::HashSet, ffi::CString};

use vulkanalia::{
    prelude::v1_0::*,
    window as vk_window,
    vk::ExtDebugUtilsExtension,
};
use winit::raw_window_handle::HasWindowHandle;
use anyhow::{anyhow, Result};
use log::*;

const DEBUG_UTILS_EXTENSION: vk::ExtensionName = vk::EXT_DEBUG_UTILS_EXTENSION.name;

/// Creates the Vulkan instance and, when validation is enabled,
/// a debug messenger forwarding to `sink`.
///
/// The sink is registered by address: it must outlive the
/// returned messenger.
pub unsafe fn create_instance<W: HasWindowHandle>(
    window: &W,
    entry: &Entry,
    config: &RendererConfig,
    sink: &DebugSink,
) -> Result<(Instance, Option<vk::DebugUtilsMessengerEXT>)> {
    let validation = config.enable_validation;

    // Asking for validation on a system without the layer is a
    // configuration error; it is not silently dropped.
    let available_layers = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    if validation && !available_layers.contains(&VALIDATION_LAYER) {
        return Err(anyhow!(RenderError::MissingLayer(VALIDATION_LAYER.to_string())));
    }

    let layers = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let available_extensions = entry
        .enumerate_instance_extension_properties(None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();

    let mut required = vk_window::get_required_instance_extensions(window).to_vec();
    if validation {
        required.push(&DEBUG_UTILS_EXTENSION);
    }

    if let Some(missing) = required.iter().find(|e| !available_extensions.contains(**e)) {
        return Err(anyhow!(RenderError::MissingInstanceExtension(missing.to_string())));
    }

    let mut extensions = required
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    // macOS only exposes Vulkan through a non-conformant
    // implementation, which has to be opted into since 1.3.216.
    let flags = if
        cfg!(target_os = "macos") &&
        entry.version()? >= PORTABILITY_MACOS_VERSION
    {
        info!("Enabling extensions for macOS portability.");
        extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
        extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());

        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    let application_name = CString::new(config.application_name.as_str())?;
    let application_info = vk::ApplicationInfo::builder()
        .application_name(application_name.as_bytes_with_nul())
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"evergreen\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 0, 0));

    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);

    // Every severity is requested from the layer; filtering
    // happens in the sink.
    let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(vk::DebugUtilsMessageTypeFlagsEXT::all())
        .user_callback(Some(debug_callback))
        .build();
    debug_info.user_data = sink.as_user_data();

    // Chaining the messenger info into the instance info also
    // captures messages emitted by instance creation itself.
    if validation {
        info = info.push_next(&mut debug_info);
    }

    let instance = entry.create_instance(&info, None)?;
    info!("Vulkan instance created.");

    let messenger = if validation {
        let messenger = instance.create_debug_utils_messenger_ext(&debug_info, None)?;
        info!("Debug messenger created.");
        Some(messenger)
    } else {
        None
    };

    Ok((instance, messenger))
}
