use std::path::PathBuf;

use thiserror::Error;
use vulkanalia::vk;

/// Failures the renderer cannot recover from by recreating the
/// swapchain.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Validation layer requested but {0} is not available.")]
    MissingLayer(String),
    #[error("Required instance extension {0} is not available.")]
    MissingInstanceExtension(String),
    #[error("Failed to find suitable physical device.")]
    NoSuitableDevice,
    #[error("No memory type matches filter {type_bits:#b} with properties {properties:?}.")]
    NoMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("Shader binary {0} is missing.")]
    ShaderMissing(PathBuf),
    #[error("Shader binary {path} is not valid SPIR-V: {reason}.")]
    InvalidShader { path: PathBuf, reason: &'static str },
    #[error("Device lost during {0}.")]
    DeviceLost(&'static str),
}
