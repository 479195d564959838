use vulkanalia::{prelude::v1_0::*, Version};

pub const VALIDATION_LAYER: vk::ExtensionName = vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");
pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

const VALIDATION_VAR: &str = "EVERGREEN_VALIDATION";
const MSAA_VAR: &str = "EVERGREEN_MSAA";

/// Options fixed for the lifetime of a renderer.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Name reported to the driver in the application info.
    pub application_name: String,
    /// Enable the Khronos validation layer and route its
    /// messages to the log.
    pub enable_validation: bool,
    /// Render to a multisampled color target and resolve into
    /// the swapchain image.
    pub multisampling: bool,
    /// Color the swapchain image is cleared to every frame.
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: String::from("evergreen"),
            enable_validation: cfg!(debug_assertions),
            multisampling: true,
            clear_color: [0.0, 0.0, 1.0, 1.0],
        }
    }
}

impl RendererConfig {
    /// Default configuration with the toggles overridden by
    /// `EVERGREEN_VALIDATION` and `EVERGREEN_MSAA` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = std::env::var(VALIDATION_VAR).ok().and_then(|v| parse_toggle(&v)) {
            config.enable_validation = value;
        }
        if let Some(value) = std::env::var(MSAA_VAR).ok().and_then(|v| parse_toggle(&v)) {
            config.multisampling = value;
        }

        config
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }
}

/// Accepts the usual spellings of a boolean environment flag.
pub fn parse_toggle(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
