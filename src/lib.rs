//! Vulkan renderer core: device setup, swapchain management and
//! the per-frame submission loop.

pub mod config;
pub mod core;
pub mod error;
pub mod frame_loop;
pub mod renderer;
pub mod scene;
pub mod vertex;

pub use config::{RendererConfig, MAX_FRAMES_IN_FLIGHT};
pub use error::RenderError;
pub use frame_loop::{FrameBackend, FrameLoop, FrameOutcome, FrameStats};
pub use renderer::Renderer;
pub use scene::{Drawable, FrameUniforms, Scene};
