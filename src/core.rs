pub mod debug;
pub mod descriptors;
pub mod devices;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod queues;
pub mod render_targets;
pub mod shaders;
pub mod swapchain;
