use crate::demo::CubeScene;

use evergreen::{FrameOutcome, Renderer, RendererConfig};

use winit::window::Window;
use anyhow::Result;
use log::*;

/// Window and renderer of the demo. The renderer is declared
/// first so it is dropped before the window it draws into.
pub struct App {
    pub renderer: Option<Renderer>,
    pub window: Option<Window>,
    pub config: RendererConfig,
    pub minimised: bool,
}

impl App {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            renderer: None,
            window: None,
            config,
            minimised: false,
        }
    }

    pub fn init(&mut self, window: Window) -> Result<()> {
        let size = window.inner_size();
        let mut renderer = unsafe {
            Renderer::with_config(&window, size.width, size.height, self.config.clone())?
        };

        let scene = unsafe { CubeScene::create(renderer.context())? };
        unsafe { renderer.set_scene(Box::new(scene))? };

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.minimised = width == 0 || height == 0;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.notify_resize(width, height);
        }
    }

    pub fn render(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        let outcome = unsafe { renderer.render_frame()? };
        if outcome == FrameOutcome::Dropped {
            debug!("{} frame(s) dropped so far.", renderer.stats().dropped);
        }

        Ok(())
    }

    pub fn destroy(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            unsafe { renderer.shutdown() };
        }
        self.window = None;
        info!("Destroyed the app.");
    }
}
