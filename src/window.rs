use crate::app::App;

use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{Window, WindowId},
};
use log::*;

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attr = Window::default_attributes()
            .with_title("evergreen")
            .with_inner_size(LogicalSize::new(800, 600));

        let result = event_loop
            .create_window(window_attr)
            .map_err(anyhow::Error::from)
            .and_then(|window| self.init(window));

        if let Err(error) = result {
            error!("Failed to start the renderer: {:#}", error);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                // Shutdown waits for the GPU before anything is
                // destroyed.
                self.destroy();
                event_loop.exit();
            },
            WindowEvent::Resized(size) => {
                self.resize(size.width, size.height);
            },
            WindowEvent::RedrawRequested => {
                if let Err(error) = self.render() {
                    error!("Rendering failed: {:#}", error);
                    self.destroy();
                    event_loop.exit();
                }
            },
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _: &ActiveEventLoop) {
        // A minimised window still gets ticks through resize
        // events; polling redraws for it would only spin.
        if let (Some(window), false) = (&self.window, self.minimised) {
            window.request_redraw();
        }
    }
}
