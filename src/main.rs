mod app;
mod demo;
mod window;

use evergreen::RendererConfig;

use winit::event_loop::{ControlFlow, EventLoop};
use anyhow::Result;

use app::App;

fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(RendererConfig::from_env());
    event_loop.run_app(&mut app)?;

    Ok(())
}
