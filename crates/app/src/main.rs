//! minirender: two spinning quads drawn with Vulkan.

mod cli;
mod demo;
mod headless;
mod shaders;
mod windowed;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use minirender_platform::EventLoop;
use tracing::{error, info, warn};
use winit::event_loop::ControlFlow;

use cli::Args;

fn run(args: Args) -> Result<()> {
    let config = args.renderer_config().with_env_overrides();
    info!(
        "Starting minirender: {} upload, depth {}",
        config.upload_strategy.name(),
        if config.depth { "on" } else { "off" }
    );

    if let Some(frames) = args.headless {
        let shaders = match shaders::load_shaders(&args.shader_dir, config.transform_delivery) {
            Ok(shaders) => Some(shaders),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };
        headless::run(frames, args.extent(), config, shaders)?;
        return Ok(());
    }

    let shaders = shaders::load_shaders(&args.shader_dir, config.transform_delivery)?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = windowed::App::new(args.extent(), config, shaders);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    minirender_core::init_logging();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
