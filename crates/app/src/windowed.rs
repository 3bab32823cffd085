//! Windowed frame loop driven by winit.

use std::sync::Arc;

use anyhow::{Context, Result};
use minirender_core::FrameTimer;
use minirender_platform::{ActiveEventLoop, Window, WindowEvent};
use minirender_renderer::{DrawOutcome, Renderer, RendererConfig};
use minirender_rhi::backend::GpuInstance;
use minirender_rhi::vk;
use minirender_rhi::vulkan::{InstanceConfig, VulkanInstance};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::window::WindowId;

use crate::demo::Demo;
use crate::shaders::ShaderBinaries;

pub struct App {
    extent: vk::Extent2D,
    config: RendererConfig,
    shaders: ShaderBinaries,
    window: Option<Window>,
    renderer: Option<Renderer>,
    demo: Demo,
    timer: FrameTimer,
    /// First fatal error; reported by `main` after the loop exits.
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(extent: vk::Extent2D, config: RendererConfig, shaders: ShaderBinaries) -> Self {
        Self {
            extent,
            config,
            shaders,
            window: None,
            renderer: None,
            demo: Demo::new(),
            timer: FrameTimer::new(),
            error: None,
        }
    }

    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{:#}", e);
        self.error.get_or_insert(e);
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(
            event_loop,
            self.extent.width,
            self.extent.height,
            &self.config.app_name,
        )?;

        let instance = VulkanInstance::new(&InstanceConfig {
            app_name: self.config.app_name.clone(),
            enable_validation: self.config.enable_validation,
            extensions: window.required_surface_extensions()?,
        })?;
        let surface = match window.create_surface(&instance) {
            Ok(surface) => surface,
            Err(e) => {
                instance.destroy();
                return Err(e.into());
            }
        };

        let instance: Arc<dyn GpuInstance> = instance;
        let mut renderer = Renderer::new(
            instance,
            surface,
            window.framebuffer_extent(),
            self.config.clone(),
            &self.shaders.vertex,
            &self.shaders.fragment,
        )
        .context("Failed to create renderer")?;

        if let Err(e) = self.demo.upload(&mut renderer) {
            renderer.destroy();
            return Err(e).context("Failed to upload scene");
        }

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        let dt = self.timer.tick();
        self.demo.update(renderer, dt)?;
        if let DrawOutcome::SwapchainOutOfDate = renderer.draw()? {
            debug!("Frame skipped, swapchain rebuilt");
        }

        if let Some(fps) = self.timer.fps_report() {
            debug!("{:.1} fps", fps);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            renderer.destroy();
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize(vk::Extent2D {
                        width: size.width,
                        height: size.height,
                    });
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
