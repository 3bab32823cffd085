//! Frame rendering on top of the device layer.
//!
//! This crate orchestrates the rendering process:
//! - Configuration ([`RendererConfig`])
//! - Mesh upload (staged or host-visible)
//! - View-projection uniforms and per-object transforms
//! - Depth resource
//! - Frame slots and synchronization
//! - [`Renderer`] bring-up, draw, swapchain recreation and teardown

pub mod config;
pub mod depth_buffer;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod renderer;
pub mod ubo;

pub use config::{RendererConfig, UploadStrategy};
pub use error::{RendererError, RendererResult};
pub use frame::FrameManager;
pub use mesh::Mesh;
pub use renderer::{DrawOutcome, Renderer};
pub use ubo::UboViewProjection;

/// Number of frames that can be in flight simultaneously.
pub const MAX_FRAME_DRAWS: usize = 2;
