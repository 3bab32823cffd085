//! Platform glue for the minirender engine.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - Instance extensions required for presentation
//! - Vulkan surface creation through `ash-window`

mod window;

pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
