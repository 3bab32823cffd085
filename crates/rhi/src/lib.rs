//! Device and resource layer (Render Hardware Interface).
//!
//! This crate hides the explicit GPU API behind two backend traits and
//! builds the engine's GPU objects on top of them. It handles:
//! - Instance and device bring-up, physical device selection
//! - Memory type selection and buffer/image allocation
//! - Swapchain negotiation and recreation
//! - Render pass, framebuffers, shaders and the graphics pipeline
//! - Command pools, descriptor sets and synchronization primitives
//!
//! Two backends implement the traits in [`backend`]: [`vulkan`] drives a real
//! GPU through `ash`, [`headless`] simulates one in memory for tests and
//! headless runs.

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod image;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;
pub mod vulkan;

pub use error::{ErrorKind, RhiError, RhiResult, SubmissionOp};

// Re-export ash types that users might need
pub use ash::vk;
