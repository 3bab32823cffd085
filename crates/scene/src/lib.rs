//! The fixed demo scene.
//!
//! This crate provides what the demo draws:
//! - Two indexed quads and their animation
//! - The camera producing the view and projection matrices

pub mod camera;
pub mod quad;

pub use camera::{Camera, CameraMatrices};
pub use quad::{MeshData, QuadScene};
