//! Error types shared by the platform glue and the binary.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the window and file glue.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Surface creation or extension enumeration errors
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// A shader binary could not be read
    #[error("Failed to read shader {path}: {source}")]
    ShaderRead {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_read_message() {
        let err = Error::ShaderRead {
            path: PathBuf::from("shaders/shader.vert.spv"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read shader shaders/shader.vert.spv: not found"
        );
    }
}
