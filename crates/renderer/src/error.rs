//! Renderer error types.

use minirender_rhi::RhiError;
use thiserror::Error;

/// Renderer error type.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Failure reported by the device layer
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// The dynamic model buffer has no room for another object
    #[error("Dynamic model buffer holds at most {max} objects")]
    TooManyObjects { max: u32 },

    /// No mesh exists at the given index
    #[error("Mesh index {index} out of range ({count} meshes)")]
    MeshIndexOutOfRange { index: usize, count: usize },
}

impl RendererError {
    /// Returns true when the error means the swapchain must be recreated.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, RendererError::Rhi(e) if e.is_out_of_date())
    }
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;
    use minirender_rhi::{SubmissionOp, vk};

    #[test]
    fn test_rhi_errors_convert() {
        let err: RendererError = RhiError::NoSuitableGpu.into();
        assert!(matches!(err, RendererError::Rhi(RhiError::NoSuitableGpu)));
        assert_eq!(err.to_string(), "No suitable GPU found");
    }

    #[test]
    fn test_out_of_date_passthrough() {
        let err = RendererError::from(RhiError::Submission {
            op: SubmissionOp::Present,
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
        });
        assert!(err.is_out_of_date());
        assert!(!RendererError::TooManyObjects { max: 2 }.is_out_of_date());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            RendererError::MeshIndexOutOfRange { index: 3, count: 2 }.to_string(),
            "Mesh index 3 out of range (2 meshes)"
        );
    }
}
