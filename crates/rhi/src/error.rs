//! RHI-specific error types.
//!
//! Every failure surfaced by this crate is an [`RhiError`]. Errors are never
//! retried here; [`RhiError::kind`] sorts them into the three classes callers
//! care about so startup glue and the frame loop can report them uniformly.

use ash::vk;
use thiserror::Error;

/// Coarse classification of an [`RhiError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A device, resource or pipeline creation call failed.
    SetupFailure,
    /// No memory type, device, surface format or present mode satisfied a requirement.
    ResourceExhaustion,
    /// Acquire, submit or present failed after initialization.
    RuntimeSubmissionFailure,
}

/// Operation that produced a [`RhiError::Submission`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubmissionOp {
    Acquire,
    Submit,
    Present,
}

impl std::fmt::Display for SubmissionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmissionOp::Acquire => "acquire",
            SubmissionOp::Submit => "queue submit",
            SubmissionOp::Present => "present",
        };
        f.write_str(name)
    }
}

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Frame-time Vulkan error from acquire, submit or present
    #[error("{op} failed: {result}")]
    Submission { op: SubmissionOp, result: vk::Result },

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type satisfies the type mask and property flags
    #[error("No memory type in mask {type_bits:#b} has properties {flags:?}")]
    NoMatchingMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    /// Surface reports no formats
    #[error("Surface reports no supported formats")]
    NoSurfaceFormats,

    /// Surface reports no present modes
    #[error("Surface reports no supported present modes")]
    NoPresentModes,

    /// No candidate depth format supports depth attachments
    #[error("No supported depth format among {0:?}")]
    NoDepthFormat(Vec<vk::Format>),

    /// Validation requested but the layer is not installed
    #[error("Validation layer {0} requested but not available")]
    MissingValidationLayer(String),

    /// Required instance extension is not available
    #[error("Instance extension {0} not available")]
    MissingExtension(String),

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// API misuse detected by a backend
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

impl RhiError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RhiError::NoSuitableGpu
            | RhiError::NoMatchingMemoryType { .. }
            | RhiError::NoSurfaceFormats
            | RhiError::NoPresentModes
            | RhiError::NoDepthFormat(_) => ErrorKind::ResourceExhaustion,
            RhiError::VulkanError(result) => match *result {
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
                | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                | vk::Result::ERROR_TOO_MANY_OBJECTS
                | vk::Result::ERROR_OUT_OF_POOL_MEMORY => ErrorKind::ResourceExhaustion,
                vk::Result::ERROR_DEVICE_LOST => ErrorKind::RuntimeSubmissionFailure,
                _ => ErrorKind::SetupFailure,
            },
            RhiError::Submission { .. } => ErrorKind::RuntimeSubmissionFailure,
            _ => ErrorKind::SetupFailure,
        }
    }

    /// Returns true when the error means the swapchain no longer matches the surface.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            RhiError::Submission {
                result: vk::Result::ERROR_OUT_OF_DATE_KHR,
                ..
            } | RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(RhiError::NoSuitableGpu.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(
            RhiError::NoMatchingMemoryType {
                type_bits: 0,
                flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            }
            .kind(),
            ErrorKind::ResourceExhaustion
        );
        assert_eq!(
            RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED).kind(),
            ErrorKind::SetupFailure
        );
        assert_eq!(
            RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).kind(),
            ErrorKind::ResourceExhaustion
        );
        assert_eq!(
            RhiError::Submission {
                op: SubmissionOp::Present,
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
            }
            .kind(),
            ErrorKind::RuntimeSubmissionFailure
        );
    }

    #[test]
    fn test_out_of_date_detection() {
        let err = RhiError::Submission {
            op: SubmissionOp::Acquire,
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
        };
        assert!(err.is_out_of_date());
        assert!(!RhiError::NoSuitableGpu.is_out_of_date());
    }
}
