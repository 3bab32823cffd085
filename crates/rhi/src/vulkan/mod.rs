//! Vulkan backend over `ash`.
//!
//! [`VulkanInstance`] loads the Vulkan library, creates the instance with the
//! surface extensions the window needs and, when validation is requested,
//! installs a debug messenger that forwards layer messages to `tracing`.
//! [`VulkanDevice`] maps every [`GpuDevice`](crate::backend::GpuDevice) call
//! one-to-one onto the logical device.
//!
//! Acquire, submit and present failures are reported as
//! [`RhiError::Submission`](crate::RhiError::Submission) so the frame loop can
//! tell them apart from setup failures.

mod device;
mod instance;

pub use device::VulkanDevice;
pub use instance::{InstanceConfig, VALIDATION_LAYER_NAME, VulkanInstance};
