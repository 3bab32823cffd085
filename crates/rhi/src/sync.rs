//! Synchronization primitives.
//!
//! This module provides wrappers for Vulkan synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU synchronization (between queue operations)
//! - [`Fence`] - GPU-to-CPU synchronization (for host waiting)
//! - [`FrameSync`] - Per-frame synchronization primitives for rendering
//!
//! # Overview
//!
//! Vulkan requires explicit synchronization between operations:
//!
//! - **Semaphores** are used to synchronize operations within or across queues.
//!   For example, waiting for image acquisition before rendering, or waiting for
//!   rendering to complete before presentation.
//!
//! - **Fences** are used to synchronize the CPU with GPU operations. The CPU can
//!   wait for a fence to be signaled, allowing it to know when GPU work is complete.
//!
//! All three are destroyed explicitly; dropping one without `destroy` logs a leak.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use minirender_rhi::backend::GpuDevice;
//! use minirender_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> Result<(), minirender_rhi::RhiError> {
//! // Create a semaphore for GPU-to-GPU synchronization
//! let image_available = Semaphore::new(device.clone())?;
//!
//! // Create a fence for GPU-to-CPU synchronization (signaled initially)
//! let in_flight_fence = Fence::new(device.clone(), true)?;
//!
//! // Wait for the fence before starting a new frame
//! in_flight_fence.wait(u64::MAX)?;
//! in_flight_fence.reset()?;
//!
//! in_flight_fence.destroy();
//! image_available.destroy();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::backend::GpuDevice;
use crate::error::RhiResult;

/// Semaphore wrapper.
///
/// Semaphores are used for GPU-to-GPU synchronization between queue operations.
/// Common use cases include:
/// - Image available semaphore: signaled when a swapchain image is ready
/// - Render finished semaphore: signaled when rendering is complete
pub struct Semaphore {
    device: Arc<dyn GpuDevice>,
    semaphore: vk::Semaphore,
    destroyed: bool,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<dyn GpuDevice>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        debug!("Created semaphore");
        Ok(Self {
            device,
            semaphore,
            destroyed: false,
        })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Destroys the semaphore. No pending queue operation may use it.
    pub fn destroy(mut self) {
        self.device.destroy_semaphore(self.semaphore);
        self.destroyed = true;
        debug!("Destroyed semaphore");
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("Semaphore dropped without destroy");
        }
    }
}

/// Fence wrapper.
///
/// Fences are used for GPU-to-CPU synchronization, allowing the host to wait
/// for GPU operations to complete. Common use cases include:
/// - Frame-in-flight fence: wait before reusing command buffers
/// - Transfer completion fence: wait for data upload to complete
pub struct Fence {
    device: Arc<dyn GpuDevice>,
    fence: vk::Fence,
    destroyed: bool,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - If true, creates the fence in the signaled state.
    ///   This is useful for fences that are waited on before the first
    ///   GPU operation that would signal them.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<dyn GpuDevice>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self {
            device,
            fence,
            destroyed: false,
        })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence to become signaled.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Timeout in nanoseconds. Use `u64::MAX` for infinite wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait times out (`vk::Result::TIMEOUT`) or fails.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fence(self.fence, timeout)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be in use by any queue operation when this is called.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Checks without blocking whether the fence is signaled.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        self.device.fence_status(self.fence)
    }

    /// Destroys the fence. No pending submission may signal it.
    pub fn destroy(mut self) {
        self.device.destroy_fence(self.fence);
        self.destroyed = true;
        debug!("Destroyed fence");
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("Fence dropped without destroy");
        }
    }
}

/// Per-frame synchronization primitives.
///
/// This struct groups all synchronization objects needed for frame rendering:
/// - Image available semaphore: signaled when swapchain image is acquired
/// - Render finished semaphore: signaled when rendering is complete
/// - Draw fence: used to wait before reusing frame resources
///
/// # Usage Pattern
///
/// ```text
/// 1. Acquire swapchain image (signals image_available)
/// 2. Wait for draw_fence, then reset it
/// 3. Submit command buffer:
///    - Wait on image_available
///    - Signal render_finished
///    - Signal draw_fence on completion
/// 4. Present (waits on render_finished)
/// ```
pub struct FrameSync {
    /// Semaphore signaled when a swapchain image is available.
    image_available: Semaphore,
    /// Semaphore signaled when rendering is complete.
    render_finished: Semaphore,
    /// Fence used to wait for frame completion before reusing resources.
    draw_fence: Fence,
}

impl FrameSync {
    /// Creates a new set of frame synchronization primitives.
    ///
    /// The draw fence is created in the signaled state so the first
    /// frame can proceed without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if any synchronization object creation fails. Objects
    /// created before the failure are destroyed.
    pub fn new(device: Arc<dyn GpuDevice>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = match Semaphore::new(device.clone()) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                image_available.destroy();
                return Err(e);
            }
        };
        // Start signaled so the first wait doesn't block forever
        let draw_fence = match Fence::new(device, true) {
            Ok(fence) => fence,
            Err(e) => {
                render_finished.destroy();
                image_available.destroy();
                return Err(e);
            }
        };

        debug!("Created frame synchronization primitives");

        Ok(Self {
            image_available,
            render_finished,
            draw_fence,
        })
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    /// Returns a reference to the draw fence.
    #[inline]
    pub fn draw_fence(&self) -> &Fence {
        &self.draw_fence
    }

    /// Destroys render-finished, image-available, then the fence.
    pub fn destroy(self) {
        self.render_finished.destroy();
        self.image_available.destroy();
        self.draw_fence.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceEvent, HeadlessDevice, ObjectKind};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_sync_types_are_send_sync() {
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }

    #[test]
    fn test_frame_sync_fence_starts_signaled() {
        let device = HeadlessDevice::new_default();
        let sync = FrameSync::new(device.clone()).unwrap();
        assert!(sync.draw_fence().is_signaled().unwrap());

        sync.draw_fence().wait(u64::MAX).unwrap();
        sync.draw_fence().reset().unwrap();
        assert!(!sync.draw_fence().is_signaled().unwrap());

        sync.destroy();
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_frame_sync_destroy_order() {
        let device = HeadlessDevice::new_default();
        let sync = FrameSync::new(device.clone()).unwrap();
        device.clear_events();

        sync.destroy();

        let kinds: Vec<ObjectKind> = device
            .events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Destroyed { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![ObjectKind::Semaphore, ObjectKind::Semaphore, ObjectKind::Fence]
        );
    }
}
