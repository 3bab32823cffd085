//! Device context: the selected GPU, its logical device and queues.
//!
//! # Overview
//!
//! [`DeviceContext::new`] performs the whole bring-up after instance and
//! surface creation:
//! - Physical device selection ([`select_physical_device`])
//! - Logical device creation with one queue per unique family
//! - Queue retrieval for graphics and presentation
//!
//! The context owns the instance and the surface as well, so that
//! [`DeviceContext::destroy`] can tear down surface, device and instance in
//! that order once every other object is gone.
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::device::{DeviceConfig, DeviceContext};
//! use minirender_rhi::headless::HeadlessInstance;
//! use minirender_rhi::vk;
//!
//! let instance = HeadlessInstance::new_default();
//! let surface = instance.create_surface(vk::Extent2D { width: 800, height: 600 });
//!
//! let ctx = DeviceContext::new(instance, surface, &DeviceConfig::default())
//!     .expect("Failed to create device");
//!
//! // Access queues
//! let graphics_queue = ctx.graphics_queue();
//! let present_queue = ctx.present_queue();
//!
//! ctx.destroy();
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::{DeviceCreateDesc, GpuDevice, GpuInstance};
use crate::error::RhiResult;
use crate::physical_device::{
    DEVICE_EXTENSIONS, PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device,
};

/// Logical device creation options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Enable the Khronos validation layer on the device.
    pub enable_validation: bool,
}

/// The selected GPU with its logical device and queues.
pub struct DeviceContext {
    instance: Arc<dyn GpuInstance>,
    surface: vk::SurfaceKHR,
    physical_device: PhysicalDeviceInfo,
    device: Arc<dyn GpuDevice>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    destroyed: bool,
}

impl DeviceContext {
    /// Selects a GPU able to present to `surface` and creates a logical device on it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`](crate::RhiError::NoSuitableGpu)
    /// when no GPU qualifies, or the backend error if device creation fails.
    /// On error the surface and instance are left alive for the caller.
    pub fn new(
        instance: Arc<dyn GpuInstance>,
        surface: vk::SurfaceKHR,
        config: &DeviceConfig,
    ) -> RhiResult<Self> {
        let physical_device = select_physical_device(instance.as_ref(), surface)?;
        let queue_families = physical_device.queue_families;

        // Create one queue for each unique queue family
        let unique_families = queue_families.unique_families();
        debug!(
            "Creating {} queue(s) for families: {:?}",
            unique_families.len(),
            unique_families
        );

        let device = instance.create_device(&DeviceCreateDesc {
            physical_device: physical_device.device,
            queue_families: &unique_families,
            extensions: DEVICE_EXTENSIONS,
            enable_validation: config.enable_validation,
        })?;

        info!(
            "Logical device created with {} extension(s) on {} backend",
            DEVICE_EXTENSIONS.len(),
            instance.backend_name()
        );

        let graphics_queue = device.get_queue(queue_families.graphics, 0);
        debug!(
            "Graphics queue retrieved from family {}",
            queue_families.graphics
        );

        let present_queue = device.get_queue(queue_families.present, 0);
        debug!(
            "Present queue retrieved from family {}",
            queue_families.present
        );

        Ok(Self {
            instance,
            surface,
            physical_device,
            device,
            graphics_queue,
            present_queue,
            destroyed: false,
        })
    }

    /// Returns the instance backend.
    #[inline]
    pub fn instance(&self) -> &Arc<dyn GpuInstance> {
        &self.instance
    }

    /// Returns the logical device backend.
    #[inline]
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Returns information about the selected GPU.
    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.physical_device.queue_families
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Waits for the device to become idle.
    ///
    /// This function blocks until all outstanding operations on all queues
    /// have completed. Useful before destroying resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    /// Destroys the surface, the logical device and the instance, in that order.
    ///
    /// Every object created from the device must already be destroyed.
    pub fn destroy(mut self) {
        self.instance.destroy_surface(self.surface);
        self.device.destroy();
        self.instance.destroy();
        self.destroyed = true;
        info!("Device context destroyed");
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("DeviceContext dropped without destroy; the device and instance are leaked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceEvent, HeadlessAdapter, HeadlessInstance, ObjectKind};

    fn surface_extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 800,
            height: 600,
        }
    }

    #[test]
    fn test_device_context_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeviceContext>();
    }

    #[test]
    fn test_validation_flag_reaches_device() {
        let instance = HeadlessInstance::new_default();
        let surface = instance.create_surface(surface_extent());
        let ctx = DeviceContext::new(
            instance.clone(),
            surface,
            &DeviceConfig {
                enable_validation: true,
            },
        )
        .unwrap();

        assert!(instance.last_device().unwrap().validation_enabled());
        assert_eq!(ctx.graphics_queue(), ctx.present_queue());
        ctx.destroy();
    }

    #[test]
    fn test_split_families_get_separate_queues() {
        let instance = HeadlessInstance::new(vec![HeadlessAdapter::split_queues()]);
        let surface = instance.create_surface(surface_extent());
        let ctx = DeviceContext::new(instance, surface, &DeviceConfig::default()).unwrap();

        assert_ne!(ctx.graphics_queue(), vk::Queue::null());
        assert_ne!(ctx.present_queue(), vk::Queue::null());
        assert_ne!(ctx.graphics_queue(), ctx.present_queue());
        ctx.destroy();
    }

    #[test]
    fn test_destroy_order() {
        let instance = HeadlessInstance::new_default();
        let surface = instance.create_surface(surface_extent());
        let ctx = DeviceContext::new(instance.clone(), surface, &DeviceConfig::default()).unwrap();
        instance.clear_events();

        ctx.destroy();

        let events = instance.events();
        assert_eq!(
            events,
            vec![
                DeviceEvent::Destroyed {
                    kind: ObjectKind::Surface,
                    handle: ash::vk::Handle::as_raw(surface),
                },
                DeviceEvent::DeviceDestroyed,
                DeviceEvent::InstanceDestroyed,
            ]
        );
        assert!(instance.is_destroyed());
        assert_eq!(instance.live_surfaces(), 0);
    }
}
