use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, info};

use super::device::HeadlessDevice;
use super::{DeviceEvent, HeadlessAdapter, ObjectKind, Shared, lock};
use crate::backend::{DeviceCreateDesc, GpuDevice, GpuInstance};
use crate::error::{RhiError, RhiResult};
use crate::memory::memory_properties_from_flags;

/// Headless stand-in for a Vulkan instance.
///
/// Physical device handles are the adapter's position plus one, so the
/// first adapter is always `vk::PhysicalDevice::from_raw(1)`.
pub struct HeadlessInstance {
    adapters: Vec<HeadlessAdapter>,
    shared: Arc<Shared>,
    devices: Mutex<Vec<Arc<HeadlessDevice>>>,
    destroyed: Mutex<bool>,
}

impl HeadlessInstance {
    /// Creates an instance exposing the given adapters in order.
    pub fn new(adapters: Vec<HeadlessAdapter>) -> Arc<Self> {
        info!("Headless instance created with {} adapter(s)", adapters.len());
        Arc::new(Self {
            adapters,
            shared: Shared::new(),
            devices: Mutex::new(Vec::new()),
            destroyed: Mutex::new(false),
        })
    }

    /// Creates an instance with a single default adapter.
    pub fn new_default() -> Arc<Self> {
        Self::new(vec![HeadlessAdapter::default()])
    }

    /// Creates a presentation surface of the given size.
    pub fn create_surface(&self, extent: vk::Extent2D) -> vk::SurfaceKHR {
        let raw = self.shared.next_handle();
        self.shared.surfaces().insert(raw, extent);
        self.shared.push(DeviceEvent::Created {
            kind: ObjectKind::Surface,
            handle: raw,
        });
        debug!("Headless surface created: {}x{}", extent.width, extent.height);
        vk::SurfaceKHR::from_raw(raw)
    }

    /// Changes the size of a surface, as a window resize would.
    ///
    /// Swapchains created for the old size report `ERROR_OUT_OF_DATE_KHR`
    /// from then on.
    pub fn set_surface_extent(&self, surface: vk::SurfaceKHR, extent: vk::Extent2D) {
        if let Some(current) = self.shared.surfaces().get_mut(&surface.as_raw()) {
            *current = extent;
        }
    }

    /// Returns the adapter behind a physical device handle.
    pub fn adapter(&self, physical_device: vk::PhysicalDevice) -> Option<&HeadlessAdapter> {
        let raw = physical_device.as_raw();
        if raw == 0 {
            return None;
        }
        self.adapters.get(raw as usize - 1)
    }

    /// Most recently created logical device.
    pub fn last_device(&self) -> Option<Arc<HeadlessDevice>> {
        lock(&self.devices).last().cloned()
    }

    /// Snapshot of the event log shared with every device of this instance.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.shared.events()
    }

    pub fn clear_events(&self) {
        self.shared.clear_events();
    }

    /// Number of surfaces not yet destroyed.
    pub fn live_surfaces(&self) -> usize {
        self.shared.surfaces().len()
    }

    pub fn is_destroyed(&self) -> bool {
        *lock(&self.destroyed)
    }

    fn adapter_or_err(&self, physical_device: vk::PhysicalDevice) -> RhiResult<&HeadlessAdapter> {
        self.adapter(physical_device).ok_or_else(|| {
            RhiError::InvalidHandle(format!("Unknown physical device {:?}", physical_device))
        })
    }

    fn surface_adapter(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<&HeadlessAdapter> {
        self.surface_extent(surface)?;
        let adapter = self.adapter_or_err(physical_device)?;
        if adapter.surface_queries_fail {
            return Err(RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        Ok(adapter)
    }

    fn surface_extent(&self, surface: vk::SurfaceKHR) -> RhiResult<vk::Extent2D> {
        self.shared
            .surfaces()
            .get(&surface.as_raw())
            .copied()
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR))
    }
}

impl GpuInstance for HeadlessInstance {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn enumerate_physical_devices(&self) -> RhiResult<Vec<vk::PhysicalDevice>> {
        Ok((1..=self.adapters.len() as u64)
            .map(vk::PhysicalDevice::from_raw)
            .collect())
    }

    fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties::default();
        if let Some(adapter) = self.adapter(physical_device) {
            properties.device_type = adapter.device_type;
            properties.api_version = vk::make_api_version(0, 1, 0, 0);
            properties.limits.min_uniform_buffer_offset_alignment =
                adapter.min_uniform_buffer_offset_alignment;
            properties.limits.max_push_constants_size = 128;
            // Leave room for the terminating nul.
            let max = properties.device_name.len() - 1;
            for (dst, src) in properties
                .device_name
                .iter_mut()
                .zip(adapter.name.bytes().take(max))
            {
                *dst = src as std::ffi::c_char;
            }
        }
        properties
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.adapter(physical_device)
            .map(|adapter| adapter.queue_families.clone())
            .unwrap_or_default()
    }

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        self.adapter(physical_device)
            .map(|adapter| memory_properties_from_flags(&adapter.memory_types))
            .unwrap_or_default()
    }

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        let supports_depth = self
            .adapter(physical_device)
            .is_some_and(|adapter| adapter.depth_formats.contains(&format));
        if supports_depth {
            vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            }
        } else {
            vk::FormatProperties::default()
        }
    }

    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> RhiResult<Vec<String>> {
        Ok(self.adapter_or_err(physical_device)?.extensions.clone())
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<bool> {
        Ok(self
            .surface_adapter(physical_device, surface)?
            .present_families
            .contains(&queue_family))
    }

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<vk::SurfaceCapabilitiesKHR> {
        let adapter = self.adapter_or_err(physical_device)?;
        let extent = self.surface_extent(surface)?;
        let current_extent = if adapter.variable_extent {
            vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            }
        } else {
            extent
        };

        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: adapter.min_image_count,
            max_image_count: adapter.max_image_count,
            current_extent,
            min_image_extent: adapter.min_extent,
            max_image_extent: adapter.max_extent,
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        })
    }

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.surface_adapter(physical_device, surface)?.surface_formats.clone())
    }

    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Vec<vk::PresentModeKHR>> {
        Ok(self.surface_adapter(physical_device, surface)?.present_modes.clone())
    }

    fn create_device(&self, desc: &DeviceCreateDesc<'_>) -> RhiResult<Arc<dyn GpuDevice>> {
        let adapter = self.adapter_or_err(desc.physical_device)?;

        for family in desc.queue_families {
            if *family as usize >= adapter.queue_families.len() {
                return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
            }
        }
        for extension in desc.extensions {
            let name = extension.to_string_lossy();
            if !adapter.extensions.iter().any(|e| *e == name) {
                return Err(RhiError::VulkanError(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
            }
        }

        let device = HeadlessDevice::with_shared(
            adapter.clone(),
            desc.queue_families,
            desc.enable_validation,
            self.shared.clone(),
        );
        lock(&self.devices).push(device.clone());
        Ok(device)
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        if self.shared.surfaces().remove(&surface.as_raw()).is_some() {
            self.shared.push(DeviceEvent::Destroyed {
                kind: ObjectKind::Surface,
                handle: surface.as_raw(),
            });
            debug!("Headless surface destroyed");
        }
    }

    fn destroy(&self) {
        let mut destroyed = lock(&self.destroyed);
        if !*destroyed {
            *destroyed = true;
            self.shared.push(DeviceEvent::InstanceDestroyed);
            info!("Headless instance destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_order() {
        let instance = HeadlessInstance::new(vec![
            HeadlessAdapter::default(),
            HeadlessAdapter::split_queues(),
        ]);
        let devices = instance.enumerate_physical_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(
            instance.adapter(devices[1]).unwrap().name,
            "Headless Split-Queue Adapter"
        );
    }

    #[test]
    fn test_variable_extent_sentinel() {
        let instance = HeadlessInstance::new(vec![HeadlessAdapter {
            variable_extent: true,
            ..Default::default()
        }]);
        let surface = instance.create_surface(vk::Extent2D {
            width: 640,
            height: 480,
        });
        let pd = instance.enumerate_physical_devices().unwrap()[0];
        let caps = instance.surface_capabilities(pd, surface).unwrap();
        assert_eq!(caps.current_extent.width, u32::MAX);
    }

    #[test]
    fn test_create_device_rejects_missing_extension() {
        let instance = HeadlessInstance::new(vec![HeadlessAdapter {
            extensions: Vec::new(),
            ..Default::default()
        }]);
        let pd = instance.enumerate_physical_devices().unwrap()[0];
        let result = instance.create_device(&DeviceCreateDesc {
            physical_device: pd,
            queue_families: &[0],
            extensions: &[ash::khr::swapchain::NAME],
            enable_validation: false,
        });
        assert!(result.is_err());
    }
}
