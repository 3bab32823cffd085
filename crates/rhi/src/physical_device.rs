//! Physical device (GPU) selection.
//!
//! This module handles GPU enumeration and selection based on capabilities.
//!
//! # Overview
//!
//! The physical device selection process involves:
//! 1. Enumerating all available GPUs, in the order the instance reports them
//! 2. Finding a graphics queue family and a present-capable queue family
//! 3. Checking the required device extensions ([`DEVICE_EXTENSIONS`])
//! 4. Checking that the surface offers at least one format and one present mode
//!
//! The first device that passes every check is selected. There is no scoring.
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::headless::HeadlessInstance;
//! use minirender_rhi::physical_device::select_physical_device;
//! use minirender_rhi::vk;
//!
//! let instance = HeadlessInstance::new_default();
//! let surface = instance.create_surface(vk::Extent2D { width: 800, height: 600 });
//!
//! let device_info = select_physical_device(&*instance, surface)
//!     .expect("Failed to select physical device");
//!
//! println!("Selected GPU: {:?}", device_info.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::GpuInstance;
use crate::error::{RhiError, RhiResult};

/// Device extensions every selected GPU must support.
pub const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices used for rendering.
///
/// Graphics and present may be the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics: u32,
    /// Index of the queue family that can present to the surface.
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Returns whether graphics and present use the same family.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Returns the unique queue family indices, graphics first.
    ///
    /// This is useful when creating logical devices to avoid creating
    /// duplicate queues for the same family.
    pub fn unique_families(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Information about the selected physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Properties of every queue family, by index.
    pub queue_family_properties: Vec<vk::QueueFamilyProperties>,
    /// Queue family indices chosen for rendering.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        device_name(&self.properties)
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Minimum alignment of dynamic uniform buffer offsets.
    #[inline]
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> &str {
    properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("Unknown Device")
}

/// Selects the first physical device suitable for rendering to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if there are no devices or none is
/// suitable, and propagates a failed device enumeration. A candidate whose
/// own queries fail is skipped.
pub fn select_physical_device(
    instance: &dyn GpuInstance,
    surface: vk::SurfaceKHR,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    for device in devices {
        let selected = match check_device_suitability(instance, device, surface) {
            Ok(Some(selected)) => selected,
            Ok(None) => continue,
            Err(e) => {
                debug!(
                    "GPU '{}' skipped: query failed: {}",
                    device_name(&instance.physical_device_properties(device)),
                    e
                );
                continue;
            }
        };

        let (major, minor, patch) = selected.api_version();
        info!(
            "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}",
            selected.device_name(),
            selected.device_type_name(),
            major,
            minor,
            patch
        );
        return Ok(selected);
    }

    warn!("No suitable GPU found with required capabilities");
    Err(RhiError::NoSuitableGpu)
}

/// Checks if a physical device is suitable for rendering.
///
/// Returns `Ok(None)` with a debug log naming the reason when it is not.
fn check_device_suitability(
    instance: &dyn GpuInstance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> RhiResult<Option<PhysicalDeviceInfo>> {
    let properties = instance.physical_device_properties(device);
    let name = device_name(&properties).to_string();
    let queue_family_properties = instance.queue_family_properties(device);

    let Some(queue_families) =
        find_queue_families(instance, device, surface, &queue_family_properties)?
    else {
        debug!("GPU '{}' skipped: missing graphics or present queue family", name);
        return Ok(None);
    };

    let supported = instance.device_extensions(device)?;
    for required in DEVICE_EXTENSIONS {
        let required = required.to_string_lossy();
        if !supported.iter().any(|ext| *ext == required) {
            debug!("GPU '{}' skipped: extension {} not supported", name, required);
            return Ok(None);
        }
    }

    if instance.surface_formats(device, surface)?.is_empty() {
        debug!("GPU '{}' skipped: no surface formats", name);
        return Ok(None);
    }
    if instance.surface_present_modes(device, surface)?.is_empty() {
        debug!("GPU '{}' skipped: no present modes", name);
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties: instance.memory_properties(device),
        queue_family_properties,
        queue_families,
    }))
}

/// Scans queue families for a graphics family and a present-capable family.
///
/// The scan stops as soon as both have been found.
pub fn find_queue_families(
    instance: &dyn GpuInstance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    families: &[vk::QueueFamilyProperties],
) -> RhiResult<Option<QueueFamilyIndices>> {
    let mut graphics = None;
    let mut present = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        // Skip families with no queues available
        if family.queue_count == 0 {
            continue;
        }

        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(i);
        }

        if present.is_none() && instance.surface_support(device, i, surface)? {
            present = Some(i);
        }

        if let (Some(graphics), Some(present)) = (graphics, present) {
            return Ok(Some(QueueFamilyIndices { graphics, present }));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessAdapter, HeadlessInstance};

    fn surface_of(instance: &HeadlessInstance) -> vk::SurfaceKHR {
        instance.create_surface(vk::Extent2D {
            width: 800,
            height: 600,
        })
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics: 0,
            present: 0,
        };
        assert!(shared.is_shared());
        assert_eq!(shared.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        assert!(!split.is_shared());
        assert_eq!(split.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_first_suitable_device_wins() {
        let instance = HeadlessInstance::new(vec![
            HeadlessAdapter {
                name: "No Swapchain".to_string(),
                extensions: Vec::new(),
                ..Default::default()
            },
            HeadlessAdapter {
                name: "First Suitable".to_string(),
                ..Default::default()
            },
            HeadlessAdapter {
                name: "Second Suitable".to_string(),
                device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
                ..Default::default()
            },
        ]);
        let surface = surface_of(&instance);

        let info = select_physical_device(&*instance, surface).unwrap();
        assert_eq!(info.device_name(), "First Suitable");
        assert_eq!(info.queue_families.graphics, 0);
    }

    #[test]
    fn test_failed_query_skips_candidate() {
        let instance = HeadlessInstance::new(vec![
            HeadlessAdapter {
                name: "Lost Surface".to_string(),
                surface_queries_fail: true,
                ..Default::default()
            },
            HeadlessAdapter {
                name: "Working".to_string(),
                ..Default::default()
            },
        ]);
        let surface = surface_of(&instance);

        let info = select_physical_device(&*instance, surface).unwrap();
        assert_eq!(info.device_name(), "Working");
    }

    #[test]
    fn test_only_failing_candidates() {
        let instance = HeadlessInstance::new(vec![HeadlessAdapter {
            surface_queries_fail: true,
            ..Default::default()
        }]);
        let surface = surface_of(&instance);
        assert!(matches!(
            select_physical_device(&*instance, surface),
            Err(RhiError::NoSuitableGpu)
        ));
    }

    #[test]
    fn test_split_queue_families() {
        let instance = HeadlessInstance::new(vec![HeadlessAdapter::split_queues()]);
        let surface = surface_of(&instance);

        let info = select_physical_device(&*instance, surface).unwrap();
        assert_eq!(
            info.queue_families,
            QueueFamilyIndices {
                graphics: 0,
                present: 1
            }
        );
    }

    #[test]
    fn test_no_devices() {
        let instance = HeadlessInstance::new(Vec::new());
        let surface = surface_of(&instance);
        assert!(matches!(
            select_physical_device(&*instance, surface),
            Err(RhiError::NoSuitableGpu)
        ));
    }

    #[test]
    fn test_no_suitable_device() {
        let instance = HeadlessInstance::new(vec![
            HeadlessAdapter {
                present_families: Vec::new(),
                ..Default::default()
            },
            HeadlessAdapter {
                surface_formats: Vec::new(),
                ..Default::default()
            },
            HeadlessAdapter {
                present_modes: Vec::new(),
                ..Default::default()
            },
        ]);
        let surface = surface_of(&instance);
        assert!(matches!(
            select_physical_device(&*instance, surface),
            Err(RhiError::NoSuitableGpu)
        ));
    }

    #[test]
    fn test_device_info_accessors() {
        let instance = HeadlessInstance::new_default();
        let surface = surface_of(&instance);
        let info = select_physical_device(&*instance, surface).unwrap();
        assert_eq!(info.device_type_name(), "Virtual GPU");
        assert_eq!(info.min_uniform_buffer_offset_alignment(), 256);
        assert_eq!(info.api_version(), (1, 0, 0));
        assert!(info.device_local_memory() > 0);
    }
}
