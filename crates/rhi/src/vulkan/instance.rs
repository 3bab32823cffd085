//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, the debug
//! messenger and every instance-level query of [`GpuInstance`].
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::vulkan::{InstanceConfig, VulkanInstance};
//!
//! let config = InstanceConfig {
//!     app_name: "minirender".to_string(),
//!     enable_validation: cfg!(debug_assertions),
//!     extensions: Vec::new(),
//! };
//! let instance = VulkanInstance::new(&config).expect("Failed to create Vulkan instance");
//!
//! // Access the underlying Vulkan handles, e.g. for surface creation
//! let vk_instance = instance.handle();
//! let entry = instance.entry();
//! ```

use std::ffi::{CStr, CString, c_char};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::{Entry, vk};
use tracing::{debug, error, info, trace, warn};

use super::device::VulkanDevice;
use crate::backend::{DeviceCreateDesc, GpuDevice, GpuInstance};
use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance creation options.
#[derive(Clone, Debug, Default)]
pub struct InstanceConfig {
    pub app_name: String,
    /// Enable the Khronos validation layer and the debug messenger.
    pub enable_validation: bool,
    /// Instance extensions the window system needs for surface creation.
    pub extensions: Vec<*const c_char>,
}

/// Vulkan instance wrapper with optional validation layer support.
///
/// The instance is destroyed explicitly through [`GpuInstance::destroy`],
/// after every surface and device created from it.
pub struct VulkanInstance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    /// Debug utils extension loader and messenger (only present when validation is enabled)
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    validation: bool,
    destroyed: AtomicBool,
}

impl VulkanInstance {
    /// Creates a new Vulkan instance.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Vulkan library cannot be loaded
    /// - Validation is requested but the layer is not installed
    ///   ([`RhiError::MissingValidationLayer`])
    /// - A required extension is not available ([`RhiError::MissingExtension`])
    /// - Instance creation or debug messenger setup fails
    pub fn new(config: &InstanceConfig) -> RhiResult<Arc<Self>> {
        // Load the Vulkan library
        let entry = unsafe { Entry::load()? };

        if config.enable_validation && !Self::is_validation_layer_available(&entry)? {
            return Err(RhiError::MissingValidationLayer(
                VALIDATION_LAYER_NAME.to_string_lossy().into_owned(),
            ));
        }

        // Collect required extensions
        let mut extensions = config.extensions.clone();
        extensions.push(ash::khr::surface::NAME.as_ptr());
        if config.enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        extensions.sort_unstable();
        extensions.dedup();
        Self::check_extensions(&entry, &extensions)?;

        let app_name = CString::new(config.app_name.as_str())
            .map_err(|e| RhiError::InvalidUsage(format!("Invalid application name: {}", e)))?;

        // Set up application info
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"minirender")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Set up layers
        let layers = if config.enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created for '{}' with {} extension(s)",
            config.app_name,
            extensions.len()
        );

        let debug = if config.enable_validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => {
                    info!("Validation layers enabled");
                    Some((debug_utils, messenger))
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        Ok(Arc::new(Self {
            entry,
            instance,
            surface_loader,
            debug,
            validation: config.enable_validation,
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.validation
    }

    /// Checks if the Khronos validation layer is available.
    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        Ok(available_layers
            .iter()
            .any(|layer| {
                layer
                    .layer_name_as_c_str()
                    .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
            }))
    }

    fn check_extensions(entry: &Entry, extensions: &[*const c_char]) -> RhiResult<()> {
        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };

        for &ptr in extensions {
            let name = unsafe { CStr::from_ptr(ptr) };
            let found = available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name));
            if !found {
                return Err(RhiError::MissingExtension(
                    name.to_string_lossy().into_owned(),
                ));
            }
        }

        Ok(())
    }

    /// Sets up the debug messenger for validation layer callbacks.
    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        debug!("Debug messenger created");

        Ok(messenger)
    }
}

impl GpuInstance for VulkanInstance {
    fn backend_name(&self) -> &'static str {
        "vulkan"
    }

    fn enumerate_physical_devices(&self) -> RhiResult<Vec<vk::PhysicalDevice>> {
        Ok(unsafe { self.instance.enumerate_physical_devices()? })
    }

    fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        unsafe { self.instance.get_physical_device_properties(physical_device) }
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .get_physical_device_memory_properties(physical_device)
        }
    }

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(physical_device, format)
        }
    }

    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> RhiResult<Vec<String>> {
        let properties = unsafe {
            self.instance
                .enumerate_device_extension_properties(physical_device)?
        };

        Ok(properties
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<bool> {
        Ok(unsafe {
            self.surface_loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                surface,
            )?
        })
    }

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)?
        })
    }

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, surface)?
        })
    }

    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)?
        })
    }

    fn create_device(&self, desc: &DeviceCreateDesc<'_>) -> RhiResult<Arc<dyn GpuDevice>> {
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = desc
            .queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extension_names: Vec<*const c_char> =
            desc.extensions.iter().map(|ext| ext.as_ptr()).collect();

        // Device layers are deprecated but still honoured by older loaders.
        let layers = if desc.enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe {
            self.instance
                .create_device(desc.physical_device, &create_info, None)?
        };

        Ok(Arc::new(VulkanDevice::new(&self.instance, device)))
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) };
        debug!("Destroyed surface");
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            warn!("Vulkan instance destroyed twice");
            return;
        }

        unsafe {
            // Destroy debug messenger before instance
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::Acquire) {
            warn!("VulkanInstance dropped without destroy");
        }
    }
}

/// Debug callback function for validation layer messages.
///
/// Messages are forwarded to `tracing` at the matching severity.
///
/// # Safety
///
/// This function is called from the Vulkan driver and must follow the
/// Vulkan specification for debug callbacks.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = message_type_name(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!(target: "minirender::vulkan", "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!(target: "minirender::vulkan", "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            debug!(target: "minirender::vulkan", "[{}] {}", type_str, message);
        }
        _ => {
            trace!(target: "minirender::vulkan", "[{}] {}", type_str, message);
        }
    }

    // Returning VK_FALSE indicates the call should not be aborted
    vk::FALSE
}

fn message_type_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        "General"
    } else {
        "Unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_instance_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanInstance>();
    }

    #[test]
    fn test_message_type_name() {
        assert_eq!(
            message_type_name(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "Validation"
        );
        assert_eq!(
            message_type_name(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            ),
            "Performance"
        );
        assert_eq!(
            message_type_name(vk::DebugUtilsMessageTypeFlagsEXT::empty()),
            "Unknown"
        );
    }

    #[test]
    fn test_instance_creation_without_validation() {
        // This test requires Vulkan to be installed
        let config = InstanceConfig {
            app_name: "minirender-test".to_string(),
            ..Default::default()
        };
        match VulkanInstance::new(&config) {
            Ok(instance) => {
                assert!(!instance.has_validation());
                instance.destroy();
            }
            Err(RhiError::LoadingError(_)) | Err(RhiError::MissingExtension(_)) => {
                // Vulkan not available - skip test
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(RhiError::VulkanError(e)) => {
                eprintln!("Skipping test: Vulkan instance unavailable ({})", e);
            }
            Err(e) => {
                panic!("Unexpected error: {:?}", e);
            }
        }
    }
}
