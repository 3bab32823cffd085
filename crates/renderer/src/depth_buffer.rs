//! Depth buffer management.
//!
//! This module handles depth buffer creation for depth testing. The depth
//! image lives in device-local memory and has a single depth-aspect view.
//!
//! # Overview
//!
//! - [`choose_depth_format`] picks the first of [`DEPTH_FORMAT_CANDIDATES`]
//!   the GPU can use as an optimally tiled depth attachment
//! - [`DepthBuffer`] pairs a [`GpuImage`] with its view
//!
//! The depth buffer is sized to the swapchain, so it is recreated with it.
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::device::DeviceContext;
//! use minirender_renderer::depth_buffer::{DepthBuffer, choose_depth_format};
//!
//! # fn example(ctx: &DeviceContext) -> Result<(), minirender_rhi::RhiError> {
//! let format = choose_depth_format(ctx.instance().as_ref(), ctx.physical_device().device)?;
//! let depth = DepthBuffer::new(
//!     ctx.device().as_ref(),
//!     ctx.memory_properties(),
//!     minirender_rhi::vk::Extent2D { width: 1920, height: 1080 },
//!     format,
//! )?;
//!
//! let view = depth.image_view();
//! depth.destroy(ctx.device().as_ref());
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};

use minirender_rhi::backend::{GpuDevice, GpuInstance, ImageDesc};
use minirender_rhi::image::{GpuImage, create_view};
use minirender_rhi::memory::MemoryLocation;
use minirender_rhi::{RhiError, RhiResult};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Picks the first candidate usable as an optimally tiled depth attachment.
///
/// # Errors
///
/// Returns [`RhiError::NoDepthFormat`] if no candidate qualifies.
pub fn choose_depth_format(
    instance: &dyn GpuInstance,
    physical_device: vk::PhysicalDevice,
) -> RhiResult<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .iter()
        .copied()
        .find(|format| {
            instance
                .format_properties(physical_device, *format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .inspect(|format| debug!("Selected depth format {:?}", format))
        .ok_or_else(|| RhiError::NoDepthFormat(DEPTH_FORMAT_CANDIDATES.to_vec()))
}

/// Depth buffer for depth testing.
///
/// # Resource Destruction
///
/// [`DepthBuffer::destroy`] releases resources in this order:
/// 1. Image view
/// 2. Image
/// 3. Memory
///
/// Dropping an undestroyed depth buffer leaks it; the image logs the leak.
pub struct DepthBuffer {
    image: GpuImage,
    image_view: vk::ImageView,
    format: vk::Format,
}

impl DepthBuffer {
    /// Creates a device-local depth image of `extent` and its view.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is empty or if image, memory or view
    /// creation fails. A failed view creation releases the image.
    pub fn new(
        device: &dyn GpuDevice,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidUsage(
                "Depth buffer dimensions must be greater than 0".to_string(),
            ));
        }

        let image = GpuImage::allocate(
            device,
            memory_properties,
            &ImageDesc {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
            MemoryLocation::DeviceLocal,
        )?;

        let image_view =
            match create_view(device, image.handle(), format, vk::ImageAspectFlags::DEPTH) {
                Ok(view) => view,
                Err(e) => {
                    image.release(device);
                    return Err(e);
                }
            };

        info!(
            "Created depth buffer: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(Self {
            image,
            image_view,
            format,
        })
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Returns the depth format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the depth buffer extent (width and height).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    /// Destroys the view, then the image and its memory.
    pub fn destroy(self, device: &dyn GpuDevice) {
        let Self {
            image, image_view, ..
        } = self;
        let extent = image.extent();
        device.destroy_image_view(image_view);
        image.release(device);
        debug!("Destroyed depth buffer: {}x{}", extent.width, extent.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirender_rhi::headless::{
        DeviceEvent, FailPoint, HeadlessAdapter, HeadlessDevice, HeadlessInstance, ObjectKind,
    };
    use minirender_rhi::memory::memory_properties_from_flags;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_prefers_first_candidate() {
        let instance = HeadlessInstance::new_default();
        let pd = instance.enumerate_physical_devices().unwrap()[0];
        assert_eq!(
            choose_depth_format(instance.as_ref(), pd).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
    }

    #[test]
    fn test_falls_back_in_order() {
        let instance = HeadlessInstance::new(vec![HeadlessAdapter {
            depth_formats: vec![vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT],
            ..Default::default()
        }]);
        let pd = instance.enumerate_physical_devices().unwrap()[0];
        assert_eq!(
            choose_depth_format(instance.as_ref(), pd).unwrap(),
            vk::Format::D32_SFLOAT
        );
    }

    #[test]
    fn test_no_depth_format() {
        let instance = HeadlessInstance::new(vec![HeadlessAdapter {
            depth_formats: vec![vk::Format::D16_UNORM],
            ..Default::default()
        }]);
        let pd = instance.enumerate_physical_devices().unwrap()[0];
        let err = choose_depth_format(instance.as_ref(), pd).unwrap_err();
        assert!(matches!(err, RhiError::NoDepthFormat(ref formats) if formats.len() == 3));
    }

    #[test]
    fn test_create_and_destroy() {
        let device = HeadlessDevice::new_default();
        let props = memory_properties_from_flags(&device.adapter().memory_types);

        let depth = DepthBuffer::new(
            device.as_ref(),
            &props,
            extent(800, 600),
            vk::Format::D32_SFLOAT,
        )
        .unwrap();
        assert_eq!(depth.format(), vk::Format::D32_SFLOAT);
        assert_eq!(depth.extent(), extent(800, 600));
        assert_eq!(device.live_objects_of(ObjectKind::ImageView), 1);

        device.clear_events();
        depth.destroy(device.as_ref());
        let kinds: Vec<ObjectKind> = device
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::Destroyed { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![ObjectKind::ImageView, ObjectKind::Image, ObjectKind::Memory]
        );
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_view_failure_releases_image() {
        let device = HeadlessDevice::new_default();
        let props = memory_properties_from_flags(&device.adapter().memory_types);

        device.fail_next(FailPoint::CreateImageView);
        let result = DepthBuffer::new(device.as_ref(), &props, extent(64, 64), vk::Format::D32_SFLOAT);
        assert!(result.is_err());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_zero_extent_is_rejected() {
        let device = HeadlessDevice::new_default();
        let props = memory_properties_from_flags(&device.adapter().memory_types);
        assert!(DepthBuffer::new(device.as_ref(), &props, extent(0, 600), vk::Format::D32_SFLOAT).is_err());
        assert_eq!(device.live_objects(), 0);
    }
}
