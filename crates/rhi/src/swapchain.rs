//! Swapchain management.
//!
//! This module handles swapchain creation, image acquisition, and presentation.
//!
//! # Overview
//!
//! The [`Swapchain`] struct provides a safe abstraction over the swapchain,
//! including:
//! - Surface capability querying
//! - Format and present mode selection
//! - Image view creation and management
//! - Resize handling through [`Swapchain::recreate`]
//!
//! The swapchain is never mutated in place. A resize produces a new one built
//! with the old handle as `old_swapchain`, after which the old one is destroyed.
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::device::{DeviceConfig, DeviceContext};
//! use minirender_rhi::headless::HeadlessInstance;
//! use minirender_rhi::swapchain::Swapchain;
//! use minirender_rhi::vk;
//!
//! # fn example() -> Result<(), minirender_rhi::RhiError> {
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let instance = HeadlessInstance::new_default();
//! let surface = instance.create_surface(extent);
//! let ctx = DeviceContext::new(instance, surface, &DeviceConfig::default())?;
//!
//! let swapchain = Swapchain::new(&ctx, extent, vk::SwapchainKHR::null())?;
//!
//! // In render loop:
//! // let (image_index, suboptimal) = swapchain.acquire_next_image(semaphore)?;
//! // ... render to swapchain.image_view(image_index) ...
//! // let suboptimal = swapchain.present(queue, image_index, render_finished)?;
//!
//! swapchain.destroy();
//! ctx.destroy();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::{GpuDevice, GpuInstance, PresentDesc, SwapchainDesc};
use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult, SubmissionOp};
use crate::image::create_view;

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        instance: &dyn GpuInstance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Self> {
        let capabilities = instance.surface_capabilities(physical_device, surface)?;
        let formats = instance.surface_formats(physical_device, surface)?;
        let present_modes = instance.surface_present_modes(physical_device, surface)?;

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Checks if the swapchain support is adequate for rendering.
    ///
    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Swapchain wrapper.
///
/// This struct manages the swapchain and its associated resources:
/// - Swapchain images (owned by the swapchain, not explicitly managed)
/// - Image views (managed by this struct)
///
/// # Thread Safety
///
/// Only one thread should acquire from or present to a swapchain at a time.
pub struct Swapchain {
    device: Arc<dyn GpuDevice>,
    swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain)
    images: Vec<vk::Image>,
    /// One color view per image
    image_views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    destroyed: bool,
}

impl Swapchain {
    /// Creates a new swapchain for the context's surface.
    ///
    /// The swapchain uses:
    /// - Format from [`choose_surface_format`], present mode from [`choose_present_mode`]
    /// - `framebuffer_extent` when the surface leaves the extent to the swapchain
    /// - Image usage `COLOR_ATTACHMENT`, one layer, opaque composite alpha, clipped
    /// - `CONCURRENT` sharing when graphics and present families differ
    ///
    /// Pass `vk::SwapchainKHR::null()` as `old_swapchain` for the first swapchain.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Surface queries fail
    /// - No surface format or present mode is available
    /// - Swapchain creation fails
    /// - Image view creation fails (the swapchain and earlier views are destroyed)
    pub fn new(
        ctx: &DeviceContext,
        framebuffer_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let device = ctx.device().clone();
        let support = SwapchainSupportDetails::query(
            ctx.instance().as_ref(),
            ctx.physical_device().device,
            ctx.surface(),
        )?;

        // Select optimal settings
        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, framebuffer_extent);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        // Handle queue family sharing
        let families = ctx.queue_families();
        let queue_family_indices = [families.graphics, families.present];
        let (sharing_mode, queue_family_indices) = if families.is_shared() {
            debug!("Using EXCLUSIVE sharing mode (same queue family for graphics and present)");
            (vk::SharingMode::EXCLUSIVE, &[][..])
        } else {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                families.graphics, families.present
            );
            (
                vk::SharingMode::CONCURRENT,
                queue_family_indices.as_slice(),
            )
        };

        let swapchain = device.create_swapchain(&SwapchainDesc {
            surface: ctx.surface(),
            min_image_count: image_count,
            surface_format,
            extent,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            sharing_mode,
            queue_family_indices,
            pre_transform: support.capabilities.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: true,
            old_swapchain,
        })?;

        let images = match device.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(swapchain);
                return Err(e);
            }
        };
        info!("Swapchain created with {} images", images.len());

        let image_views = match create_image_views(device.as_ref(), &images, surface_format.format)
        {
            Ok(views) => views,
            Err(e) => {
                device.destroy_swapchain(swapchain);
                return Err(e);
            }
        };

        Ok(Self {
            device,
            swapchain,
            images,
            image_views,
            surface_format,
            extent,
            present_mode,
            destroyed: false,
        })
    }

    /// Replaces this swapchain with one sized for `framebuffer_extent`.
    ///
    /// The image views are destroyed first, the new swapchain is created with
    /// this one as `old_swapchain`, then this swapchain is destroyed. On
    /// failure `self` keeps the retired handle without views, so a later
    /// [`Swapchain::destroy`] still releases it.
    ///
    /// The caller must ensure no submitted work still uses the old images.
    pub fn recreate(
        &mut self,
        ctx: &DeviceContext,
        framebuffer_extent: vk::Extent2D,
    ) -> RhiResult<()> {
        info!(
            "Recreating swapchain for new size: {}x{}",
            framebuffer_extent.width, framebuffer_extent.height
        );

        self.destroy_image_views();
        let replacement = Self::new(ctx, framebuffer_extent, self.swapchain)?;
        let old = std::mem::replace(self, replacement);
        old.destroy();
        Ok(())
    }

    /// Acquires the next swapchain image for rendering, waiting without timeout.
    ///
    /// Returns `(image_index, suboptimal)`.
    ///
    /// # Errors
    ///
    /// Failures are [`RhiError::Submission`] with [`SubmissionOp::Acquire`]. If the
    /// swapchain is out of date the result is `ERROR_OUT_OF_DATE_KHR` and the
    /// caller should recreate the swapchain.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<(u32, bool)> {
        self.device
            .acquire_next_image(self.swapchain, u64::MAX, semaphore)
            .map_err(|e| tag_submission(e, SubmissionOp::Acquire))
    }

    /// Presents an acquired image once `wait_semaphore` is signaled.
    ///
    /// Returns true if the swapchain is suboptimal and should be recreated.
    ///
    /// # Errors
    ///
    /// Failures are [`RhiError::Submission`] with [`SubmissionOp::Present`].
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<bool> {
        let wait_semaphores = [wait_semaphore];
        self.device
            .queue_present(
                queue,
                &PresentDesc {
                    wait_semaphores: &wait_semaphores,
                    swapchain: self.swapchain,
                    image_index,
                },
            )
            .map_err(|e| tag_submission(e, SubmissionOp::Present))
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns all swapchain images.
    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Returns the image view at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    /// Returns all image views.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Destroys the image views, then the swapchain.
    pub fn destroy(mut self) {
        self.destroy_image_views();
        self.device.destroy_swapchain(self.swapchain);
        self.destroyed = true;

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("Swapchain dropped without destroy");
        }
    }
}

/// Re-tags a plain Vulkan failure as a frame-time submission failure.
fn tag_submission(error: RhiError, op: SubmissionOp) -> RhiError {
    match error {
        RhiError::VulkanError(result) => RhiError::Submission { op, result },
        other => other,
    }
}

/// Chooses the surface format.
///
/// - A single `UNDEFINED` entry means any format: `R8G8B8A8_UNORM` / `SRGB_NONLINEAR`.
/// - Otherwise the first `R8G8B8A8_UNORM` or `B8G8R8A8_UNORM` entry in `SRGB_NONLINEAR`.
/// - Otherwise the first entry.
///
/// # Errors
///
/// Returns [`RhiError::NoSurfaceFormats`] for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let first = *formats.first().ok_or(RhiError::NoSurfaceFormats)?;

    // The surface accepts anything
    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        debug!("Surface format unconstrained, selecting R8G8B8A8_UNORM");
        return Ok(vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    let preferred = formats.iter().find(|f| {
        (f.format == vk::Format::R8G8B8A8_UNORM || f.format == vk::Format::B8G8R8A8_UNORM)
            && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: {:?}", format.format);
        return Ok(format);
    }

    // Last resort: use the first available format
    warn!("Using first available surface format: {:?}", first.format);
    Ok(first)
}

/// Chooses the present mode.
///
/// Prefers MAILBOX (no tearing, low latency).
/// Falls back to FIFO (vsync, guaranteed to be available).
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    // FIFO is guaranteed to be available
    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width is u32::MAX),
/// clamps the framebuffer size to the surface's min/max extents.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_extent: vk::Extent2D,
) -> vk::Extent2D {
    // If current extent is defined, use it
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: framebuffer_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width,
        extent.height,
        framebuffer_extent.width,
        framebuffer_extent.height,
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height
    );

    extent
}

/// Determines the number of swapchain images.
///
/// One more than the minimum, clamped to the maximum when one is set.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    // If max_image_count is 0, there's no maximum
    let image_count = if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    };

    debug!(
        "Image count: {} (min: {}, max: {})",
        image_count,
        capabilities.min_image_count,
        if capabilities.max_image_count == 0 {
            "unlimited".to_string()
        } else {
            capabilities.max_image_count.to_string()
        }
    );

    image_count
}

/// Creates one color view per swapchain image.
///
/// On failure the views created so far are destroyed.
fn create_image_views(
    device: &dyn GpuDevice,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        match create_view(device, image, format, vk::ImageAspectFlags::COLOR) {
            Ok(view) => image_views.push(view),
            Err(e) => {
                for view in image_views {
                    device.destroy_image_view(view);
                }
                return Err(RhiError::SwapchainError(format!(
                    "Failed to create image view {}: {}",
                    i, e
                )));
            }
        }
    }

    debug!("Created {} image views", image_views.len());
    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;
    use crate::headless::{FailPoint, HeadlessAdapter, HeadlessInstance, ObjectKind};

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn context(adapter: HeadlessAdapter) -> (std::sync::Arc<HeadlessInstance>, DeviceContext) {
        let instance = HeadlessInstance::new(vec![adapter]);
        let surface = instance.create_surface(extent(800, 600));
        let ctx = DeviceContext::new(instance.clone(), surface, &DeviceConfig::default()).unwrap();
        (instance, ctx)
    }

    #[test]
    fn test_choose_surface_format_prefers_unorm_pair() {
        let formats = vec![
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_undefined_singleton() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            // Right format, wrong color space.
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::A2B10G10R10_UNORM_PACK32);
    }

    #[test]
    fn test_choose_surface_format_empty() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RhiError::NoSurfaceFormats)
        ));
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];

        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);

        // FIFO even when the list omits it
        let modes = vec![vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1920, 1080),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };

        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(2000, 2000),
            ..Default::default()
        };

        // Test clamping to max
        assert_eq!(choose_extent(&capabilities, extent(3000, 3000)), extent(2000, 2000));

        // Test clamping to min
        assert_eq!(choose_extent(&capabilities, extent(50, 50)), extent(100, 100));

        // Test within range
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let count = |min_image_count, max_image_count| {
            determine_image_count(&vk::SurfaceCapabilitiesKHR {
                min_image_count,
                max_image_count,
                ..Default::default()
            })
        };

        // 0 means no limit
        assert_eq!(count(2, 0), 3);
        assert_eq!(count(3, 3), 3);
        assert_eq!(count(2, 8), 3);
        assert_eq!(count(1, 1), 1);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_formats = SwapchainSupportDetails {
            formats: vec![],
            ..adequate.clone()
        };
        assert!(!no_formats.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate
        };
        assert!(!no_modes.is_adequate());
    }

    #[test]
    fn test_swapchain_exclusive_on_shared_family() {
        let (instance, ctx) = context(HeadlessAdapter::default());
        let swapchain = Swapchain::new(&ctx, extent(800, 600), vk::SwapchainKHR::null()).unwrap();
        let device = instance.last_device().unwrap();

        let info = device.swapchain_info(swapchain.handle()).unwrap();
        assert_eq!(info.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert_eq!(info.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(info.surface_format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.image_views().len(), 3);
        assert_eq!(device.live_objects_of(ObjectKind::ImageView), 3);

        swapchain.destroy();
        assert_eq!(device.live_objects(), 0);
        ctx.destroy();
    }

    #[test]
    fn test_swapchain_concurrent_on_distinct_families() {
        let (instance, ctx) = context(HeadlessAdapter::split_queues());
        let swapchain = Swapchain::new(&ctx, extent(800, 600), vk::SwapchainKHR::null()).unwrap();
        let device = instance.last_device().unwrap();

        let info = device.swapchain_info(swapchain.handle()).unwrap();
        assert_eq!(info.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(info.queue_family_indices, vec![0, 1]);

        swapchain.destroy();
        ctx.destroy();
    }

    #[test]
    fn test_view_failure_destroys_swapchain() {
        let (instance, ctx) = context(HeadlessAdapter::default());
        let device = instance.last_device().unwrap();
        device.fail_next(FailPoint::CreateImageView);

        let result = Swapchain::new(&ctx, extent(800, 600), vk::SwapchainKHR::null());
        assert!(matches!(result, Err(RhiError::SwapchainError(_))));
        assert_eq!(device.live_objects(), 0);
        ctx.destroy();
    }

    #[test]
    fn test_recreate_after_resize() {
        let (instance, ctx) = context(HeadlessAdapter::default());
        let device = instance.last_device().unwrap();
        let semaphore = device.create_semaphore().unwrap();

        let swapchain = Swapchain::new(&ctx, extent(800, 600), vk::SwapchainKHR::null()).unwrap();
        instance.set_surface_extent(ctx.surface(), extent(1024, 768));

        let err = swapchain.acquire_next_image(semaphore).unwrap_err();
        assert!(err.is_out_of_date());
        assert!(matches!(
            err,
            RhiError::Submission {
                op: SubmissionOp::Acquire,
                ..
            }
        ));

        let old = swapchain.handle();
        let mut swapchain = swapchain;
        swapchain.recreate(&ctx, extent(1024, 768)).unwrap();
        assert_ne!(swapchain.handle(), old);
        assert_eq!(swapchain.extent(), extent(1024, 768));
        assert!(device.swapchain_info(old).is_none());
        assert_eq!(device.live_objects_of(ObjectKind::Swapchain), 1);

        let (index, suboptimal) = swapchain.acquire_next_image(semaphore).unwrap();
        assert_eq!(index, 0);
        assert!(!suboptimal);

        swapchain.destroy();
        device.destroy_semaphore(semaphore);
        ctx.destroy();
    }
}
