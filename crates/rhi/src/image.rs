//! GPU image management.
//!
//! [`GpuImage`] pairs a 2D `vk::Image` with its own device memory, the image
//! counterpart of [`GpuBuffer`](crate::buffer::GpuBuffer). Views are created
//! separately with [`create_view`].

use ash::vk;
use tracing::{debug, warn};

use crate::backend::{GpuDevice, ImageDesc, ImageViewDesc};
use crate::error::RhiResult;
use crate::memory::{MemoryLocation, find_memory_type};

/// An image and the device memory bound to it.
pub struct GpuImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    format: vk::Format,
    released: bool,
}

impl GpuImage {
    /// Creates an image, allocates memory for it and binds the two.
    ///
    /// Like [`GpuBuffer::allocate`](crate::buffer::GpuBuffer::allocate) this is
    /// atomic: a failure at any step destroys what was already acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if creation, memory type selection, allocation or
    /// binding fails.
    pub fn allocate(
        device: &dyn GpuDevice,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        desc: &ImageDesc,
        location: MemoryLocation,
    ) -> RhiResult<Self> {
        let image = device.create_image(desc)?;
        let requirements = device.image_memory_requirements(image);

        let memory_type = match find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            location.property_flags(),
        ) {
            Ok(index) => index,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };

        let memory = match device.allocate_memory(requirements.size, memory_type) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };

        if let Err(e) = device.bind_image_memory(image, memory, 0) {
            device.free_memory(memory);
            device.destroy_image(image);
            return Err(e);
        }

        debug!(
            "Allocated image: {}x{} {:?}",
            desc.extent.width, desc.extent.height, desc.format
        );

        Ok(Self {
            image,
            memory,
            extent: desc.extent,
            format: desc.format,
            released: false,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Destroys the image, then frees its memory. Views must be destroyed first.
    pub fn release(mut self, device: &dyn GpuDevice) {
        device.destroy_image(self.image);
        device.free_memory(self.memory);
        self.released = true;
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "GpuImage {}x{} dropped without release; its memory is leaked",
                self.extent.width, self.extent.height
            );
        }
    }
}

/// Creates a 2D view of mip 0, layer 0 of `image`.
pub fn create_view(
    device: &dyn GpuDevice,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> RhiResult<vk::ImageView> {
    device.create_image_view(&ImageViewDesc {
        image,
        format,
        aspect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{FailPoint, HeadlessAdapter, HeadlessDevice};
    use crate::memory::memory_properties_from_flags;

    fn depth_desc() -> ImageDesc {
        ImageDesc {
            extent: vk::Extent2D {
                width: 64,
                height: 32,
            },
            format: vk::Format::D32_SFLOAT,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        }
    }

    #[test]
    fn test_image_allocate_and_view() {
        let device = HeadlessDevice::new_default();
        let props = memory_properties_from_flags(&HeadlessAdapter::default().memory_types);
        let image =
            GpuImage::allocate(&*device, &props, &depth_desc(), MemoryLocation::DeviceLocal)
                .unwrap();
        assert_eq!(image.extent().width, 64);

        let view = create_view(
            &*device,
            image.handle(),
            image.format(),
            vk::ImageAspectFlags::DEPTH,
        )
        .unwrap();
        device.destroy_image_view(view);
        image.release(&*device);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_image_allocate_is_atomic() {
        let props = memory_properties_from_flags(&HeadlessAdapter::default().memory_types);
        for point in [FailPoint::CreateImage, FailPoint::AllocateMemory, FailPoint::BindImageMemory] {
            let device = HeadlessDevice::new_default();
            device.fail_next(point);
            assert!(
                GpuImage::allocate(&*device, &props, &depth_desc(), MemoryLocation::DeviceLocal)
                    .is_err()
            );
            assert_eq!(device.live_objects(), 0, "{:?} leaked", point);
        }
    }

    #[test]
    fn test_image_requires_device_local_type() {
        let device = HeadlessDevice::new_default();
        let props = memory_properties_from_flags(&HeadlessAdapter::default().memory_types);
        // Images only accept device-local memory on the headless adapter.
        assert!(
            GpuImage::allocate(&*device, &props, &depth_desc(), MemoryLocation::HostVisible)
                .is_err()
        );
        assert_eq!(device.live_objects(), 0);
    }
}
