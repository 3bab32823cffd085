//! GPU buffer management.
//!
//! This module handles vertex, index, uniform and staging buffers. Each
//! [`GpuBuffer`] owns exactly one `vk::DeviceMemory` allocation whose type is
//! picked with [`find_memory_type`].
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer will be used (vertex, index, uniform, staging)
//! - [`GpuBuffer`] pairs a `vk::Buffer` with its memory
//! - [`GpuBuffer::host_visible_with_data`] and [`GpuBuffer::device_local_with_data`]
//!   are the two upload paths
//!
//! # Lifetime
//!
//! Buffers are released explicitly with [`GpuBuffer::release`], after the GPU
//! has stopped using them. Dropping an unreleased buffer only logs a leak.
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::backend::GpuDevice;
//! use minirender_rhi::buffer::{BufferUsage, GpuBuffer};
//! use minirender_rhi::vk;
//!
//! # fn example(device: &dyn GpuDevice, props: &vk::PhysicalDeviceMemoryProperties) -> Result<(), minirender_rhi::RhiError> {
//! let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let vertex_buffer = GpuBuffer::host_visible_with_data(
//!     device,
//!     props,
//!     BufferUsage::Vertex,
//!     bytemuck::cast_slice(&vertices),
//! )?;
//! vertex_buffer.release(device);
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, trace, warn};

use crate::backend::{BufferDesc, GpuDevice};
use crate::command::{self, CommandPool};
use crate::error::{RhiError, RhiResult};
use crate::memory::{MemoryLocation, find_memory_type};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which selects its Vulkan usage flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Uniform buffer - stores shader uniform data
    Uniform,
    /// Staging buffer - CPU-writable source for uploads
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    ///
    /// Vertex and index buffers are also transfer destinations so they can be
    /// filled from a staging buffer.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// A buffer and the device memory bound to it.
pub struct GpuBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    /// Requested size in bytes, not the (possibly larger) allocation size.
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    released: bool,
}

impl GpuBuffer {
    /// Creates a buffer, allocates memory for it and binds the two.
    ///
    /// The four steps are atomic: if any of them fails, everything acquired
    /// so far is destroyed in reverse order before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails, if no memory type matches
    /// `location`, or if allocation or binding fails.
    pub fn allocate(
        device: &dyn GpuDevice,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidUsage(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer = device.create_buffer(&BufferDesc { size, usage })?;
        let requirements = device.buffer_memory_requirements(buffer);

        let memory_type = match find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            location.property_flags(),
        ) {
            Ok(index) => index,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };

        let memory = match device.allocate_memory(requirements.size, memory_type) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };

        if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
            device.free_memory(memory);
            device.destroy_buffer(buffer);
            return Err(e);
        }

        debug!(
            "Allocated buffer: {} bytes, usage {:?}, memory type {}",
            size, usage, memory_type
        );

        Ok(Self {
            buffer,
            memory,
            size,
            usage,
            location,
            released: false,
        })
    }

    /// Creates a host-visible buffer and writes `data` into it directly.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or the mapped write fails.
    pub fn host_visible_with_data(
        device: &dyn GpuDevice,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::allocate(
            device,
            memory_properties,
            data.len() as vk::DeviceSize,
            usage.to_vk_usage(),
            MemoryLocation::HostVisible,
        )?;

        if let Err(e) = buffer.write(device, 0, data) {
            buffer.release(device);
            return Err(e);
        }

        debug!("Created host-visible {} buffer: {} bytes", usage.name(), data.len());
        Ok(buffer)
    }

    /// Creates a device-local buffer and fills it through a staging buffer.
    ///
    /// The staging buffer is host-visible, exactly `data.len()` bytes, and is
    /// copied with a one-time command buffer from `pool` submitted to `queue`.
    /// The call blocks until the queue is idle. The staging buffer is released
    /// on every path.
    ///
    /// # Errors
    ///
    /// Returns an error if any allocation, the mapped write, or the copy fails.
    pub fn device_local_with_data(
        device: &dyn GpuDevice,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        pool: &CommandPool,
        queue: vk::Queue,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let size = data.len() as vk::DeviceSize;
        let staging = Self::host_visible_with_data(
            device,
            memory_properties,
            BufferUsage::Staging,
            data,
        )?;

        let result = Self::allocate(
            device,
            memory_properties,
            size,
            usage.to_vk_usage(),
            MemoryLocation::DeviceLocal,
        )
        .and_then(|target| {
            match command::copy_buffer(pool, queue, staging.handle(), target.handle(), size) {
                Ok(()) => Ok(target),
                Err(e) => {
                    target.release(device);
                    Err(e)
                }
            }
        });

        staging.release(device);

        if result.is_ok() {
            debug!("Uploaded {} buffer via staging: {} bytes", usage.name(), size);
        }
        result
    }

    /// Copies `data` into host-visible memory at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is device-local or the write would run
    /// past the end of the buffer.
    pub fn write(&self, device: &dyn GpuDevice, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_mapped_range(offset, data.len())?;
        device.write_memory(self.memory, offset, data)?;
        trace!("Wrote {} bytes at offset {}", data.len(), offset);
        Ok(())
    }

    /// Reads `len` bytes of host-visible memory from `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is device-local or the range runs past
    /// the end of the buffer.
    pub fn read(&self, device: &dyn GpuDevice, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        self.check_mapped_range(offset, len)?;
        device.read_memory(self.memory, offset, len)
    }

    fn check_mapped_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
        if self.location != MemoryLocation::HostVisible {
            return Err(RhiError::InvalidUsage(
                "Buffer memory is not host-visible".to_string(),
            ));
        }
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidUsage(format!(
                "Access exceeds buffer size: offset {} + len {} > buffer {}",
                offset, len, self.size
            )));
        }
        Ok(())
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the backing memory handle.
    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Destroys the buffer, then frees its memory.
    ///
    /// The GPU must no longer use the buffer.
    pub fn release(mut self, device: &dyn GpuDevice) {
        device.destroy_buffer(self.buffer);
        device.free_memory(self.memory);
        self.released = true;
        trace!("Released buffer of {} bytes", self.size);
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "GpuBuffer of {} bytes dropped without release; its memory is leaked",
                self.size
            );
        }
    }
}
