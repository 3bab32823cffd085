//! Descriptor set management for shader resource binding.
//!
//! This module provides abstractions for descriptor management:
//! - [`DescriptorSetLayout`] defines the layout of shader bindings
//! - [`DescriptorPool`] manages allocation of descriptor sets
//! - [`DescriptorBindingBuilder`] and [`buffer_write`] build bindings and writes
//!
//! # Overview
//!
//! Descriptors connect uniform buffers to shaders:
//! 1. Creating descriptor set layouts
//! 2. Allocating descriptor sets from pools
//! 3. Updating descriptor sets with buffer ranges
//!
//! Descriptor sets are freed with their pool. Layouts and pools are
//! destroyed explicitly; dropping one without `destroy` logs a leak.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use minirender_rhi::backend::GpuDevice;
//! use minirender_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
//! use minirender_rhi::vk;
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> Result<(), minirender_rhi::RhiError> {
//! // Create layout with a uniform buffer binding
//! let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
//! let layout = DescriptorSetLayout::new(device.clone(), &[binding])?;
//!
//! // Create pool
//! let pool_size = vk::DescriptorPoolSize {
//!     ty: vk::DescriptorType::UNIFORM_BUFFER,
//!     descriptor_count: 3,
//! };
//! let pool = DescriptorPool::new(device.clone(), 3, &[pool_size])?;
//!
//! // Allocate descriptor sets
//! let sets = pool.allocate(&[layout.handle(); 3])?;
//!
//! pool.destroy();
//! layout.destroy();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::backend::{DescriptorBinding, DescriptorBufferWrite, GpuDevice};
use crate::error::RhiResult;

/// Descriptor set layout wrapper.
///
/// A descriptor set layout defines the structure of resources that can be
/// bound to a shader. It specifies the binding points, descriptor types,
/// and shader stages that access each binding.
pub struct DescriptorSetLayout {
    device: Arc<dyn GpuDevice>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
    destroyed: bool,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(device: Arc<dyn GpuDevice>, bindings: &[DescriptorBinding]) -> RhiResult<Self> {
        let layout = device.create_descriptor_set_layout(bindings)?;

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            bindings: bindings.to_vec(),
            destroyed: false,
        })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Descriptor pool sizes covering `sets` sets of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        self.bindings
            .iter()
            .map(|binding| vk::DescriptorPoolSize {
                ty: binding.descriptor_type,
                descriptor_count: binding.count * sets,
            })
            .collect()
    }

    pub fn destroy(mut self) {
        self.device.destroy_descriptor_set_layout(self.layout);
        self.destroyed = true;
        debug!("Destroyed descriptor set layout");
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("DescriptorSetLayout dropped without destroy");
        }
    }
}

/// Descriptor pool wrapper.
///
/// A descriptor pool is used to allocate descriptor sets. It has a fixed
/// capacity for each descriptor type and a maximum number of sets; running
/// past either is `ERROR_OUT_OF_POOL_MEMORY`.
pub struct DescriptorPool {
    device: Arc<dyn GpuDevice>,
    pool: vk::DescriptorPool,
    /// Maximum number of sets that can be allocated.
    max_sets: u32,
    destroyed: bool,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `max_sets` - Maximum number of descriptor sets that can be allocated
    /// * `pool_sizes` - Array of pool sizes for each descriptor type
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let pool = device.create_descriptor_pool(max_sets, pool_sizes)?;

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
            destroyed: false,
        })
    }

    /// Allocates one descriptor set per layout.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails (e.g., pool exhausted).
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let sets = self.device.allocate_descriptor_sets(self.pool, layouts)?;
        debug!("Allocated {} descriptor set(s)", sets.len());
        Ok(sets)
    }

    /// Returns the Vulkan descriptor pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Returns the maximum number of sets that can be allocated from this pool.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Destroys the pool, freeing every set allocated from it.
    pub fn destroy(mut self) {
        self.device.destroy_descriptor_pool(self.pool);
        self.destroyed = true;
        debug!("Destroyed descriptor pool");
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("DescriptorPool dropped without destroy");
        }
    }
}

/// Updates descriptor sets with buffer bindings.
pub fn update_descriptor_sets(device: &dyn GpuDevice, writes: &[DescriptorBufferWrite]) {
    if writes.is_empty() {
        return;
    }

    device.update_descriptor_sets(writes);
    debug!("Updated {} descriptor binding(s)", writes.len());
}

/// Creates a write pointing `binding` of `set` at the first `range` bytes of `buffer`.
#[inline]
pub fn buffer_write(
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) -> DescriptorBufferWrite {
    DescriptorBufferWrite {
        set,
        binding,
        descriptor_type,
        buffer,
        offset: 0,
        range,
    }
}

/// Builder for creating descriptor set layout bindings.
///
/// # Example
///
/// ```no_run
/// use minirender_rhi::descriptor::DescriptorBindingBuilder;
/// use minirender_rhi::vk;
///
/// let bindings = [
///     DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
///     DescriptorBindingBuilder::uniform_buffer_dynamic(1, vk::ShaderStageFlags::VERTEX),
/// ];
/// ```
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    /// Creates a uniform buffer binding.
    #[inline]
    pub fn uniform_buffer(binding: u32, stages: vk::ShaderStageFlags) -> DescriptorBinding {
        DescriptorBinding {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages,
        }
    }

    /// Creates a dynamic uniform buffer binding.
    ///
    /// Dynamic uniform buffers take their offset at bind time.
    #[inline]
    pub fn uniform_buffer_dynamic(binding: u32, stages: vk::ShaderStageFlags) -> DescriptorBinding {
        DescriptorBinding {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            count: 1,
            stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_descriptor_binding_builder_uniform_buffer() {
        let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.count, 1);
        assert_eq!(binding.stages, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_descriptor_binding_builder_dynamic_uniform_buffer() {
        let binding =
            DescriptorBindingBuilder::uniform_buffer_dynamic(1, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 1);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
    }

    #[test]
    fn test_pool_sizes_scale_with_sets() {
        let device = HeadlessDevice::new_default();
        let layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
                DescriptorBindingBuilder::uniform_buffer_dynamic(1, vk::ShaderStageFlags::VERTEX),
            ],
        )
        .unwrap();

        let sizes = layout.pool_sizes(3);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(sizes[1].ty, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        assert_eq!(sizes[1].descriptor_count, 3);
        layout.destroy();
    }

    #[test]
    fn test_pool_exhaustion() {
        let device = HeadlessDevice::new_default();
        let layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX,
            )],
        )
        .unwrap();
        let pool = DescriptorPool::new(device.clone(), 2, &layout.pool_sizes(2)).unwrap();
        assert_eq!(pool.max_sets(), 2);

        let sets = pool.allocate(&[layout.handle(); 2]).unwrap();
        assert_eq!(sets.len(), 2);
        assert!(pool.allocate(&[layout.handle()]).is_err());

        pool.destroy();
        layout.destroy();
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_buffer_write() {
        let write = buffer_write(
            vk::DescriptorSet::null(),
            1,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vk::Buffer::null(),
            64,
        );
        assert_eq!(write.offset, 0);
        assert_eq!(write.range, 64);
        assert_eq!(write.binding, 1);
    }
}
