//! Uniform data and descriptor binding.
//!
//! The GPU-visible structures here must match the vertex shader's blocks
//! exactly. They use `#[repr(C)]` for predictable layout and implement `Pod`
//! and `Zeroable` for safe byte casting.
//!
//! [`UniformBinding`] owns everything the shader reads through descriptors:
//!
//! - one descriptor set layout (binding 0 view-projection, binding 1 dynamic
//!   model matrices when transforms travel by dynamic uniform)
//! - one host-visible view-projection buffer per swapchain image
//! - one host-visible dynamic model buffer per swapchain image, if enabled
//! - a descriptor pool sized to exactly the swapchain image count
//! - one descriptor set per swapchain image
//!
//! # Memory Layout
//!
//! ```text
//! UboViewProjection            dynamic model buffer (per image)
//! +--------------------+ 0     +-----------+ 0
//! | projection (64 B)  |       | model 0   |
//! +--------------------+ 64    +-----------+ alignment
//! | view (64 B)        |       | model 1   |
//! +--------------------+ 128   +-----------+ 2 * alignment
//!                              | ...       |
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::{debug, info, trace};

use minirender_rhi::backend::GpuDevice;
use minirender_rhi::buffer::{BufferUsage, GpuBuffer};
use minirender_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, buffer_write,
    update_descriptor_sets,
};
use minirender_rhi::memory::MemoryLocation;
use minirender_rhi::pipeline::{MODEL_MATRIX_SIZE, TransformDelivery};
use minirender_rhi::{RhiError, RhiResult};

/// View and projection matrices, written once per frame.
///
/// # Memory Layout
///
/// - Offset 0: projection matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UboViewProjection {
    /// Projection matrix (view to clip space).
    pub projection: Mat4,
    /// View matrix (world to view space).
    pub view: Mat4,
}

impl UboViewProjection {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self { projection, view }
    }
}

/// Per-object model matrix pushed before each draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelPush {
    pub model: Mat4,
}

impl ModelPush {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Stride between model matrices in a dynamic uniform buffer.
///
/// Rounds the matrix size up to `min_alignment`, which Vulkan guarantees to
/// be a power of two. Zero is treated as 1.
#[inline]
pub fn dynamic_alignment(min_alignment: vk::DeviceSize) -> vk::DeviceSize {
    let align = min_alignment.max(1);
    (MODEL_MATRIX_SIZE as vk::DeviceSize + align - 1) & !(align - 1)
}

/// Buffers, pool and sets that exist once per swapchain image.
struct ImageUniforms {
    view_projection: Vec<GpuBuffer>,
    models: Vec<GpuBuffer>,
    pool: DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

/// Descriptor set layout, uniform buffers and descriptor sets.
pub struct UniformBinding {
    device: Arc<dyn GpuDevice>,
    delivery: TransformDelivery,
    /// Stride of the dynamic model buffer; 0 with push constants.
    alignment: vk::DeviceSize,
    set_layout: DescriptorSetLayout,
    images: ImageUniforms,
}

impl UniformBinding {
    /// Creates the layout and the per-image uniforms for `image_count` images.
    ///
    /// # Errors
    ///
    /// Returns an error if any buffer, the pool or the sets cannot be
    /// created. Everything created before the failure is destroyed.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        min_uniform_alignment: vk::DeviceSize,
        delivery: TransformDelivery,
        image_count: u32,
    ) -> RhiResult<Self> {
        if let TransformDelivery::DynamicUniform { max_objects: 0 } = delivery {
            return Err(RhiError::InvalidUsage(
                "Dynamic uniform transforms need room for at least one object".to_string(),
            ));
        }

        let mut bindings = vec![DescriptorBindingBuilder::uniform_buffer(
            0,
            vk::ShaderStageFlags::VERTEX,
        )];
        if delivery.is_dynamic_uniform() {
            bindings.push(DescriptorBindingBuilder::uniform_buffer_dynamic(
                1,
                vk::ShaderStageFlags::VERTEX,
            ));
        }
        let set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;

        let alignment = if delivery.is_dynamic_uniform() {
            dynamic_alignment(min_uniform_alignment)
        } else {
            0
        };

        let images = match ImageUniforms::new(
            &device,
            memory_properties,
            &set_layout,
            delivery,
            alignment,
            image_count,
        ) {
            Ok(images) => images,
            Err(e) => {
                set_layout.destroy();
                return Err(e);
            }
        };

        info!(
            "Uniform binding created for {} image(s), transforms via {:?}",
            image_count, delivery
        );

        Ok(Self {
            device,
            delivery,
            alignment,
            set_layout,
            images,
        })
    }

    #[inline]
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout.handle()
    }

    #[inline]
    pub fn delivery(&self) -> TransformDelivery {
        self.delivery
    }

    /// Number of swapchain images the uniforms are sized for.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.sets.len() as u32
    }

    /// Stride of the dynamic model buffer, if transforms use it.
    pub fn dynamic_alignment(&self) -> Option<vk::DeviceSize> {
        self.delivery
            .is_dynamic_uniform()
            .then_some(self.alignment)
    }

    /// Capacity of the dynamic model buffer, if transforms use it.
    pub fn max_objects(&self) -> Option<u32> {
        match self.delivery {
            TransformDelivery::DynamicUniform { max_objects } => Some(max_objects),
            TransformDelivery::PushConstants => None,
        }
    }

    pub fn descriptor_set(&self, image_index: u32) -> RhiResult<vk::DescriptorSet> {
        self.images
            .sets
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| image_out_of_range(image_index))
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.images.pool.handle()
    }

    pub fn view_projection_buffer(&self, image_index: u32) -> Option<vk::Buffer> {
        self.images
            .view_projection
            .get(image_index as usize)
            .map(GpuBuffer::handle)
    }

    pub fn model_buffer(&self, image_index: u32) -> Option<vk::Buffer> {
        self.images
            .models
            .get(image_index as usize)
            .map(GpuBuffer::handle)
    }

    /// Dynamic offset selecting the model matrix of `object_index`.
    #[inline]
    pub fn dynamic_offset(&self, object_index: usize) -> u32 {
        (object_index as vk::DeviceSize * self.alignment) as u32
    }

    /// Writes the view-projection matrices into the buffer of `image_index`.
    pub fn update_view_projection(
        &self,
        image_index: u32,
        ubo: &UboViewProjection,
    ) -> RhiResult<()> {
        let buffer = self
            .images
            .view_projection
            .get(image_index as usize)
            .ok_or_else(|| image_out_of_range(image_index))?;
        buffer.write(self.device.as_ref(), 0, bytemuck::bytes_of(ubo))?;
        trace!("Updated view-projection for image {}", image_index);
        Ok(())
    }

    /// Writes one model matrix into the dynamic buffer of `image_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidUsage`] when transforms travel by push
    /// constants, and a bounds error past `max_objects`.
    pub fn update_model(&self, image_index: u32, object_index: usize, model: &Mat4) -> RhiResult<()> {
        if !self.delivery.is_dynamic_uniform() {
            return Err(RhiError::InvalidUsage(
                "Model matrices are pushed, not stored in a uniform buffer".to_string(),
            ));
        }
        let buffer = self
            .images
            .models
            .get(image_index as usize)
            .ok_or_else(|| image_out_of_range(image_index))?;
        let offset = object_index as vk::DeviceSize * self.alignment;
        buffer.write(self.device.as_ref(), offset, bytemuck::bytes_of(model))
    }

    /// Rebuilds the per-image buffers, pool and sets for a new image count.
    ///
    /// The layout is kept. The new uniforms are created before the old ones
    /// are destroyed, so on failure the binding is left as it was. The GPU
    /// must be idle.
    pub fn rebuild(
        &mut self,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        image_count: u32,
    ) -> RhiResult<()> {
        let images = ImageUniforms::new(
            &self.device,
            memory_properties,
            &self.set_layout,
            self.delivery,
            self.alignment,
            image_count,
        )?;
        let old = std::mem::replace(&mut self.images, images);
        old.pool.destroy();
        release_all(self.device.as_ref(), old.view_projection);
        release_all(self.device.as_ref(), old.models);

        info!("Uniform binding rebuilt for {} image(s)", image_count);
        Ok(())
    }

    /// Destroys the pool, the layout, then the uniform buffers.
    pub fn destroy(self) {
        let Self {
            device,
            set_layout,
            images,
            ..
        } = self;
        images.pool.destroy();
        set_layout.destroy();
        release_all(device.as_ref(), images.view_projection);
        release_all(device.as_ref(), images.models);
        debug!("Uniform binding destroyed");
    }
}

impl ImageUniforms {
    fn new(
        device: &Arc<dyn GpuDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        set_layout: &DescriptorSetLayout,
        delivery: TransformDelivery,
        alignment: vk::DeviceSize,
        image_count: u32,
    ) -> RhiResult<Self> {
        let device_ref = device.as_ref();

        let view_projection = allocate_uniforms(
            device_ref,
            memory_properties,
            UboViewProjection::SIZE as vk::DeviceSize,
            image_count,
        )?;

        let models = match delivery {
            TransformDelivery::DynamicUniform { max_objects } => {
                match allocate_uniforms(
                    device_ref,
                    memory_properties,
                    alignment * max_objects as vk::DeviceSize,
                    image_count,
                ) {
                    Ok(models) => models,
                    Err(e) => {
                        release_all(device_ref, view_projection);
                        return Err(e);
                    }
                }
            }
            TransformDelivery::PushConstants => Vec::new(),
        };

        let pool = match DescriptorPool::new(
            device.clone(),
            image_count,
            &set_layout.pool_sizes(image_count),
        ) {
            Ok(pool) => pool,
            Err(e) => {
                release_all(device_ref, view_projection);
                release_all(device_ref, models);
                return Err(e);
            }
        };

        let layouts = vec![set_layout.handle(); image_count as usize];
        let sets = match pool.allocate(&layouts) {
            Ok(sets) => sets,
            Err(e) => {
                pool.destroy();
                release_all(device_ref, view_projection);
                release_all(device_ref, models);
                return Err(e);
            }
        };

        let mut writes = Vec::with_capacity(sets.len() * 2);
        for (i, set) in sets.iter().enumerate() {
            writes.push(buffer_write(
                *set,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                view_projection[i].handle(),
                UboViewProjection::SIZE as vk::DeviceSize,
            ));
            if let Some(model) = models.get(i) {
                writes.push(buffer_write(
                    *set,
                    1,
                    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    model.handle(),
                    MODEL_MATRIX_SIZE as vk::DeviceSize,
                ));
            }
        }
        update_descriptor_sets(device_ref, &writes);

        Ok(Self {
            view_projection,
            models,
            pool,
            sets,
        })
    }
}

/// Allocates `count` host-visible uniform buffers of `size` bytes.
fn allocate_uniforms(
    device: &dyn GpuDevice,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    count: u32,
) -> RhiResult<Vec<GpuBuffer>> {
    let mut buffers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match GpuBuffer::allocate(
            device,
            memory_properties,
            size,
            BufferUsage::Uniform.to_vk_usage(),
            MemoryLocation::HostVisible,
        ) {
            Ok(buffer) => buffers.push(buffer),
            Err(e) => {
                release_all(device, buffers);
                return Err(e);
            }
        }
    }
    debug!("Allocated {} uniform buffer(s) of {} bytes", count, size);
    Ok(buffers)
}

fn release_all(device: &dyn GpuDevice, buffers: Vec<GpuBuffer>) {
    for buffer in buffers {
        buffer.release(device);
    }
}

fn image_out_of_range(image_index: u32) -> RhiError {
    RhiError::InvalidUsage(format!("No uniforms for swapchain image {}", image_index))
}
