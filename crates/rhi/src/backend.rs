//! Backend traits over the explicit GPU API.
//!
//! Everything above this module talks to the GPU through two object-safe traits:
//!
//! - [`GpuInstance`] - instance and physical-device queries, logical device creation
//! - [`GpuDevice`] - logical-device operations: resources, commands, queues, sync
//!
//! Both traits speak `ash::vk` vocabulary (handles, flags, formats and plain
//! capability structs) so the [`vulkan`](crate::vulkan) backend maps them
//! one-to-one onto Vulkan calls while the [`headless`](crate::headless) backend
//! simulates them in memory.
//!
//! Create infos that carry pointers in Vulkan are replaced with the borrowed
//! descriptor structs defined here.
//!
//! # Destruction
//!
//! No handle returned by a backend is destroyed automatically. Owners call the
//! matching `destroy_*` method explicitly and in dependency order; the device
//! itself is torn down by [`GpuDevice::destroy`] and the instance by
//! [`GpuInstance::destroy`].

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;

use crate::error::RhiResult;

/// Parameters for [`GpuInstance::create_device`].
#[derive(Clone, Copy, Debug)]
pub struct DeviceCreateDesc<'a> {
    pub physical_device: vk::PhysicalDevice,
    /// Unique queue family indices; one queue is created per family.
    pub queue_families: &'a [u32],
    pub extensions: &'a [&'a CStr],
    pub enable_validation: bool,
}

/// Parameters for [`GpuDevice::create_buffer`].
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

/// Parameters for [`GpuDevice::create_image`]. Images are 2D, single mip, single layer.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

/// Parameters for [`GpuDevice::create_image_view`]. Views cover mip 0 and layer 0.
#[derive(Clone, Copy, Debug)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
}

/// Parameters for [`GpuDevice::create_swapchain`].
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc<'a> {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub image_usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    /// Families sharing the images; only read for `CONCURRENT` sharing.
    pub queue_family_indices: &'a [u32],
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub clipped: bool,
    pub old_swapchain: vk::SwapchainKHR,
}

/// A single-subpass render pass.
#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub color_attachment: vk::AttachmentReference,
    pub depth_attachment: Option<vk::AttachmentReference>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Parameters for [`GpuDevice::create_framebuffer`].
#[derive(Clone, Copy, Debug)]
pub struct FramebufferDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub attachments: &'a [vk::ImageView],
    pub extent: vk::Extent2D,
}

/// Fixed-function and programmable state of a graphics pipeline.
///
/// Rasterizer settings not listed here are fixed: no depth clamp, no
/// rasterizer discard, no depth bias, one viewport and one scissor.
#[derive(Clone, Copy, Debug)]
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub entry_point: &'a CStr,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub samples: vk::SampleCountFlags,
    pub color_blend: vk::PipelineColorBlendAttachmentState,
    /// Depth comparison; `None` disables depth test and writes.
    pub depth_compare: Option<vk::CompareOp>,
    pub dynamic_states: &'a [vk::DynamicState],
    /// Static viewport extent, ignored for dynamic viewport/scissor.
    pub extent: vk::Extent2D,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

/// One binding of a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Points a buffer descriptor at a buffer range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBufferWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

/// Parameters for [`GpuDevice::cmd_begin_render_pass`].
#[derive(Clone, Copy, Debug)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    /// Clear value for the depth attachment, when the pass has one.
    pub clear_depth: Option<f32>,
}

/// One batch for [`GpuDevice::queue_submit`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitDesc<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Parameters for [`GpuDevice::queue_present`].
#[derive(Clone, Copy, Debug)]
pub struct PresentDesc<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
}

/// Instance-level backend: physical device and surface queries.
pub trait GpuInstance: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Physical devices in enumeration order.
    fn enumerate_physical_devices(&self) -> RhiResult<Vec<vk::PhysicalDevice>>;

    fn physical_device_properties(&self, physical_device: vk::PhysicalDevice)
    -> vk::PhysicalDeviceProperties;

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties>;

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties;

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties;

    /// Names of the device-level extensions the physical device supports.
    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> RhiResult<Vec<String>>;

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<bool>;

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<vk::SurfaceCapabilitiesKHR>;

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Vec<vk::SurfaceFormatKHR>>;

    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Vec<vk::PresentModeKHR>>;

    fn create_device(&self, desc: &DeviceCreateDesc<'_>) -> RhiResult<Arc<dyn GpuDevice>>;

    fn destroy_surface(&self, surface: vk::SurfaceKHR);

    /// Destroys the instance. Every device and surface must already be gone.
    fn destroy(&self);
}

/// Logical-device backend.
///
/// Command recording methods (`cmd_*`) take the command buffer being recorded
/// and cannot fail; errors surface from [`GpuDevice::end_command_buffer`] or
/// submission, as in Vulkan.
pub trait GpuDevice: Send + Sync {
    fn get_queue(&self, queue_family: u32, index: u32) -> vk::Queue;

    // Buffers and memory

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> RhiResult<vk::DeviceMemory>;
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> RhiResult<()>;
    /// Maps `memory`, copies `data` at `offset` and unmaps.
    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()>;
    /// Maps `memory`, copies `len` bytes out from `offset` and unmaps.
    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    ) -> RhiResult<Vec<u8>>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn free_memory(&self, memory: vk::DeviceMemory);

    // Images

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> RhiResult<()>;
    fn create_image_view(&self, desc: &ImageViewDesc) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_image(&self, image: vk::Image);

    // Swapchain

    fn create_swapchain(&self, desc: &SwapchainDesc<'_>) -> RhiResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;
    /// Returns the acquired image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> RhiResult<(u32, bool)>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    // Render passes, framebuffers and pipelines

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>)
    -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Descriptors

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>>;
    fn update_descriptor_sets(&self, writes: &[DescriptorBufferWrite]);

    // Command pools and recording

    fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool>;
    /// Destroys the pool and frees every command buffer allocated from it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    // Synchronization and queues

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool>;
    fn queue_submit(
        &self,
        queue: vk::Queue,
        submit: &SubmitDesc<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()>;
    /// Returns whether the swapchain is suboptimal for the surface.
    fn queue_present(&self, queue: vk::Queue, present: &PresentDesc<'_>) -> RhiResult<bool>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> RhiResult<()>;
    fn wait_idle(&self) -> RhiResult<()>;

    /// Destroys the logical device. Every child object must already be gone.
    fn destroy(&self);
}
