//! In-memory software backend.
//!
//! The headless backend implements [`GpuInstance`](crate::backend::GpuInstance)
//! and [`GpuDevice`](crate::backend::GpuDevice) without a GPU. It exists so the
//! whole engine (device selection, uploads, the frame loop, teardown) can run
//! and be inspected in tests and in `minirender --headless`.
//!
//! # What is simulated
//!
//! - Physical devices are described by [`HeadlessAdapter`]s: queue families,
//!   presentation support, extensions, memory types, surface formats, present
//!   modes and capabilities.
//! - Device memory is a byte vector per allocation. Host-visible memory can be
//!   mapped; device-local memory can only be filled by recorded copies.
//! - Command buffers record commands. Submission executes them immediately:
//!   copies move bytes, draws are validated against the bound state and logged.
//!   Every submission completes before `queue_submit` returns, so fences and
//!   semaphores are signalled right away.
//! - Swapchains hand out images round-robin and report `ERROR_OUT_OF_DATE_KHR`
//!   once the surface extent no longer matches.
//!
//! Misuse that a real driver would turn into a hang or undefined behaviour
//! (submitting with a signalled fence, waiting on a fence with nothing pending,
//! waiting on an unsignalled semaphore, reading device-local memory through a
//! mapping) is reported as [`RhiError::InvalidUsage`](crate::RhiError::InvalidUsage).
//!
//! # Inspection
//!
//! Every lifecycle and queue operation is appended to a shared [`DeviceEvent`]
//! log; instance and devices write to the same log so teardown ordering can be
//! checked across both. [`FailPoint`]s make the next matching operation fail.

mod device;
mod instance;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;

pub use device::{BufferInfo, HeadlessDevice, PipelineInfo, SwapchainInfo};
pub use instance::HeadlessInstance;

use crate::backend::RenderPassBegin;

/// Kinds of objects tracked by the headless backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Buffer,
    Memory,
    Image,
    ImageView,
    Swapchain,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
    CommandPool,
    Semaphore,
    Fence,
    Surface,
}

/// Operations that can be made to fail once with [`HeadlessDevice::fail_next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateBuffer,
    AllocateMemory,
    BindBufferMemory,
    CreateImage,
    BindImageMemory,
    CreateImageView,
    CreateGraphicsPipeline,
    QueueSubmit,
    /// Acquire returns `ERROR_OUT_OF_DATE_KHR`.
    AcquireOutOfDate,
    /// Present returns `ERROR_OUT_OF_DATE_KHR`.
    PresentOutOfDate,
    /// Present succeeds but reports a suboptimal swapchain.
    PresentSuboptimal,
}

/// A draw call as executed at submission time.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: Option<vk::Buffer>,
    /// Vertex count for `cmd_draw`, index count for `cmd_draw_indexed`.
    pub element_count: u32,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    pub dynamic_offsets: Vec<u32>,
    /// Push constant bytes visible to the draw, if any were pushed.
    pub push_constants: Option<Vec<u8>>,
}

/// Entry in the shared headless event log.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    Created {
        kind: ObjectKind,
        handle: u64,
    },
    Destroyed {
        kind: ObjectKind,
        handle: u64,
    },
    DeviceCreated {
        validation: bool,
    },
    DeviceDestroyed,
    InstanceDestroyed,
    MemoryWrite {
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    },
    Acquire {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        semaphore: vk::Semaphore,
    },
    FenceWait {
        fence: vk::Fence,
    },
    FenceReset {
        fence: vk::Fence,
    },
    Submit {
        queue: vk::Queue,
        command_buffers: Vec<vk::CommandBuffer>,
        wait_semaphores: Vec<vk::Semaphore>,
        wait_stages: Vec<vk::PipelineStageFlags>,
        signal_semaphores: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    CopyExecuted {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    RenderPassExecuted {
        begin: RenderPassBeginRecord,
    },
    DrawExecuted(DrawRecord),
    Present {
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: Vec<vk::Semaphore>,
    },
    QueueWaitIdle {
        queue: vk::Queue,
    },
    DeviceWaitIdle,
}

/// Comparable copy of a [`RenderPassBegin`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderPassBeginRecord {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub clear_depth: Option<f32>,
}

impl From<&RenderPassBegin> for RenderPassBeginRecord {
    fn from(begin: &RenderPassBegin) -> Self {
        Self {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            extent: begin.extent,
            clear_color: begin.clear_color,
            clear_depth: begin.clear_depth,
        }
    }
}

/// Description of one simulated physical device.
#[derive(Clone, Debug)]
pub struct HeadlessAdapter {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Queue families that can present to any surface.
    pub present_families: Vec<u32>,
    pub extensions: Vec<String>,
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub min_image_count: u32,
    /// Zero means no upper bound.
    pub max_image_count: u32,
    /// Report `u32::MAX` as the current extent, letting the swapchain pick.
    pub variable_extent: bool,
    pub min_extent: vk::Extent2D,
    pub max_extent: vk::Extent2D,
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    /// Formats usable as optimally tiled depth attachments.
    pub depth_formats: Vec<vk::Format>,
    /// Surface support, format and present-mode queries fail with
    /// `ERROR_SURFACE_LOST_KHR`.
    pub surface_queries_fail: bool,
}

impl Default for HeadlessAdapter {
    fn default() -> Self {
        Self {
            name: "Headless Adapter".to_string(),
            device_type: vk::PhysicalDeviceType::VIRTUAL_GPU,
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            present_families: vec![0],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT
                    | vk::MemoryPropertyFlags::HOST_CACHED,
            ],
            surface_formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            min_image_count: 2,
            max_image_count: 8,
            variable_extent: false,
            min_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_uniform_buffer_offset_alignment: 256,
            depth_formats: vec![
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            surface_queries_fail: false,
        }
    }
}

impl HeadlessAdapter {
    /// Adapter with separate graphics-only and present-only queue families.
    pub fn split_queues() -> Self {
        Self {
            name: "Headless Split-Queue Adapter".to_string(),
            queue_families: vec![
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                    queue_count: 1,
                    ..Default::default()
                },
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::TRANSFER,
                    queue_count: 1,
                    ..Default::default()
                },
            ],
            present_families: vec![1],
            ..Default::default()
        }
    }

    /// Bitmask of memory types buffers may be bound to.
    pub(crate) fn buffer_type_bits(&self) -> u32 {
        mask_where(&self.memory_types, |_| true)
    }

    /// Bitmask of memory types images may be bound to.
    pub(crate) fn image_type_bits(&self) -> u32 {
        mask_where(&self.memory_types, |flags| {
            flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        })
    }
}

fn mask_where(
    types: &[vk::MemoryPropertyFlags],
    pred: impl Fn(vk::MemoryPropertyFlags) -> bool,
) -> u32 {
    types
        .iter()
        .take(32)
        .enumerate()
        .filter(|(_, flags)| pred(**flags))
        .fold(0, |mask, (index, _)| mask | (1 << index))
}

/// Event log and handle counter shared by an instance and its devices.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    events: Mutex<Vec<DeviceEvent>>,
    next_handle: Mutex<u64>,
    /// Current extent of every live surface, by raw handle.
    surfaces: Mutex<std::collections::HashMap<u64, vk::Extent2D>>,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_handle: Mutex::new(0x1000),
            ..Default::default()
        })
    }

    pub(crate) fn next_handle(&self) -> u64 {
        let mut next = lock(&self.next_handle);
        *next += 1;
        *next
    }

    pub(crate) fn push(&self, event: DeviceEvent) {
        lock(&self.events).push(event);
    }

    pub(crate) fn events(&self) -> Vec<DeviceEvent> {
        lock(&self.events).clone()
    }

    pub(crate) fn clear_events(&self) {
        lock(&self.events).clear();
    }

    pub(crate) fn surfaces(&self) -> MutexGuard<'_, std::collections::HashMap<u64, vk::Extent2D>> {
        lock(&self.surfaces)
    }
}

/// Locks a mutex, recovering the data if a panicking test poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_adapter_type_bits() {
        let adapter = HeadlessAdapter::default();
        assert_eq!(adapter.buffer_type_bits(), 0b111);
        assert_eq!(adapter.image_type_bits(), 0b001);
    }

    #[test]
    fn test_handles_are_unique() {
        let shared = Shared::new();
        let a = shared.next_handle();
        let b = shared.next_handle();
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }
}
