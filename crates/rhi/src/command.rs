//! Command pool and command buffer management.
//!
//! # Overview
//!
//! - [`CommandPool`] owns a `vk::CommandPool` for one queue family and allocates
//!   primary command buffers from it
//! - [`CommandBuffer`] wraps a `vk::CommandBuffer` with recording methods
//! - [`submit_one_time`] records, submits and waits on a throwaway command
//!   buffer; staged uploads use it through [`copy_buffer`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use minirender_rhi::backend::GpuDevice;
//! use minirender_rhi::command::{CommandBuffer, CommandPool};
//!
//! # fn example(device: Arc<dyn GpuDevice>, family: u32) -> Result<(), minirender_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), family)?;
//! let cmd = CommandBuffer::new(device, &pool)?;
//!
//! cmd.begin()?;
//! // ... record commands ...
//! cmd.end()?;
//!
//! pool.destroy();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::backend::{GpuDevice, RenderPassBegin, SubmitDesc};
use crate::error::{RhiError, RhiResult};

/// Vulkan command pool wrapper.
///
/// Command buffers allocated from the pool can be reset individually. The
/// pool is destroyed explicitly with [`CommandPool::destroy`], which also
/// frees every command buffer allocated from it.
pub struct CommandPool {
    device: Arc<dyn GpuDevice>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a command pool whose buffers can be reset individually.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<dyn GpuDevice>, queue_family_index: u32) -> RhiResult<Self> {
        let pool = device.create_command_pool(
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;

        debug!("Command pool created for queue family {}", queue_family_index);

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    /// Returns the raw Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family index this pool was created for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the device that owns this pool.
    #[inline]
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Allocates a single primary command buffer.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        self.device
            .allocate_command_buffers(self.pool, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("No command buffer allocated".to_string()))
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.device.allocate_command_buffers(self.pool, count)
    }

    /// Returns command buffers to the pool.
    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        self.device.free_command_buffers(self.pool, command_buffers);
    }

    /// Destroys the pool together with all of its command buffers.
    pub fn destroy(self) {
        self.device.destroy_command_pool(self.pool);
        debug!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Vulkan command buffer wrapper.
///
/// The wrapper does not own the handle; it is freed with the pool it came from.
#[derive(Clone)]
pub struct CommandBuffer {
    device: Arc<dyn GpuDevice>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a new primary command buffer from `pool`.
    pub fn new(device: Arc<dyn GpuDevice>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_command_buffer()?;
        Ok(Self { device, buffer })
    }

    /// Wraps an existing command buffer handle.
    #[inline]
    pub fn from_handle(device: Arc<dyn GpuDevice>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    /// Begins recording for a buffer that may be resubmitted.
    pub fn begin_reusable(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::empty())
    }

    /// Ends recording.
    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    /// Resets the buffer to the initial state.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_buffer(self.buffer)
    }

    // =========================================================================
    // Render Pass
    // =========================================================================

    pub fn begin_render_pass(&self, begin: &RenderPassBegin) {
        self.device.cmd_begin_render_pass(self.buffer, begin);
    }

    pub fn end_render_pass(&self) {
        self.device.cmd_end_render_pass(self.buffer);
    }

    // =========================================================================
    // Binding
    // =========================================================================

    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.buffer, pipeline);
    }

    pub fn bind_vertex_buffer(&self, binding: u32, buffer: vk::Buffer) {
        self.device
            .cmd_bind_vertex_buffers(self.buffer, binding, &[buffer], &[0]);
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        self.device
            .cmd_bind_index_buffer(self.buffer, buffer, 0, index_type);
    }

    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.device
            .cmd_bind_descriptor_sets(self.buffer, layout, first_set, sets, dynamic_offsets);
    }

    /// Pushes a plain-old-data value as push constants.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) {
        self.device.cmd_push_constants(
            self.buffer,
            layout,
            stages,
            offset,
            bytemuck::bytes_of(data),
        );
    }

    // =========================================================================
    // Dynamic State
    // =========================================================================

    /// Sets a viewport covering `extent` with depth range 0..1.
    pub fn set_viewport(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.device.cmd_set_viewport(self.buffer, viewport);
    }

    /// Sets a scissor covering `extent`.
    pub fn set_scissor(&self, extent: vk::Extent2D) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        self.device.cmd_set_scissor(self.buffer, scissor);
    }

    // =========================================================================
    // Draw and Transfer
    // =========================================================================

    pub fn draw(&self, vertex_count: u32) {
        self.device.cmd_draw(self.buffer, vertex_count, 1, 0, 0);
    }

    pub fn draw_indexed(&self, index_count: u32) {
        self.device
            .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0);
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.device.cmd_copy_buffer(self.buffer, src, dst, regions);
    }
}

/// Records commands into a temporary command buffer, submits it to `queue`
/// and blocks until the queue is idle.
///
/// The command buffer is freed on every path, including recording failures.
///
/// # Errors
///
/// Returns an error if allocation, recording, submission or the idle wait fails.
pub fn submit_one_time<F>(pool: &CommandPool, queue: vk::Queue, record: F) -> RhiResult<()>
where
    F: FnOnce(&CommandBuffer),
{
    let device = pool.device().clone();
    let cmd = CommandBuffer::new(device.clone(), pool)?;

    let result = (|| {
        cmd.begin()?;
        record(&cmd);
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit = SubmitDesc {
            command_buffers: &command_buffers,
            ..Default::default()
        };
        device.queue_submit(queue, &submit, vk::Fence::null())?;
        device.queue_wait_idle(queue)
    })();

    pool.free_command_buffers(&[cmd.handle()]);
    result
}

/// Copies `size` bytes from the start of `src` to the start of `dst` with a
/// one-time command buffer, waiting for the transfer to finish.
pub fn copy_buffer(
    pool: &CommandPool,
    queue: vk::Queue,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> RhiResult<()> {
    trace!("One-time copy of {} bytes", size);
    submit_one_time(pool, queue, |cmd| {
        cmd.copy_buffer(
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceEvent, HeadlessDevice};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_command_types_are_send_sync() {
        assert_send_sync::<CommandBuffer>();
        assert_send_sync::<CommandPool>();
    }

    #[test]
    fn test_submit_one_time_waits_and_frees() {
        let device = HeadlessDevice::new_default();
        let queue = device.get_queue(0, 0);
        let pool = CommandPool::new(device.clone(), 0).unwrap();

        submit_one_time(&pool, queue, |_| {}).unwrap();

        let events = device.events();
        let submit = events
            .iter()
            .position(|e| matches!(e, DeviceEvent::Submit { fence, .. } if *fence == vk::Fence::null()))
            .expect("one-time submission recorded");
        let wait = events
            .iter()
            .position(|e| matches!(e, DeviceEvent::QueueWaitIdle { .. }))
            .expect("queue idle wait recorded");
        assert!(submit < wait);
        assert_eq!(device.live_command_buffers(), 0);

        pool.destroy();
    }

    #[test]
    fn test_submit_one_time_frees_on_failure() {
        let device = HeadlessDevice::new_default();
        let queue = device.get_queue(0, 0);
        let pool = CommandPool::new(device.clone(), 0).unwrap();

        device.fail_next(crate::headless::FailPoint::QueueSubmit);
        assert!(submit_one_time(&pool, queue, |_| {}).is_err());
        assert_eq!(device.live_command_buffers(), 0);

        pool.destroy();
    }
}
