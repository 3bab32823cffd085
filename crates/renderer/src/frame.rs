//! Frame slots and synchronization.
//!
//! This module provides the [`FrameManager`] for managing per-frame resources
//! and coordinating the rendering loop. It handles:
//!
//! - Per-slot command buffers
//! - Synchronization primitives (semaphores and fences)
//! - Swapchain image acquisition, submission and presentation
//! - Tracking which slot's submission still uses each swapchain image
//!
//! # Overview
//!
//! The frame manager implements a "frames in flight" pattern with
//! [`MAX_FRAME_DRAWS`] slots. Each slot moves through
//! Idle (fence signalled) → Acquiring → Recording → Submitted → Idle:
//!
//! ```text
//! 1. Acquire swapchain image (signals image_available[i])
//! 2. Wait for draw_fence[i], then reset it
//! 3. Reset and record command_buffer[i]
//! 4. Submit:
//!    - Wait on image_available[i] at COLOR_ATTACHMENT_OUTPUT
//!    - Signal render_finished[i]
//!    - Signal draw_fence[i]
//! 5. Present (waits on render_finished[i])
//! 6. i = (i + 1) % MAX_FRAME_DRAWS
//! ```
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::device::DeviceContext;
//! use minirender_rhi::swapchain::Swapchain;
//! use minirender_renderer::frame::FrameManager;
//!
//! # fn example(ctx: &DeviceContext, swapchain: &Swapchain) -> Result<(), minirender_rhi::RhiError> {
//! let mut frames = FrameManager::new(
//!     ctx.device().clone(),
//!     ctx.queue_families().graphics,
//!     swapchain.image_count(),
//! )?;
//!
//! let (image_index, _suboptimal) = frames.acquire(swapchain)?;
//! frames.wait_for_slot(image_index)?;
//! let cmd = frames.begin_recording()?;
//! // cmd.begin_render_pass(...); cmd.draw(...); cmd.end_render_pass();
//! frames.end_recording()?;
//! frames.submit(ctx.graphics_queue())?;
//! frames.present(swapchain, ctx.present_queue(), image_index)?;
//! frames.advance();
//!
//! ctx.wait_idle()?;
//! frames.destroy();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, trace};

use minirender_rhi::RhiResult;
use minirender_rhi::backend::{GpuDevice, SubmitDesc};
use minirender_rhi::command::{CommandBuffer, CommandPool};
use minirender_rhi::swapchain::Swapchain;
use minirender_rhi::sync::FrameSync;

use crate::MAX_FRAME_DRAWS;

/// Per-slot rendering data.
///
/// Each slot has its own command buffer and synchronization objects so the
/// CPU can record one frame while the GPU still works on the other.
pub struct FrameSlot {
    sync: FrameSync,
    command_buffer: CommandBuffer,
}

impl FrameSlot {
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.sync.image_available()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.sync.render_finished()
    }

    #[inline]
    pub fn draw_fence(&self) -> vk::Fence {
        self.sync.draw_fence().handle()
    }
}

/// Manages the frame slots and the per-frame synchronization protocol.
///
/// The command pool owned here also serves one-time transfer submissions,
/// since its family supports graphics and therefore transfer.
///
/// # Thread Safety
///
/// The frame manager should only be driven from one thread at a time.
pub struct FrameManager {
    device: Arc<dyn GpuDevice>,
    command_pool: CommandPool,
    slots: Vec<FrameSlot>,
    /// Slot used by the next frame (0 to MAX_FRAME_DRAWS - 1).
    current: usize,
    frames_drawn: u64,
    /// Submissions made from each slot.
    submissions: [u64; MAX_FRAME_DRAWS],
    /// Set once a slot's fence was waited after its latest submission.
    completed: [bool; MAX_FRAME_DRAWS],
    /// Slot whose unfinished submission renders to each swapchain image.
    images_in_flight: Vec<Option<usize>>,
}

impl FrameManager {
    /// Creates the command pool and [`MAX_FRAME_DRAWS`] frame slots.
    ///
    /// # Errors
    ///
    /// Returns an error if any object cannot be created. Objects created
    /// before the failure are destroyed.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        queue_family_index: u32,
        image_count: u32,
    ) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone(), queue_family_index)?;

        let mut slots: Vec<FrameSlot> = Vec::with_capacity(MAX_FRAME_DRAWS);
        for i in 0..MAX_FRAME_DRAWS {
            let slot = FrameSync::new(device.clone()).and_then(|sync| {
                match CommandBuffer::new(device.clone(), &command_pool) {
                    Ok(command_buffer) => Ok(FrameSlot {
                        sync,
                        command_buffer,
                    }),
                    Err(e) => {
                        sync.destroy();
                        Err(e)
                    }
                }
            });
            match slot {
                Ok(slot) => {
                    debug!("Created frame slot {}", i);
                    slots.push(slot);
                }
                Err(e) => {
                    for slot in slots {
                        slot.sync.destroy();
                    }
                    command_pool.destroy();
                    return Err(e);
                }
            }
        }

        info!("Frame manager created with {} frame slots", MAX_FRAME_DRAWS);

        Ok(Self {
            device,
            command_pool,
            slots,
            current: 0,
            frames_drawn: 0,
            submissions: [0; MAX_FRAME_DRAWS],
            completed: [false; MAX_FRAME_DRAWS],
            images_in_flight: vec![None; image_count as usize],
        })
    }

    /// Returns the slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Number of frames that completed the full loop.
    #[inline]
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Number of submissions made from `slot`.
    pub fn submissions(&self, slot: usize) -> u64 {
        self.submissions.get(slot).copied().unwrap_or(0)
    }

    /// Returns the command pool, also usable for one-time transfers.
    #[inline]
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    fn current_frame_slot(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// Acquires the next swapchain image, signalling the current slot's
    /// image-available semaphore.
    ///
    /// Returns `(image_index, suboptimal)`.
    ///
    /// # Errors
    ///
    /// Out-of-date swapchains surface as errors for which
    /// [`RhiError::is_out_of_date`](minirender_rhi::RhiError::is_out_of_date)
    /// holds; the slot is left untouched.
    pub fn acquire(&self, swapchain: &Swapchain) -> RhiResult<(u32, bool)> {
        let slot = self.current_frame_slot();
        let (image_index, suboptimal) = swapchain.acquire_next_image(slot.image_available())?;
        trace!("Slot {} acquired image {}", self.current, image_index);
        Ok((image_index, suboptimal))
    }

    /// Waits until the current slot and `image_index` are free, then resets
    /// the slot's fence.
    ///
    /// The slot's own fence is waited unless its latest submission was
    /// already seen complete. If another slot's submission still renders to
    /// the image, that slot's fence is waited as well. Each fence is waited at
    /// most once per submission.
    pub fn wait_for_slot(&mut self, image_index: u32) -> RhiResult<()> {
        let current = self.current;
        self.wait_fence_of(current)?;

        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            self.images_in_flight.resize(image + 1, None);
        }
        if let Some(owner) = self.images_in_flight[image] {
            trace!(
                "Image {} last rendered by slot {}",
                image_index, owner
            );
            self.wait_fence_of(owner)?;
        }

        self.slots[current].sync.draw_fence().reset()?;
        self.images_in_flight[image] = Some(current);
        Ok(())
    }

    fn wait_fence_of(&mut self, slot: usize) -> RhiResult<()> {
        if !self.completed[slot] {
            self.slots[slot].sync.draw_fence().wait(u64::MAX)?;
            self.completed[slot] = true;
        }
        self.release_images_of(slot);
        Ok(())
    }

    fn release_images_of(&mut self, slot: usize) {
        for owner in self.images_in_flight.iter_mut() {
            if *owner == Some(slot) {
                *owner = None;
            }
        }
    }

    /// Resets and begins the current slot's command buffer.
    pub fn begin_recording(&self) -> RhiResult<&CommandBuffer> {
        let cmd = &self.slots[self.current].command_buffer;
        cmd.reset()?;
        cmd.begin()?;
        Ok(cmd)
    }

    pub fn end_recording(&self) -> RhiResult<()> {
        self.slots[self.current].command_buffer.end()
    }

    /// Submits the current slot's command buffer to `queue`.
    ///
    /// Waits on image-available at `COLOR_ATTACHMENT_OUTPUT`, signals
    /// render-finished and the slot's draw fence.
    pub fn submit(&mut self, queue: vk::Queue) -> RhiResult<()> {
        let slot = &self.slots[self.current];

        let wait_semaphores = [slot.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished()];
        let command_buffers = [slot.command_buffer.handle()];

        self.device.queue_submit(
            queue,
            &SubmitDesc {
                wait_semaphores: &wait_semaphores,
                wait_stages: &wait_stages,
                command_buffers: &command_buffers,
                signal_semaphores: &signal_semaphores,
            },
            slot.draw_fence(),
        )?;

        self.submissions[self.current] += 1;
        self.completed[self.current] = false;
        Ok(())
    }

    /// Presents `image_index` once the current slot's rendering finishes.
    ///
    /// Returns true if the swapchain is suboptimal.
    pub fn present(
        &self,
        swapchain: &Swapchain,
        queue: vk::Queue,
        image_index: u32,
    ) -> RhiResult<bool> {
        swapchain.present(queue, image_index, self.slots[self.current].render_finished())
    }

    /// Advances to the next frame slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % MAX_FRAME_DRAWS;
        self.frames_drawn += 1;
    }

    /// Forgets image ownership after the swapchain was recreated.
    ///
    /// The device must be idle.
    pub fn reset_image_tracking(&mut self, image_count: u32) {
        self.images_in_flight = vec![None; image_count as usize];
        debug!("Image tracking reset for {} image(s)", image_count);
    }

    /// Destroys each slot's sync objects, then the command pool with its
    /// command buffers.
    ///
    /// The device must be idle.
    pub fn destroy(self) {
        for slot in self.slots {
            slot.sync.destroy();
        }
        self.command_pool.destroy();
        debug!("Frame manager destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirender_rhi::headless::{DeviceEvent, HeadlessDevice, ObjectKind};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_max_frame_draws_constant() {
        assert_eq!(MAX_FRAME_DRAWS, 2);
    }

    #[test]
    fn test_frame_manager_is_send_sync() {
        assert_send_sync::<FrameManager>();
        assert_send_sync::<FrameSlot>();
    }

    #[test]
    fn test_slots_start_idle() {
        let device = HeadlessDevice::new_default();
        let frames = FrameManager::new(device.clone(), 0, 3).unwrap();

        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frames_drawn(), 0);
        for i in 0..MAX_FRAME_DRAWS {
            let slot = frames.slot(i).unwrap();
            assert_eq!(device.fence_signaled(slot.draw_fence()), Some(true));
        }
        assert!(frames.slot(MAX_FRAME_DRAWS).is_none());
        assert_eq!(device.live_command_buffers(), MAX_FRAME_DRAWS);

        frames.destroy();
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_advance_wraps() {
        let device = HeadlessDevice::new_default();
        let mut frames = FrameManager::new(device.clone(), 0, 3).unwrap();

        for n in 1..=5u64 {
            frames.advance();
            assert_eq!(frames.current_slot(), (n as usize) % MAX_FRAME_DRAWS);
            assert_eq!(frames.frames_drawn(), n);
        }
        frames.destroy();
    }

    #[test]
    fn test_wait_resets_own_fence() {
        let device = HeadlessDevice::new_default();
        let mut frames = FrameManager::new(device.clone(), 0, 3).unwrap();
        let fence = frames.slot(0).unwrap().draw_fence();

        device.clear_events();
        frames.wait_for_slot(1).unwrap();
        assert_eq!(
            device.events(),
            vec![DeviceEvent::FenceWait { fence }, DeviceEvent::FenceReset { fence }]
        );
        assert_eq!(device.fence_signaled(fence), Some(false));

        // Recording and submitting an empty buffer signals it again
        frames.begin_recording().unwrap();
        frames.end_recording().unwrap();
        let queue = device.get_queue(0, 0);
        let slot = frames.slot(0).unwrap();
        // Nothing acquired, so stand in for the acquire signal with a submit
        device
            .queue_submit(
                queue,
                &SubmitDesc {
                    signal_semaphores: &[slot.image_available()],
                    ..Default::default()
                },
                vk::Fence::null(),
            )
            .unwrap();
        frames.submit(queue).unwrap();
        assert_eq!(device.fence_signaled(fence), Some(true));
        assert_eq!(frames.submissions(0), 1);
        assert_eq!(frames.submissions(1), 0);

        frames.destroy();
    }

    #[test]
    fn test_destroy_order() {
        let device = HeadlessDevice::new_default();
        let frames = FrameManager::new(device.clone(), 0, 2).unwrap();
        device.clear_events();
        frames.destroy();

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
            vec![
                ObjectKind::Semaphore,
                ObjectKind::Semaphore,
                ObjectKind::Fence,
                ObjectKind::Semaphore,
                ObjectKind::Semaphore,
                ObjectKind::Fence,
                ObjectKind::CommandPool,
            ]
        );
    }
}
