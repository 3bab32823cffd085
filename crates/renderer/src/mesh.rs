//! Mesh upload and drawing.
//!
//! A [`Mesh`] owns a vertex buffer, an optional `u32` index buffer and a
//! model transform. Data reaches the GPU through one of two paths chosen by
//! [`UploadStrategy`]:
//!
//! - `Staged`: host-visible staging buffer, one-time copy into device-local
//!   memory, blocking until the transfer queue is idle
//! - `HostVisible`: written in place through a mapping, no copy
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::command::CommandPool;
//! use minirender_rhi::device::DeviceContext;
//! use minirender_rhi::vertex::Vertex;
//! use minirender_renderer::config::UploadStrategy;
//! use minirender_renderer::mesh::Mesh;
//! use glam::Vec3;
//!
//! # fn example(ctx: &DeviceContext, pool: &CommandPool) -> Result<(), minirender_rhi::RhiError> {
//! let vertices = [
//!     Vertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec3::X),
//!     Vertex::new(Vec3::new(0.5, -0.5, 0.0), Vec3::Y),
//!     Vertex::new(Vec3::new(0.0, 0.5, 0.0), Vec3::Z),
//! ];
//! let mesh = Mesh::new(ctx, ctx.graphics_queue(), pool, &vertices, None, UploadStrategy::Staged)?;
//!
//! ctx.wait_idle()?;
//! mesh.destroy_buffers(ctx.device().as_ref());
//! # Ok(())
//! # }
//! ```

use ash::vk;
use glam::Mat4;
use tracing::debug;

use minirender_rhi::backend::GpuDevice;
use minirender_rhi::buffer::{BufferUsage, GpuBuffer};
use minirender_rhi::command::{CommandBuffer, CommandPool};
use minirender_rhi::device::DeviceContext;
use minirender_rhi::vertex::Vertex;
use minirender_rhi::{RhiError, RhiResult};

use crate::config::UploadStrategy;

/// Geometry on the GPU plus its model transform.
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    index_buffer: Option<GpuBuffer>,
    vertex_count: u32,
    index_count: u32,
    model: Mat4,
}

impl Mesh {
    /// Uploads `vertices` and optional `indices` with the given strategy.
    ///
    /// The model transform starts as the identity.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty vertex list or empty index list, or if
    /// any allocation or transfer fails. Nothing is retried, and a failed
    /// index upload releases the vertex buffer.
    pub fn new(
        ctx: &DeviceContext,
        transfer_queue: vk::Queue,
        transfer_pool: &CommandPool,
        vertices: &[Vertex],
        indices: Option<&[u32]>,
        strategy: UploadStrategy,
    ) -> RhiResult<Self> {
        if vertices.is_empty() {
            return Err(RhiError::InvalidUsage("Mesh has no vertices".to_string()));
        }
        if indices.is_some_and(<[u32]>::is_empty) {
            return Err(RhiError::InvalidUsage(
                "Mesh index list is empty".to_string(),
            ));
        }

        let device = ctx.device().as_ref();
        let upload = |usage: BufferUsage, data: &[u8]| match strategy {
            UploadStrategy::Staged => GpuBuffer::device_local_with_data(
                device,
                ctx.memory_properties(),
                transfer_pool,
                transfer_queue,
                usage,
                data,
            ),
            UploadStrategy::HostVisible => {
                GpuBuffer::host_visible_with_data(device, ctx.memory_properties(), usage, data)
            }
        };

        let vertex_buffer = upload(BufferUsage::Vertex, bytemuck::cast_slice(vertices))?;

        let index_buffer = match indices {
            Some(indices) => match upload(BufferUsage::Index, bytemuck::cast_slice(indices)) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    vertex_buffer.release(device);
                    return Err(e);
                }
            },
            None => None,
        };

        let index_count = indices.map_or(0, |i| i.len() as u32);
        debug!(
            "Mesh uploaded ({}): {} vertices, {} indices",
            strategy.name(),
            vertices.len(),
            index_count
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count,
            model: Mat4::IDENTITY,
        })
    }

    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    #[inline]
    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.index_buffer.as_ref().map(GpuBuffer::handle)
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices, 0 for a non-indexed mesh.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    #[inline]
    pub fn model(&self) -> Mat4 {
        self.model
    }

    #[inline]
    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    /// Records the vertex and index buffer bindings.
    pub fn bind(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffer(0, self.vertex_buffer.handle());
        if let Some(index_buffer) = &self.index_buffer {
            cmd.bind_index_buffer(index_buffer.handle(), vk::IndexType::UINT32);
        }
    }

    /// Records the draw: indexed if the mesh has indices.
    pub fn draw(&self, cmd: &CommandBuffer) {
        if self.is_indexed() {
            cmd.draw_indexed(self.index_count);
        } else {
            cmd.draw(self.vertex_count);
        }
    }

    /// Releases the index buffer, then the vertex buffer.
    ///
    /// The device must be idle.
    pub fn destroy_buffers(self, device: &dyn GpuDevice) {
        if let Some(index_buffer) = self.index_buffer {
            index_buffer.release(device);
        }
        self.vertex_buffer.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use glam::Vec3;
    use minirender_rhi::device::DeviceConfig;
    use minirender_rhi::headless::{DeviceEvent, FailPoint, HeadlessInstance, ObjectKind};

    fn context() -> (std::sync::Arc<HeadlessInstance>, DeviceContext) {
        let instance = HeadlessInstance::new_default();
        let surface = instance.create_surface(vk::Extent2D {
            width: 64,
            height: 64,
        });
        let ctx = DeviceContext::new(instance.clone(), surface, &DeviceConfig::default()).unwrap();
        (instance, ctx)
    }

    fn triangle() -> [Vertex; 3] {
        [
            Vertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec3::X),
            Vertex::new(Vec3::new(0.5, -0.5, 0.0), Vec3::Y),
            Vertex::new(Vec3::new(0.0, 0.5, 0.0), Vec3::Z),
        ]
    }

    #[test]
    fn test_non_indexed_mesh() {
        let (instance, ctx) = context();
        let device = instance.last_device().unwrap();
        let pool = CommandPool::new(ctx.device().clone(), ctx.queue_families().graphics).unwrap();

        let mesh = Mesh::new(
            &ctx,
            ctx.graphics_queue(),
            &pool,
            &triangle(),
            None,
            UploadStrategy::Staged,
        )
        .unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.index_count(), 0);
        assert!(!mesh.is_indexed());
        assert_eq!(mesh.index_buffer(), None);
        assert_eq!(mesh.model(), Mat4::IDENTITY);

        let contents = device.buffer_contents(mesh.vertex_buffer()).unwrap();
        assert_eq!(&contents[..72], bytemuck::cast_slice::<Vertex, u8>(&triangle()));

        mesh.destroy_buffers(ctx.device().as_ref());
        pool.destroy();
        assert_eq!(device.live_objects_of(ObjectKind::Buffer), 0);
        ctx.destroy();
    }

    #[test]
    fn test_destroy_releases_index_then_vertex() {
        let (instance, ctx) = context();
        let device = instance.last_device().unwrap();
        let pool = CommandPool::new(ctx.device().clone(), ctx.queue_families().graphics).unwrap();

        let mesh = Mesh::new(
            &ctx,
            ctx.graphics_queue(),
            &pool,
            &triangle(),
            Some(&[0, 1, 2][..]),
            UploadStrategy::HostVisible,
        )
        .unwrap();
        let vertex = mesh.vertex_buffer().as_raw();
        let index = mesh.index_buffer().unwrap().as_raw();

        device.clear_events();
        mesh.destroy_buffers(ctx.device().as_ref());
        let buffers: Vec<u64> = device
            .events()
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::Destroyed {
                    kind: ObjectKind::Buffer,
                    handle,
                } => Some(handle),
                _ => None,
            })
            .collect();
        assert_eq!(buffers, vec![index, vertex]);

        pool.destroy();
        ctx.destroy();
    }

    #[test]
    fn test_failed_upload_leaves_nothing_behind() {
        let (instance, ctx) = context();
        let device = instance.last_device().unwrap();
        let pool = CommandPool::new(ctx.device().clone(), ctx.queue_families().graphics).unwrap();

        // The vertex copy is the first submission
        let before = device.live_objects();
        let vertices = triangle();
        let indices = [0u32, 1, 2];
        device.fail_next(FailPoint::QueueSubmit);
        let result = Mesh::new(
            &ctx,
            ctx.graphics_queue(),
            &pool,
            &vertices,
            Some(&indices[..]),
            UploadStrategy::Staged,
        );
        assert!(result.is_err());
        assert_eq!(device.live_objects(), before);
        assert_eq!(device.live_command_buffers(), 0);

        pool.destroy();
        ctx.destroy();
    }

    #[test]
    fn test_empty_inputs_are_rejected() {
        let (_instance, ctx) = context();
        let pool = CommandPool::new(ctx.device().clone(), ctx.queue_families().graphics).unwrap();

        assert!(
            Mesh::new(&ctx, ctx.graphics_queue(), &pool, &[], None, UploadStrategy::Staged).is_err()
        );
        assert!(
            Mesh::new(
                &ctx,
                ctx.graphics_queue(),
                &pool,
                &triangle(),
                Some(&[][..]),
                UploadStrategy::Staged
            )
            .is_err()
        );

        pool.destroy();
        ctx.destroy();
    }
}
