//! Integration tests for mesh upload through the renderer.

mod common;

use glam::Vec3;
use minirender_renderer::{RendererConfig, UploadStrategy};
use minirender_rhi::headless::{FailPoint, ObjectKind};
use minirender_rhi::vertex::Vertex;
use minirender_rhi::vk;

use common::{copies, harness};

fn vertices(count: usize) -> Vec<Vertex> {
    (0..count)
        .map(|i| {
            let t = i as f32;
            Vertex::new(Vec3::new(t, -t, t * 0.5), Vec3::new(1.0, t / count as f32, 0.0))
        })
        .collect()
}

#[test]
fn test_staged_round_trip() {
    for count in [1usize, 4, 1024] {
        let mut h = harness(RendererConfig::default());
        let data = vertices(count);
        let indices: Vec<u32> = (0..count as u32).rev().collect();
        let buffers_before = h.device.live_objects_of(ObjectKind::Buffer);
        h.device.clear_events();

        let index = h
            .renderer
            .add_mesh(&data, Some(indices.as_slice()))
            .expect("Upload failed");
        let mesh = &h.renderer.meshes()[index];
        assert_eq!(mesh.vertex_count(), count as u32);
        assert_eq!(mesh.index_count(), count as u32);

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&data);
        let contents = h
            .device
            .buffer_contents(mesh.vertex_buffer())
            .expect("Vertex buffer has no memory");
        assert_eq!(&contents[..vertex_bytes.len()], vertex_bytes, "{} vertices", count);

        let index_buffer = mesh.index_buffer().expect("Mesh is indexed");
        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
        let contents = h
            .device
            .buffer_contents(index_buffer)
            .expect("Index buffer has no memory");
        assert_eq!(&contents[..index_bytes.len()], index_bytes, "{} indices", count);

        // Device-local destinations, filled by one copy each
        for buffer in [mesh.vertex_buffer(), index_buffer] {
            let info = h.device.buffer_info(buffer).expect("Unknown buffer");
            assert!(
                info.memory_flags
                    .is_some_and(|f| f.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL))
            );
            assert!(info.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
        assert_eq!(copies(&h.device.events()), 2);

        // Staging buffers are gone
        assert_eq!(
            h.device.live_objects_of(ObjectKind::Buffer),
            buffers_before + 2
        );
        assert_eq!(h.device.live_command_buffers(), 2);

        h.renderer.destroy();
    }
}

#[test]
fn test_host_visible_writes_in_place() {
    let mut h = harness(RendererConfig::default().with_upload_strategy(UploadStrategy::HostVisible));
    let data = vertices(4);
    let indices = [0u32, 1, 2, 2, 3, 0];
    h.device.clear_events();

    let index = h
        .renderer
        .add_mesh(&data, Some(&indices[..]))
        .expect("Upload failed");
    assert_eq!(copies(&h.device.events()), 0);

    let mesh = &h.renderer.meshes()[index];
    let info = h
        .device
        .buffer_info(mesh.vertex_buffer())
        .expect("Unknown buffer");
    assert!(info.memory_flags.is_some_and(|f| f.contains(
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    )));
    assert!(info.usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));

    let contents = h
        .device
        .buffer_contents(mesh.vertex_buffer())
        .expect("Vertex buffer has no memory");
    assert_eq!(&contents[..96], bytemuck::cast_slice::<Vertex, u8>(&data));

    h.renderer.draw().expect("Draw failed");
    h.renderer.destroy();
    assert_eq!(h.device.live_objects(), 0);
}

#[test]
fn test_non_indexed_mesh_draws_vertices() {
    let mut h = harness(RendererConfig::default());
    h.renderer.add_mesh(&vertices(3), None).expect("Upload failed");
    h.device.clear_events();
    h.renderer.draw().expect("Draw failed");

    let draws = common::draws(&h.device.events());
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].element_count, 3);
    assert_eq!(draws[0].index_buffer, None);
    h.renderer.destroy();
}

#[test]
fn test_failed_upload_is_atomic() {
    let failures = [
        FailPoint::CreateBuffer,
        FailPoint::AllocateMemory,
        FailPoint::BindBufferMemory,
        FailPoint::QueueSubmit,
    ];
    for failure in failures {
        let mut h = harness(RendererConfig::default());
        let before = h.device.live_objects();

        h.device.fail_next(failure);
        let result = h.renderer.add_mesh(&vertices(4), Some(&[0, 1, 2][..]));
        assert!(result.is_err(), "{:?} should fail the upload", failure);
        assert_eq!(h.device.live_objects(), before, "{:?} leaked", failure);
        assert_eq!(h.device.live_command_buffers(), 2, "{:?} leaked", failure);
        assert!(h.renderer.meshes().is_empty());

        // The renderer keeps working
        h.renderer.add_mesh(&vertices(4), None).expect("Retry failed");
        h.renderer.draw().expect("Draw failed");
        h.renderer.destroy();
        assert_eq!(h.device.live_objects(), 0);
    }
}

#[test]
fn test_empty_mesh_rejected() {
    let mut h = harness(RendererConfig::default());
    assert!(h.renderer.add_mesh(&[], None).is_err());
    assert!(h.renderer.meshes().is_empty());
    h.renderer.destroy();
}
