//! Shared setup for the headless renderer tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use minirender_renderer::{Renderer, RendererConfig};
use minirender_rhi::headless::{DeviceEvent, HeadlessDevice, HeadlessInstance};
use minirender_rhi::shader::SPIRV_MAGIC;
use minirender_rhi::vk;
use minirender_scene::QuadScene;

pub const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 800,
    height: 600,
};

/// Smallest blob that passes the SPIR-V header check.
pub fn spirv() -> Vec<u8> {
    [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

pub struct Harness {
    pub instance: Arc<HeadlessInstance>,
    pub device: Arc<HeadlessDevice>,
    pub surface: vk::SurfaceKHR,
    pub renderer: Renderer,
}

pub fn harness(config: RendererConfig) -> Harness {
    let instance = HeadlessInstance::new_default();
    let surface = instance.create_surface(EXTENT);
    let renderer = Renderer::new(instance.clone(), surface, EXTENT, config, &spirv(), &spirv())
        .expect("Failed to create renderer");
    let device = instance.last_device().expect("Renderer created no device");
    Harness {
        instance,
        device,
        surface,
        renderer,
    }
}

/// Harness with both quads of the demo scene uploaded.
pub fn harness_with_scene(config: RendererConfig) -> Harness {
    let mut h = harness(config);
    for (vertices, indices) in QuadScene::new().meshes() {
        h.renderer
            .add_mesh(&vertices, Some(indices.as_slice()))
            .expect("Failed to add mesh");
    }
    h
}

/// Checks that every wait on a fence after the first is preceded by exactly
/// one submission signalling it since the previous wait.
pub fn assert_fence_order(events: &[DeviceEvent]) {
    let mut since_wait: HashMap<vk::Fence, u32> = HashMap::new();
    for event in events {
        match event {
            DeviceEvent::FenceWait { fence } => {
                if let Some(submits) = since_wait.insert(*fence, 0) {
                    assert_eq!(
                        submits, 1,
                        "fence {:?} waited after {} submissions",
                        fence, submits
                    );
                }
            }
            DeviceEvent::Submit { fence, .. } if *fence != vk::Fence::null() => {
                *since_wait.entry(*fence).or_insert(0) += 1;
            }
            _ => {}
        }
    }
}

pub fn draws(events: &[DeviceEvent]) -> Vec<minirender_rhi::headless::DrawRecord> {
    events
        .iter()
        .filter_map(|event| match event {
            DeviceEvent::DrawExecuted(record) => Some(record.clone()),
            _ => None,
        })
        .collect()
}

pub fn copies(events: &[DeviceEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, DeviceEvent::CopyExecuted { .. }))
        .count()
}
