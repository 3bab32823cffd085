//! Offscreen frame loop on the headless backend.

use anyhow::{Context, Result, bail};
use minirender_renderer::{DrawOutcome, Renderer, RendererConfig};
use minirender_rhi::headless::HeadlessInstance;
use minirender_rhi::shader::SPIRV_MAGIC;
use minirender_rhi::vk;
use tracing::{info, warn};

use crate::demo::Demo;
use crate::shaders::ShaderBinaries;

/// Fixed timestep, 60 frames per second.
const FRAME_DT: f32 = 1.0 / 60.0;

/// A header-only module. The headless backend never executes shaders.
pub fn placeholder_spirv() -> Vec<u8> {
    [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// Statistics of a headless run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub presented: u64,
    pub out_of_date: u64,
}

/// Draws `frames` frames and tears everything down.
pub fn run(
    frames: u64,
    extent: vk::Extent2D,
    config: RendererConfig,
    shaders: Option<ShaderBinaries>,
) -> Result<RunSummary> {
    let shaders = shaders.unwrap_or_else(|| {
        warn!("No compiled shaders found, using placeholder modules");
        ShaderBinaries {
            vertex: placeholder_spirv(),
            fragment: placeholder_spirv(),
        }
    });

    let instance = HeadlessInstance::new_default();
    let surface = instance.create_surface(extent);
    let mut renderer = Renderer::new(
        instance.clone(),
        surface,
        extent,
        config,
        &shaders.vertex,
        &shaders.fragment,
    )
    .context("Failed to create renderer")?;

    let mut demo = Demo::new();
    let summary = match drive(&mut renderer, &mut demo, frames) {
        Ok(summary) => summary,
        Err(e) => {
            renderer.destroy();
            return Err(e);
        }
    };
    renderer.destroy();

    if let Some(device) = instance.last_device() {
        let errors = device.validation_errors();
        if !errors.is_empty() {
            bail!("{} validation errors, first: {}", errors.len(), errors[0]);
        }
        if device.live_objects() != 0 {
            bail!("{} objects leaked", device.live_objects());
        }
    }

    info!(
        "Headless run done: {} presented, {} out of date, angle {:.1}",
        summary.presented,
        summary.out_of_date,
        demo.angle()
    );
    Ok(summary)
}

fn drive(renderer: &mut Renderer, demo: &mut Demo, frames: u64) -> Result<RunSummary> {
    demo.upload(renderer).context("Failed to upload scene")?;

    let mut summary = RunSummary::default();
    for _ in 0..frames {
        demo.update(renderer, FRAME_DT)?;
        match renderer.draw().context("Draw failed")? {
            DrawOutcome::Presented { .. } => summary.presented += 1,
            DrawOutcome::SwapchainOutOfDate => summary.out_of_date += 1,
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirender_renderer::config::TransformDelivery;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 320,
        height: 240,
    };

    #[test]
    fn test_runs_requested_frames() {
        let summary = run(5, EXTENT, RendererConfig::default(), None).unwrap();
        assert_eq!(
            summary,
            RunSummary {
                presented: 5,
                out_of_date: 0
            }
        );
    }

    #[test]
    fn test_dynamic_uniform_without_depth() {
        let config = RendererConfig::default()
            .with_transform_delivery(TransformDelivery::DynamicUniform { max_objects: 2 })
            .with_depth(false);
        let summary = run(3, EXTENT, config, None).unwrap();
        assert_eq!(summary.presented, 3);
    }

    #[test]
    fn test_zero_frames_still_tears_down() {
        let summary = run(0, EXTENT, RendererConfig::default(), None).unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn test_bad_shader_fails_setup() {
        let shaders = ShaderBinaries {
            vertex: vec![1, 2, 3],
            fragment: placeholder_spirv(),
        };
        assert!(run(1, EXTENT, RendererConfig::default(), Some(shaders)).is_err());
    }
}
