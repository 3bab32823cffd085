//! Per-frame scene updates shared by the windowed and headless loops.

use minirender_renderer::{Renderer, RendererResult, UboViewProjection};
use minirender_scene::{Camera, QuadScene};

#[derive(Default)]
pub struct Demo {
    scene: QuadScene,
    camera: Camera,
}

impl Demo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads both quads and returns their mesh indices.
    pub fn upload(&self, renderer: &mut Renderer) -> RendererResult<Vec<usize>> {
        self.scene
            .meshes()
            .iter()
            .map(|(vertices, indices)| renderer.add_mesh(vertices, Some(indices.as_slice())))
            .collect()
    }

    /// Advances the animation by `dt` seconds and hands the new matrices to
    /// the renderer.
    pub fn update(&mut self, renderer: &mut Renderer, dt: f32) -> RendererResult<()> {
        self.scene.advance(dt);
        for (index, model) in self.scene.model_matrices().into_iter().enumerate() {
            renderer.update_model(index, model)?;
        }

        let m = self.camera.view_projection(renderer.aspect_ratio());
        renderer.set_view_projection(UboViewProjection::new(m.projection, m.view));
        Ok(())
    }

    pub fn angle(&self) -> f32 {
        self.scene.angle()
    }
}
