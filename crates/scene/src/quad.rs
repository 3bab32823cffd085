//! The two-quad demo scene.
//!
//! Two colored quads sit left and right of the origin at z = -5. The left
//! one turns slowly counter-clockwise and the right one ten times faster the
//! other way.
//!
//! # Example
//!
//! ```
//! use minirender_scene::QuadScene;
//!
//! let mut scene = QuadScene::new();
//! let meshes = scene.meshes();
//! assert_eq!(meshes.len(), 2);
//!
//! scene.advance(0.5);
//! let [left, right] = scene.model_matrices();
//! # let _ = (left, right);
//! ```

use glam::{Mat4, Vec3};
use minirender_rhi::vertex::Vertex;

/// Rotation speed of the left quad in degrees per second.
pub const DEGREES_PER_SECOND: f32 = 10.0;

/// Two triangles per quad, counter-clockwise in a Y-up world.
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// Vertex and index data for one mesh.
pub type MeshData = (Vec<Vertex>, Vec<u32>);

/// Fixed scene state: the rotation angle in degrees.
#[derive(Clone, Debug, Default)]
pub struct QuadScene {
    angle: f32,
}

impl QuadScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current angle in degrees, in `[0, 360]`.
    #[inline]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// The two quads as `(vertices, indices)` pairs.
    pub fn meshes(&self) -> [MeshData; 2] {
        let left = vec![
            Vertex::new(Vec3::new(-0.1, -0.4, 0.0), Vec3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vec3::new(-0.1, 0.4, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vec3::new(-0.9, 0.4, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            Vertex::new(Vec3::new(-0.9, -0.4, 0.0), Vec3::new(1.0, 1.0, 0.0)),
        ];
        let right = vec![
            Vertex::new(Vec3::new(0.9, -0.3, 0.0), Vec3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vec3::new(0.9, 0.1, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vec3::new(0.1, 0.3, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            Vertex::new(Vec3::new(0.1, -0.3, 0.0), Vec3::new(1.0, 1.0, 0.0)),
        ];
        [
            (left, QUAD_INDICES.to_vec()),
            (right, QUAD_INDICES.to_vec()),
        ]
    }

    /// Advances the animation by `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        self.angle += DEGREES_PER_SECOND * dt;
        if self.angle > 360.0 {
            self.angle -= 360.0;
        }
    }

    /// Model matrices for the left and right quad.
    pub fn model_matrices(&self) -> [Mat4; 2] {
        let first = Mat4::from_translation(Vec3::new(-2.0, 0.0, -5.0))
            * Mat4::from_rotation_z(self.angle.to_radians());
        let second = Mat4::from_translation(Vec3::new(2.0, 0.0, -5.0))
            * Mat4::from_rotation_z((-self.angle * 10.0).to_radians());
        [first, second]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meshes_are_indexed_quads() {
        let scene = QuadScene::new();
        for (vertices, indices) in scene.meshes() {
            assert_eq!(vertices.len(), 4);
            assert_eq!(indices, QUAD_INDICES);
            assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
        }
    }

    #[test]
    fn test_quads_wind_counter_clockwise() {
        let scene = QuadScene::new();
        for (vertices, indices) in scene.meshes() {
            for tri in indices.chunks(3) {
                let a = vertices[tri[0] as usize].pos;
                let b = vertices[tri[1] as usize].pos;
                let c = vertices[tri[2] as usize].pos;
                let normal = (b - a).cross(c - a);
                assert!(normal.z > 0.0);
            }
        }
    }

    #[test]
    fn test_advance_rotates_and_wraps() {
        let mut scene = QuadScene::new();
        scene.advance(1.0);
        assert!((scene.angle() - 10.0).abs() < 1e-5);

        scene.advance(35.5);
        assert!((scene.angle() - 5.0).abs() < 1e-3);
        assert!(scene.angle() <= 360.0);
    }

    #[test]
    fn test_model_matrices() {
        let mut scene = QuadScene::new();
        let [first, second] = scene.model_matrices();
        assert_eq!(
            first.transform_point3(Vec3::ZERO),
            Vec3::new(-2.0, 0.0, -5.0)
        );
        assert_eq!(
            second.transform_point3(Vec3::ZERO),
            Vec3::new(2.0, 0.0, -5.0)
        );

        scene.advance(9.0); // 90 degrees
        let [first, second] = scene.model_matrices();
        let x = first.transform_vector3(Vec3::X);
        assert!((x - Vec3::Y).length() < 1e-5);

        // The right quad turns -900 degrees, which is -180
        let x = second.transform_vector3(Vec3::X);
        assert!((x + Vec3::X).length() < 1e-4);
    }
}
