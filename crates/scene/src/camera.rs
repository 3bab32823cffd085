//! Camera for rendering the scene.

use glam::{Mat4, Vec3};

/// Projection and view matrices for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrices {
    pub projection: Mat4,
    pub view: Mat4,
}

/// A fixed camera looking at a target point.
#[derive(Clone, Debug)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Point the camera looks at
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(3.0, 1.0, 2.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45.0_f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Create a new camera with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix (with Vulkan Y-flip).
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far);
        // Flip Y for Vulkan coordinate system
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Get both matrices for a framebuffer of the given aspect ratio.
    pub fn view_projection(&self, aspect: f32) -> CameraMatrices {
        CameraMatrices {
            projection: self.projection_matrix(aspect),
            view: self.view_matrix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera() {
        let camera = Camera::default();
        assert_eq!(camera.position, Vec3::new(3.0, 1.0, 2.0));
        assert_eq!(camera.target, Vec3::ZERO);
        assert_eq!(camera.near, 0.1);
        assert_eq!(camera.far, 100.0);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        let unflipped = Mat4::perspective_rh(45.0_f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
        let proj = camera.projection_matrix(4.0 / 3.0);

        assert_eq!(proj.y_axis.y, -unflipped.y_axis.y);
        assert_eq!(proj.x_axis, unflipped.x_axis);
        assert_eq!(proj.z_axis, unflipped.z_axis);
        assert_eq!(proj.w_axis, unflipped.w_axis);
    }

    #[test]
    fn test_target_maps_to_view_axis() {
        let camera = Camera::default();
        let target_in_view = camera.view_matrix().transform_point3(camera.target);

        // Right-handed view space looks down -Z
        assert!(target_in_view.x.abs() < 1e-5);
        assert!(target_in_view.y.abs() < 1e-5);
        assert!(target_in_view.z < 0.0);
    }

    #[test]
    fn test_target_lands_in_clip_volume() {
        let camera = Camera::default();
        let m = camera.view_projection(16.0 / 9.0);
        let clip = m.projection * m.view * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;

        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
