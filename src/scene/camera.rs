//! Camera used by the flat desktop preview

use glam::{Mat4, Vec3};

/// Perspective camera sitting at the ball's center
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewCamera {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl PreviewCamera {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Looking down -Z from the origin, y up
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_follows_target_size() {
        let mut camera = PreviewCamera::perspective(90.0, 1.0, 0.1, 5.0);
        camera.set_aspect(1280, 720);
        assert!((camera.aspect - 16.0 / 9.0).abs() < 1e-6);
        camera.set_aspect(0, 720);
        assert!((camera.aspect - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn forward_point_projects_to_center() {
        let camera = PreviewCamera::perspective(90.0, 1.0, 0.1, 5.0);
        let clip = camera.view_projection() * Vec3::new(0.0, 0.0, -2.0).extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-6 && ndc.y.abs() < 1e-6);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
