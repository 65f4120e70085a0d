//! Placement of the panorama ball in the world

use glam::{Mat4, Quat, Vec3};

/// Translation, rotation and scale of an object in 3D space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Placement for a sphere generated in a z-up frame, turned so its poles
    /// line up with the y-up tracking space
    pub fn z_up_to_y_up() -> Self {
        Self {
            rotation: Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2),
            ..Default::default()
        }
    }

    /// Rotate around the vertical axis, e.g. to choose which longitude faces forward
    pub fn with_yaw(mut self, yaw_radians: f32) -> Self {
        self.rotation = Quat::from_rotation_y(yaw_radians) * self.rotation;
        self
    }

    /// Get the model matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
