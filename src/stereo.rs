//! Per-eye transform composition and head pose tracking

use crate::vr::{TrackedPoses, VrSession, HMD_DEVICE_INDEX};
use glam::Mat4;

pub use crate::scene::Transform as ModelPlacement;

/// One of the two HMD eyes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Render order
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    /// Horizontal offset of this eye's half in a side-by-side composite
    pub fn composite_offset(self, eye_width: u32) -> u32 {
        match self {
            Eye::Left => 0,
            Eye::Right => eye_width,
        }
    }
}

/// How a panorama image carries its views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoLayout {
    /// One view shared by both eyes
    #[default]
    Mono,
    /// Left eye view in the top half, right eye view in the bottom half
    OverUnder,
}

impl StereoLayout {
    /// `(left_eye, over_under)` shader flags for `eye`
    pub fn shader_flags(self, eye: Eye) -> (bool, bool) {
        match self {
            StereoLayout::Mono => (false, false),
            StereoLayout::OverUnder => (eye == Eye::Left, true),
        }
    }
}

/// Fixed per-eye matrices, queried once per session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeTransform {
    pub eye: Eye,
    pub projection: Mat4,
    /// Inverse of the eye-to-head transform
    pub pose_offset: Mat4,
}

impl EyeTransform {
    pub fn from_session(session: &dyn VrSession, eye: Eye, near: f32, far: f32) -> Self {
        Self {
            eye,
            projection: session.projection_matrix(eye, near, far),
            pose_offset: session.eye_to_head_transform(eye).inverse(),
        }
    }

    pub fn compose(&self, head_pose: &HeadPose, model: Mat4) -> Mat4 {
        compose_eye_transform(self.projection, self.pose_offset, head_pose.matrix(), model)
    }
}

/// `projection * pose_offset * head_pose * model`
pub fn compose_eye_transform(projection: Mat4, pose_offset: Mat4, head_pose: Mat4, model: Mat4) -> Mat4 {
    projection * pose_offset * head_pose * model
}

/// Inverse of the most recent valid HMD pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    matrix: Mat4,
}

impl Default for HeadPose {
    fn default() -> Self {
        Self {
            matrix: Mat4::IDENTITY,
        }
    }
}

impl HeadPose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the HMD pose from `poses` if it is valid. Returns whether the pose changed.
    pub fn update(&mut self, poses: &TrackedPoses) -> bool {
        let Some(hmd) = poses.get(HMD_DEVICE_INDEX) else {
            return false;
        };
        if !hmd.valid {
            return false;
        }
        if hmd.device_to_absolute.determinant().abs() <= f32::EPSILON {
            log::warn!("HMD pose is not invertible, keeping previous pose");
            return false;
        }
        let inverse = hmd.device_to_absolute.inverse();
        let changed = inverse != self.matrix;
        self.matrix = inverse;
        changed
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }
}
