//! VR runtime boundary
//!
//! The renderer talks to a headset only through [`VrSession`]. A
//! [`VrRuntime`] decides whether a session can be opened at all.

mod convert;
mod fake;
#[cfg(feature = "openvr")]
mod openvr_session;

pub use convert::{mat34_to_mat4, mat44_to_mat4};
pub use fake::{FakeRecord, FakeVrRuntime, FakeVrSession, SubmittedEye};
#[cfg(feature = "openvr")]
pub use openvr_session::{OpenVrRuntime, OpenVrSession};

use crate::backend::{NativeTexture, TextureHandle};
use crate::stereo::Eye;
use glam::Mat4;
use thiserror::Error;

/// Number of device slots the runtime reports poses for
pub const MAX_TRACKED_DEVICES: usize = 64;

/// Slot of the head-mounted display
pub const HMD_DEVICE_INDEX: usize = 0;

/// VR runtime error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VrError {
    #[error("VR runtime initialization failed: {0}")]
    InitFailed(String),
    #[error("VR compositor unavailable")]
    CompositorUnavailable,
    #[error("Waiting for poses failed: {0}")]
    PoseWaitFailed(String),
    #[error("Compositor rejected frame: {0}")]
    SubmitFailed(String),
}

impl VrError {
    /// Whether the error means no session could be opened
    pub fn is_init_failure(&self) -> bool {
        matches!(self, VrError::InitFailed(_) | VrError::CompositorUnavailable)
    }
}

/// Pose of one tracked device in the tracking space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePose {
    pub device_to_absolute: Mat4,
    pub valid: bool,
}

impl Default for DevicePose {
    fn default() -> Self {
        Self {
            device_to_absolute: Mat4::IDENTITY,
            valid: false,
        }
    }
}

impl DevicePose {
    pub fn valid(device_to_absolute: Mat4) -> Self {
        Self {
            device_to_absolute,
            valid: true,
        }
    }
}

/// Poses of every device slot for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPoses {
    poses: [DevicePose; MAX_TRACKED_DEVICES],
}

impl Default for TrackedPoses {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedPoses {
    /// All slots invalid
    pub fn new() -> Self {
        Self {
            poses: [DevicePose::default(); MAX_TRACKED_DEVICES],
        }
    }

    pub fn get(&self, index: usize) -> Option<&DevicePose> {
        self.poses.get(index)
    }

    pub fn set(&mut self, index: usize, pose: DevicePose) {
        if let Some(slot) = self.poses.get_mut(index) {
            *slot = pose;
        }
    }

    pub fn hmd(&self) -> &DevicePose {
        &self.poses[HMD_DEVICE_INDEX]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DevicePose> {
        self.poses.iter()
    }

    pub fn valid_count(&self) -> usize {
        self.poses.iter().filter(|p| p.valid).count()
    }

    /// Take every valid slot of `latest`; invalid slots keep their last pose.
    /// Returns the number of slots updated.
    pub fn retain_latest_valid(&mut self, latest: &TrackedPoses) -> usize {
        let mut updated = 0;
        for (slot, pose) in self.poses.iter_mut().zip(latest.poses.iter()) {
            if pose.valid {
                *slot = *pose;
                updated += 1;
            }
        }
        updated
    }
}

/// Normalized sub-rectangle of a submitted texture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureBounds {
    pub u_min: f32,
    pub v_min: f32,
    pub u_max: f32,
    pub v_max: f32,
}

impl TextureBounds {
    pub const FULL: Self = Self { u_min: 0.0, v_min: 0.0, u_max: 1.0, v_max: 1.0 };
    pub const LEFT_HALF: Self = Self { u_min: 0.0, v_min: 0.0, u_max: 0.5, v_max: 1.0 };
    pub const RIGHT_HALF: Self = Self { u_min: 0.5, v_min: 0.0, u_max: 1.0, v_max: 1.0 };

    /// Half of a side-by-side composite that belongs to `eye`
    pub fn for_eye(eye: Eye) -> Self {
        match eye {
            Eye::Left => Self::LEFT_HALF,
            Eye::Right => Self::RIGHT_HALF,
        }
    }
}

/// Encoding of the submitted color values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    Auto,
    #[default]
    Gamma,
    Linear,
}

/// Texture handed to the compositor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmitTexture {
    pub handle: TextureHandle,
    /// API-native identity, when the backend can expose one
    pub native: Option<NativeTexture>,
    pub color_space: ColorSpace,
}

/// An open connection to a headset and its compositor
pub trait VrSession {
    /// Per-eye render target size suggested by the runtime
    fn recommended_target_size(&self) -> (u32, u32);

    fn projection_matrix(&self, eye: Eye, near: f32, far: f32) -> Mat4;

    fn eye_to_head_transform(&self, eye: Eye) -> Mat4;

    /// Block until the compositor wants the next frame, then return its poses
    fn wait_get_poses(&mut self) -> Result<TrackedPoses, VrError>;

    /// Hand the `bounds` region of `texture` to the compositor for `eye`.
    ///
    /// The frame that wrote the texture must already be submitted to the GPU,
    /// and its last use there must have been as a copy source. On Vulkan that
    /// leaves the image in `TRANSFER_SRC_OPTIMAL`, the only layout SteamVR
    /// accepts.
    fn submit(&mut self, eye: Eye, texture: &SubmitTexture, bounds: TextureBounds) -> Result<(), VrError>;

    fn shutdown(&mut self);
}

/// Opens VR sessions
pub trait VrRuntime {
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<Box<dyn VrSession>, VrError>;
}

/// Runtime used when no headset support is compiled in
#[derive(Debug, Default)]
pub struct NoVrRuntime;

impl VrRuntime for NoVrRuntime {
    fn name(&self) -> &str {
        "none"
    }

    fn init(&mut self) -> Result<Box<dyn VrSession>, VrError> {
        Err(VrError::InitFailed(
            "built without the `openvr` feature".to_string(),
        ))
    }
}

/// The real headset runtime if compiled in, otherwise [`NoVrRuntime`]
pub fn default_runtime() -> Box<dyn VrRuntime> {
    #[cfg(feature = "openvr")]
    {
        Box::new(OpenVrRuntime::default())
    }
    #[cfg(not(feature = "openvr"))]
    {
        Box::new(NoVrRuntime)
    }
}
