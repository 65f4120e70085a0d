//! Simulated headset
//!
//! Returns fixed matrices and a scripted HMD pose, and records everything the
//! renderer hands it. Used by tests and by `--fake-hmd`.

use super::{
    ColorSpace, DevicePose, SubmitTexture, TextureBounds, TrackedPoses, VrError, VrRuntime,
    VrSession, HMD_DEVICE_INDEX,
};
use crate::backend::TextureHandle;
use crate::stereo::Eye;
use glam::{Mat4, Vec3};
use parking_lot::Mutex;
use std::sync::Arc;

/// Half of the simulated interpupillary distance, in meters
const HALF_IPD: f32 = 0.032;

/// One recorded compositor submission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmittedEye {
    pub eye: Eye,
    pub texture: TextureHandle,
    pub bounds: TextureBounds,
    pub color_space: ColorSpace,
}

/// Shared log of calls into the fake runtime and its sessions
#[derive(Debug, Default)]
pub struct FakeRecord {
    pub init_calls: usize,
    pub pose_waits: usize,
    pub submits: Vec<SubmittedEye>,
    pub shutdown_calls: usize,
    /// Pose reported for the HMD; `None` reports it as not tracking
    pub hmd_pose: Option<Mat4>,
    /// While set, `wait_get_poses` returns an error
    pub fail_pose_wait: bool,
}

/// Runtime that opens [`FakeVrSession`]s
pub struct FakeVrRuntime {
    record: Arc<Mutex<FakeRecord>>,
    target_size: (u32, u32),
    fail_init: bool,
    fail_submit: bool,
}

impl Default for FakeVrRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVrRuntime {
    pub fn new() -> Self {
        let record = FakeRecord {
            hmd_pose: Some(Mat4::from_translation(Vec3::new(0.0, 1.6, 0.0))),
            ..Default::default()
        };
        Self {
            record: Arc::new(Mutex::new(record)),
            target_size: (1512, 1680),
            fail_init: false,
            fail_submit: false,
        }
    }

    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.target_size = (width, height);
        self
    }

    /// Every `init` fails, as if no headset were attached
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Every `submit` fails, as if the compositor dropped frames
    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    /// Every `wait_get_poses` fails until `fail_pose_wait` is cleared
    pub fn failing_pose_wait(self) -> Self {
        self.record.lock().fail_pose_wait = true;
        self
    }

    /// Handle to the shared call log
    pub fn record(&self) -> Arc<Mutex<FakeRecord>> {
        self.record.clone()
    }
}

impl VrRuntime for FakeVrRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    fn init(&mut self) -> Result<Box<dyn VrSession>, VrError> {
        self.record.lock().init_calls += 1;
        if self.fail_init {
            return Err(VrError::InitFailed("no fake headset attached".to_string()));
        }
        log::info!(
            "Fake HMD session opened, {}x{} per eye",
            self.target_size.0,
            self.target_size.1
        );
        Ok(Box::new(FakeVrSession {
            record: self.record.clone(),
            target_size: self.target_size,
            fail_submit: self.fail_submit,
        }))
    }
}

/// Session of the simulated headset
pub struct FakeVrSession {
    record: Arc<Mutex<FakeRecord>>,
    target_size: (u32, u32),
    fail_submit: bool,
}

impl VrSession for FakeVrSession {
    fn recommended_target_size(&self) -> (u32, u32) {
        self.target_size
    }

    fn projection_matrix(&self, _eye: Eye, near: f32, far: f32) -> Mat4 {
        let aspect = self.target_size.0 as f32 / self.target_size.1.max(1) as f32;
        Mat4::perspective_rh(100f32.to_radians(), aspect, near, far)
    }

    fn eye_to_head_transform(&self, eye: Eye) -> Mat4 {
        let x = match eye {
            Eye::Left => -HALF_IPD,
            Eye::Right => HALF_IPD,
        };
        Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
    }

    fn wait_get_poses(&mut self) -> Result<TrackedPoses, VrError> {
        let mut record = self.record.lock();
        record.pose_waits += 1;
        if record.fail_pose_wait {
            return Err(VrError::PoseWaitFailed("compositor not ready".to_string()));
        }

        let mut poses = TrackedPoses::new();
        if let Some(pose) = record.hmd_pose {
            poses.set(HMD_DEVICE_INDEX, DevicePose::valid(pose));
        }
        Ok(poses)
    }

    fn submit(&mut self, eye: Eye, texture: &SubmitTexture, bounds: TextureBounds) -> Result<(), VrError> {
        if self.fail_submit {
            return Err(VrError::SubmitFailed(format!("{:?} eye rejected", eye)));
        }
        self.record.lock().submits.push(SubmittedEye {
            eye,
            texture: texture.handle,
            bounds,
            color_space: texture.color_space,
        });
        Ok(())
    }

    fn shutdown(&mut self) {
        self.record.lock().shutdown_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_runtime_counts_attempts() {
        let mut runtime = FakeVrRuntime::new().failing_init();
        let record = runtime.record();
        assert!(runtime.init().is_err());
        assert_eq!(record.lock().init_calls, 1);
    }

    #[test]
    fn eyes_are_offset_symmetrically() {
        let mut runtime = FakeVrRuntime::new();
        let session = runtime.init().unwrap();
        let left = session.eye_to_head_transform(Eye::Left).w_axis.x;
        let right = session.eye_to_head_transform(Eye::Right).w_axis.x;
        assert_eq!(left, -right);
        assert!(right > 0.0);
    }

    #[test]
    fn scripted_pose_can_drop_out() {
        let mut runtime = FakeVrRuntime::new();
        let record = runtime.record();
        let mut session = runtime.init().unwrap();

        assert!(session.wait_get_poses().unwrap().hmd().valid);
        record.lock().hmd_pose = None;
        assert!(!session.wait_get_poses().unwrap().hmd().valid);
        assert_eq!(record.lock().pose_waits, 2);
    }

    #[test]
    fn pose_wait_can_fail_and_recover() {
        let mut runtime = FakeVrRuntime::new().failing_pose_wait();
        let record = runtime.record();
        let mut session = runtime.init().unwrap();

        assert!(matches!(session.wait_get_poses(), Err(VrError::PoseWaitFailed(_))));
        record.lock().fail_pose_wait = false;
        assert!(session.wait_get_poses().is_ok());
        assert_eq!(record.lock().pose_waits, 2);
    }
}
