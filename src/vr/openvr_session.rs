//! SteamVR headset through the `openvr` crate

use super::{
    mat34_to_mat4, mat44_to_mat4, ColorSpace, DevicePose, SubmitTexture, TextureBounds,
    TrackedPoses, VrError, VrRuntime, VrSession, MAX_TRACKED_DEVICES,
};
use crate::backend::NativeTexture;
use crate::stereo::Eye;
use glam::Mat4;
use openvr::compositor::texture;

fn to_openvr_eye(eye: Eye) -> openvr::Eye {
    match eye {
        Eye::Left => openvr::Eye::Left,
        Eye::Right => openvr::Eye::Right,
    }
}

fn to_openvr_color_space(color_space: ColorSpace) -> texture::ColorSpace {
    match color_space {
        ColorSpace::Auto => texture::ColorSpace::Auto,
        ColorSpace::Gamma => texture::ColorSpace::Gamma,
        ColorSpace::Linear => texture::ColorSpace::Linear,
    }
}

/// Opens sessions against the installed SteamVR runtime
#[derive(Debug, Default)]
pub struct OpenVrRuntime;

impl VrRuntime for OpenVrRuntime {
    fn name(&self) -> &str {
        "openvr"
    }

    fn init(&mut self) -> Result<Box<dyn VrSession>, VrError> {
        // SAFETY: one context per process; the session owns it until shutdown.
        let context = unsafe { openvr::init(openvr::ApplicationType::Scene) }
            .map_err(|e| VrError::InitFailed(format!("{:?}", e)))?;

        let system = match context.system() {
            Ok(system) => system,
            Err(e) => {
                // SAFETY: nothing derived from the context is kept.
                unsafe { context.shutdown() };
                return Err(VrError::InitFailed(format!("{:?}", e)));
            }
        };

        let compositor = match context.compositor() {
            Ok(compositor) => compositor,
            Err(e) => {
                log::error!("VR compositor unavailable: {:?}", e);
                // SAFETY: as above.
                unsafe { context.shutdown() };
                return Err(VrError::CompositorUnavailable);
            }
        };

        let (width, height) = system.recommended_render_target_size();
        log::info!("OpenVR session opened, recommended {}x{} per eye", width, height);

        Ok(Box::new(OpenVrSession {
            context: Some(context),
            system,
            compositor,
        }))
    }
}

/// Live SteamVR session
pub struct OpenVrSession {
    context: Option<openvr::Context>,
    system: openvr::System,
    compositor: openvr::Compositor,
}

impl VrSession for OpenVrSession {
    fn recommended_target_size(&self) -> (u32, u32) {
        self.system.recommended_render_target_size()
    }

    fn projection_matrix(&self, eye: Eye, near: f32, far: f32) -> Mat4 {
        mat44_to_mat4(&self.system.projection_matrix(to_openvr_eye(eye), near, far))
    }

    fn eye_to_head_transform(&self, eye: Eye) -> Mat4 {
        mat34_to_mat4(&self.system.eye_to_head_transform(to_openvr_eye(eye)))
    }

    fn wait_get_poses(&mut self) -> Result<TrackedPoses, VrError> {
        let poses = self
            .compositor
            .wait_get_poses()
            .map_err(|e| VrError::PoseWaitFailed(format!("{:?}", e)))?;

        let mut tracked = TrackedPoses::new();
        for (index, pose) in poses.render.iter().enumerate().take(MAX_TRACKED_DEVICES) {
            tracked.set(
                index,
                DevicePose {
                    device_to_absolute: mat34_to_mat4(pose.device_to_absolute_tracking()),
                    valid: pose.pose_is_valid(),
                },
            );
        }
        Ok(tracked)
    }

    fn submit(&mut self, eye: Eye, submitted: &SubmitTexture, bounds: TextureBounds) -> Result<(), VrError> {
        let Some(NativeTexture::Vulkan(image)) = submitted.native else {
            return Err(VrError::SubmitFailed(
                "texture has no Vulkan handle".to_string(),
            ));
        };

        let vr_texture = texture::Texture {
            handle: texture::Handle::Vulkan(texture::vulkan::Texture {
                image: image.image,
                device: image.device as *mut openvr::VkDevice_T,
                physical_device: image.physical_device as *mut openvr::VkPhysicalDevice_T,
                instance: image.instance as *mut openvr::VkInstance_T,
                queue: image.queue as *mut openvr::VkQueue_T,
                queue_family_index: image.queue_family_index,
                width: image.width,
                height: image.height,
                format: image.format,
                sample_count: image.sample_count,
            }),
            color_space: to_openvr_color_space(submitted.color_space),
        };
        let vr_bounds = texture::Bounds {
            min: (bounds.u_min, bounds.v_min),
            max: (bounds.u_max, bounds.v_max),
        };

        // SAFETY: the handles come from the live wgpu device, the frame's GPU
        // work was submitted before this call, and the image was last used as
        // a copy source so it sits in TRANSFER_SRC_OPTIMAL.
        unsafe {
            self.compositor
                .submit(to_openvr_eye(eye), &vr_texture, Some(&vr_bounds), None)
        }
        .map_err(|e| VrError::SubmitFailed(format!("{:?}", e)))
    }

    fn shutdown(&mut self) {
        if let Some(context) = self.context.take() {
            log::info!("Shutting down OpenVR session");
            // SAFETY: the session is the only user of the context.
            unsafe { context.shutdown() };
        }
    }
}

impl Drop for OpenVrSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
