//! Panorama VR - a 360° equirectangular panorama viewer
//!
//! The panorama is mapped onto the inside of a UV sphere and rendered once
//! per eye into a VR headset. Without a headset the viewer falls back to a
//! flat preview in the desktop window.
//!
//! # Layout
//! - [`backend`]: handle-based GPU abstraction with wgpu and headless backends
//! - [`resources`]: sphere mesh generation and panorama texture loading
//! - [`stereo`]: per-eye transform composition and head pose tracking
//! - [`vr`]: VR runtime boundary, with OpenVR behind the `openvr` feature
//! - [`renderer`]: the per-frame render sequence and its GPU resources
//! - [`window`]: winit host driving a [`renderer::FrameRenderer`]

pub mod backend;
pub mod error;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod stereo;
pub mod vr;
pub mod window;

pub use backend::wgpu_backend::WgpuBackend;
pub use error::{ViewerError, ViewerResult};
pub use renderer::{FrameRenderer, PanoramaRenderer};
pub use resources::{build_sphere, build_sphere_with, Mesh, MeshTopology, PoleMode, SphereOptions};
pub use stereo::StereoLayout;

use std::path::PathBuf;

/// Configuration for the viewer
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync for the desktop window
    pub vsync: bool,
    /// Equirectangular panorama; a checkerboard is shown when unset
    pub texture_path: Option<PathBuf>,
    /// Ball geometry
    pub sphere: SphereOptions,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance, must stay beyond the sphere radius
    pub far: f32,
    /// Samples per pixel of the eye targets, 1 or 4
    pub msaa_samples: u32,
    /// Offscreen size used when no headset is available
    pub default_target_size: (u32, u32),
    /// Vertical field of view of the flat preview
    pub preview_fov_y_degrees: f32,
    /// Clear color of the eye targets
    pub clear_color: [f32; 4],
    /// How the panorama image carries its views
    pub stereo_layout: StereoLayout,
    /// Turn the ball around the vertical axis to pick which longitude faces forward
    pub yaw_degrees: f32,
    /// Panoramas larger than this are downscaled on load
    pub max_texture_dimension: u32,
    /// Exit after rendering this many frames
    pub max_frames: Option<u64>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "Panorama VR".to_string(),
            width: 1280,
            height: 720,
            vsync: false,
            texture_path: None,
            sphere: SphereOptions::default(),
            near: 0.1,
            far: 5.0,
            msaa_samples: 4,
            default_target_size: (1280, 720),
            preview_fov_y_degrees: 90.0,
            clear_color: [0.4, 0.4, 0.0, 1.0],
            stereo_layout: StereoLayout::Mono,
            yaw_degrees: 0.0,
            max_texture_dimension: 8192,
            max_frames: None,
        }
    }
}

impl ViewerConfig {
    /// Reject settings the renderer cannot honor
    pub fn validate(&self) -> ViewerResult<()> {
        if !(self.near > 0.0 && self.near < self.far && self.far.is_finite()) {
            return Err(ViewerError::InvalidConfig(format!(
                "clip range must satisfy 0 < near < far, got {}..{}",
                self.near, self.far
            )));
        }
        if !matches!(self.msaa_samples, 1 | 4) {
            return Err(ViewerError::InvalidConfig(format!(
                "msaa_samples must be 1 or 4, got {}",
                self.msaa_samples
            )));
        }
        if !self.yaw_degrees.is_finite() {
            return Err(ViewerError::InvalidConfig(format!(
                "yaw must be finite, got {}",
                self.yaw_degrees
            )));
        }
        if self.default_target_size.0 == 0 || self.default_target_size.1 == 0 {
            return Err(ViewerError::InvalidConfig(
                "default_target_size must be non-zero".to_string(),
            ));
        }
        if self.sphere.radius >= self.far {
            log::warn!(
                "Sphere radius {} is beyond the far plane {}, the ball will be clipped",
                self.sphere.radius,
                self.far
            );
        }
        Ok(())
    }
}
