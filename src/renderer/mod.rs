//! Panorama rendering
//!
//! [`PanoramaRenderer`] runs the per-frame sequence against any
//! [`GraphicsBackend`]: per-eye sphere passes into the headset when a VR
//! session is open, a single flat preview pass otherwise. A window pass
//! mirrors the result either way.

mod resources;
mod shaders;

pub use resources::{
    CompositeTexture, EyeTarget, LedgerEntry, MeshBuffers, OffscreenTarget, RenderResources,
    ResourceLedger, ResourceSettings, TargetLayout,
};
pub use shaders::{MIRROR_SHADER, SPHERE_SHADER};

use crate::backend::*;
use crate::error::{ViewerError, ViewerResult};
use crate::resources::{build_sphere_with, load_panorama, Mesh};
use crate::scene::PreviewCamera;
use crate::stereo::{Eye, EyeTransform, HeadPose, ModelPlacement};
use crate::vr::{ColorSpace, SubmitTexture, TextureBounds, TrackedPoses, VrRuntime, VrSession};
use crate::ViewerConfig;

/// Per-frame information from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
}

/// Callbacks a host drives on its render thread.
///
/// `initialize` runs once the graphics context exists, `render` once per
/// frame, and `teardown` before the context is destroyed.
pub trait FrameRenderer<B: GraphicsBackend> {
    fn initialize(&mut self, backend: &mut B) -> ViewerResult<()>;

    fn resize(&mut self, backend: &mut B, width: u32, height: u32);

    fn render(&mut self, backend: &mut B, frame: &HostFrame) -> ViewerResult<()>;

    fn teardown(&mut self, backend: &mut B);

    /// Short user-facing note about the renderer state, e.g. a missing headset
    fn status(&self) -> Option<&str> {
        None
    }
}

/// Where frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Both eyes into the VR compositor
    Stereo,
    /// Flat preview in the desktop window
    Preview,
}

/// Renders the panorama ball
pub struct PanoramaRenderer {
    config: ViewerConfig,
    runtime: Box<dyn VrRuntime>,
    session: Option<Box<dyn VrSession>>,
    mesh: Mesh,
    placement: ModelPlacement,
    head_pose: HeadPose,
    /// Last valid pose of every tracked device
    device_poses: TrackedPoses,
    eyes: Vec<EyeTransform>,
    camera: PreviewCamera,
    resources: Option<RenderResources>,
    status: Option<String>,
}

impl PanoramaRenderer {
    pub fn new(config: ViewerConfig, runtime: Box<dyn VrRuntime>) -> ViewerResult<Self> {
        config.validate()?;
        let mesh = build_sphere_with(&config.sphere)?;
        log::info!(
            "Sphere mesh: {} vertices, {} indices ({:?}, {:?} poles)",
            mesh.vertex_count(),
            mesh.index_count(),
            config.sphere.topology,
            config.sphere.poles
        );

        let placement = ModelPlacement::z_up_to_y_up().with_yaw(config.yaw_degrees.to_radians());
        let (width, height) = config.default_target_size;
        let camera = PreviewCamera::perspective(
            config.preview_fov_y_degrees,
            width as f32 / height as f32,
            config.near,
            config.far,
        );

        Ok(Self {
            config,
            runtime,
            session: None,
            mesh,
            placement,
            head_pose: HeadPose::new(),
            device_poses: TrackedPoses::new(),
            eyes: Vec::new(),
            camera,
            resources: None,
            status: None,
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn head_pose(&self) -> &HeadPose {
        &self.head_pose
    }

    pub fn device_poses(&self) -> &TrackedPoses {
        &self.device_poses
    }

    pub fn camera(&self) -> &PreviewCamera {
        &self.camera
    }

    pub fn placement(&self) -> &ModelPlacement {
        &self.placement
    }

    pub fn set_placement(&mut self, placement: ModelPlacement) {
        self.placement = placement;
    }

    /// Set when the headset could not be opened
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn resources(&self) -> Option<&RenderResources> {
        self.resources.as_ref()
    }

    /// `None` until initialized
    pub fn mode(&self) -> Option<RenderMode> {
        self.resources.as_ref().map(|_| {
            if self.session.is_some() {
                RenderMode::Stereo
            } else {
                RenderMode::Preview
            }
        })
    }

    /// Open a VR session if possible. Failure leaves the renderer in preview mode.
    fn open_session(&mut self) {
        match self.runtime.init() {
            Ok(session) => {
                self.eyes = Eye::BOTH
                    .iter()
                    .map(|&eye| EyeTransform::from_session(session.as_ref(), eye, self.config.near, self.config.far))
                    .collect();
                self.session = Some(session);
                self.status = None;
            }
            Err(e) => {
                log::error!("VR unavailable ({} runtime): {}", self.runtime.name(), e);
                log::info!("Falling back to flat preview");
                self.status = Some(format!("VR unavailable: {}", e));
            }
        }
    }

    fn target_layout(&self, max_dimension: u32) -> TargetLayout {
        match &self.session {
            Some(session) => {
                let recommended = session.recommended_target_size();
                // The composite holds both eyes side by side
                let (eye_width, eye_height) = fit_size(recommended, (max_dimension / 2, max_dimension));
                if (eye_width, eye_height) != recommended {
                    log::warn!(
                        "Recommended eye size {}x{} exceeds the device limit, using {}x{}",
                        recommended.0,
                        recommended.1,
                        eye_width,
                        eye_height
                    );
                }
                TargetLayout::Stereo { eye_width, eye_height }
            }
            None => {
                let (width, height) = fit_size(self.config.default_target_size, (max_dimension, max_dimension));
                TargetLayout::Preview { width, height }
            }
        }
    }

    fn shutdown_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
        self.eyes.clear();
    }

    fn render_stereo<B: GraphicsBackend>(&mut self, backend: &mut B) -> ViewerResult<()> {
        let (Some(session), Some(resources)) = (self.session.as_mut(), self.resources.as_ref()) else {
            return Err(ViewerError::NotInitialized);
        };
        let (Some(composite), Some(mirror_copy)) = (resources.composite, resources.mirror_copy) else {
            return Err(ViewerError::NotInitialized);
        };

        match session.wait_get_poses() {
            Ok(poses) => {
                self.device_poses.retain_latest_valid(&poses);
                self.head_pose.update(&poses);
            }
            Err(e) => log::warn!("{}; keeping previous poses", e),
        }

        let frame = backend.begin_frame()?;
        let model = self.placement.matrix();

        for eye_transform in &self.eyes {
            let eye = eye_transform.eye;
            let Some(target) = resources.target_for(eye) else {
                continue;
            };
            let (left_eye, over_under) = self.config.stereo_layout.shader_flags(eye);
            let uniform = TransformUniform::new(eye_transform.compose(&self.head_pose, model), left_eye, over_under);
            draw_sphere(backend, resources, target, &uniform, self.config.clear_color, eye_label(eye));

            backend.copy_texture_to_texture(
                target.target.resolve,
                composite.texture,
                TextureCopy {
                    width: target.target.width,
                    height: target.target.height,
                    dst_x: eye.composite_offset(target.target.width),
                    dst_y: 0,
                },
            );
        }

        // The composite's last use before submit must be as a copy source
        backend.copy_texture_to_texture(
            composite.texture,
            mirror_copy.texture,
            TextureCopy {
                width: composite.width,
                height: composite.height,
                dst_x: 0,
                dst_y: 0,
            },
        );
        draw_mirror(backend, resources, &frame);
        backend.end_frame()?;

        let submitted = SubmitTexture {
            handle: composite.texture,
            native: backend.native_texture(composite.texture),
            color_space: ColorSpace::Gamma,
        };
        for eye in Eye::BOTH {
            if let Err(e) = session.submit(eye, &submitted, TextureBounds::for_eye(eye)) {
                log::warn!("{:?} eye: {}", eye, e);
            }
        }

        Ok(())
    }

    fn render_preview<B: GraphicsBackend>(&mut self, backend: &mut B) -> ViewerResult<()> {
        let Some(resources) = self.resources.as_ref() else {
            return Err(ViewerError::NotInitialized);
        };
        let Some(target) = resources.targets.first() else {
            return Err(ViewerError::NotInitialized);
        };

        let frame = backend.begin_frame()?;

        let transform = self.camera.view_projection() * self.head_pose.matrix() * self.placement.matrix();
        let (left_eye, over_under) = self.config.stereo_layout.shader_flags(Eye::Left);
        let uniform = TransformUniform::new(transform, left_eye, over_under);
        draw_sphere(backend, resources, target, &uniform, self.config.clear_color, "Preview Pass");

        draw_mirror(backend, resources, &frame);
        backend.end_frame()?;
        Ok(())
    }
}

/// Shrink `size` to fit `limit`, keeping its aspect ratio
fn fit_size(size: (u32, u32), limit: (u32, u32)) -> (u32, u32) {
    let (width, height) = (size.0.max(1), size.1.max(1));
    let (max_width, max_height) = (limit.0.max(1), limit.1.max(1));
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = (max_width as f32 / width as f32).min(max_height as f32 / height as f32);
    (
        ((width as f32 * scale) as u32).clamp(1, max_width),
        ((height as f32 * scale) as u32).clamp(1, max_height),
    )
}

fn eye_label(eye: Eye) -> &'static str {
    match eye {
        Eye::Left => "Left Eye Pass",
        Eye::Right => "Right Eye Pass",
    }
}

/// One sphere pass into an offscreen target
fn draw_sphere<B: GraphicsBackend>(
    backend: &mut B,
    resources: &RenderResources,
    target: &EyeTarget,
    uniform: &TransformUniform,
    clear_color: [f32; 4],
    label: &str,
) {
    backend.write_buffer(target.uniform, 0, bytemuck::bytes_of(uniform));

    backend.begin_render_pass(&target.target.pass_descriptor(label, clear_color));
    backend.set_viewport(0.0, 0.0, target.target.width as f32, target.target.height as f32, 0.0, 1.0);
    backend.set_render_pipeline(resources.sphere_pipeline);
    backend.set_bind_group(0, target.transform_bind_group);
    backend.set_bind_group(1, resources.panorama_bind_group);
    resources.sphere.bind(backend);
    backend.draw_indexed(0..resources.sphere.index_count, 0, 0..1);
    backend.end_render_pass();
}

/// Quad pass showing the mirror source in the window
fn draw_mirror<B: GraphicsBackend>(backend: &mut B, resources: &RenderResources, frame: &FrameContext) {
    backend.begin_render_pass(&RenderPassDescriptor {
        label: Some("Mirror Pass".into()),
        color_attachments: vec![ColorAttachment {
            view: frame.swapchain_view,
            resolve_target: None,
            load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
            store_op: StoreOp::Store,
        }],
        depth_stencil_attachment: None,
    });
    backend.set_render_pipeline(resources.mirror_pipeline);
    backend.set_bind_group(0, resources.mirror_bind_group);
    resources.quad.bind(backend);
    backend.draw_indexed(0..resources.quad.index_count, 0, 0..1);
    backend.end_render_pass();
}

impl<B: GraphicsBackend> FrameRenderer<B> for PanoramaRenderer {
    fn initialize(&mut self, backend: &mut B) -> ViewerResult<()> {
        if self.resources.is_some() {
            log::warn!("Renderer already initialized");
            return Ok(());
        }

        self.open_session();

        let max_dimension = backend.max_texture_dimension();
        let panorama = load_panorama(self.config.texture_path.as_deref())
            .fit_within(self.config.max_texture_dimension.min(max_dimension));

        let settings = ResourceSettings {
            layout: self.target_layout(max_dimension),
            msaa_samples: self.config.msaa_samples,
        };
        if let TargetLayout::Preview { width, height } = settings.layout {
            self.camera.set_aspect(width, height);
        }
        log::info!("Render targets: {:?}, {}x MSAA", settings.layout, settings.msaa_samples);

        match RenderResources::create(backend, &settings, &self.mesh, &panorama) {
            Ok(resources) => {
                self.resources = Some(resources);
                Ok(())
            }
            Err(e) => {
                self.shutdown_session();
                Err(ViewerError::Context(e))
            }
        }
    }

    fn resize(&mut self, backend: &mut B, width: u32, height: u32) {
        // Offscreen targets keep their size; only the window surface follows
        backend.resize(width, height);
    }

    fn render(&mut self, backend: &mut B, frame: &HostFrame) -> ViewerResult<()> {
        if frame.index == 0 {
            log::debug!("First frame at {}x{}", frame.width, frame.height);
        }
        match self.mode() {
            Some(RenderMode::Stereo) => self.render_stereo(backend),
            Some(RenderMode::Preview) => self.render_preview(backend),
            None => Err(ViewerError::NotInitialized),
        }
    }

    fn teardown(&mut self, backend: &mut B) {
        if let Some(resources) = self.resources.take() {
            resources.destroy(backend);
        }
        self.shutdown_session();
    }

    fn status(&self) -> Option<&str> {
        PanoramaRenderer::status(self)
    }
}

impl Drop for PanoramaRenderer {
    fn drop(&mut self) {
        self.shutdown_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_size_keeps_small_sizes() {
        assert_eq!(fit_size((1280, 720), (8192, 8192)), (1280, 720));
        assert_eq!(fit_size((0, 720), (8192, 8192)), (1, 720));
    }

    #[test]
    fn fit_size_keeps_aspect_ratio() {
        assert_eq!(fit_size((1280, 720), (640, 640)), (640, 360));
        assert_eq!(fit_size((32, 32), (24, 48)), (24, 24));
        assert_eq!(fit_size((4000, 10), (100, 100)), (100, 1));
    }
}
