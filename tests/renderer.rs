//! Frame sequence tests for the panorama renderer.
//!
//! Everything runs on the headless backend against a fake headset, so the
//! recorded command log and the headset's call log can be checked directly.

mod common;

use common::*;
use glam::{Mat4, Vec3};
use panorama_vr::backend::{Command, GraphicsBackend, HeadlessBackend};
use panorama_vr::renderer::{FrameRenderer, RenderMode};
use panorama_vr::scene::{PreviewCamera, Transform};
use panorama_vr::stereo::{Eye, StereoLayout};
use panorama_vr::vr::{ColorSpace, FakeVrRuntime, TextureBounds};
use panorama_vr::ViewerError;
use rstest::rstest;

// ============================================================================
// Preview fallback
// ============================================================================

#[test]
fn missing_headset_falls_back_to_preview() {
    let (mut renderer, record) = preview_renderer(small_config());
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);

    assert_eq!(renderer.mode(), Some(RenderMode::Preview));
    assert!(renderer.status().is_some_and(|s| s.starts_with("VR unavailable")));
    // Sphere pass and mirror pass
    assert_eq!(draw_count(&commands), 2);
    assert!(copies(&commands).is_empty());

    let record = record.lock();
    assert_eq!(record.init_calls, 1);
    assert_eq!(record.pose_waits, 0);
    assert!(record.submits.is_empty());
}

#[test]
fn preview_uses_camera_and_placement() {
    let config = small_config();
    let (mut renderer, _record) = preview_renderer(config.clone());
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);

    let target = &renderer.resources().expect("resources").targets[0];
    assert_eq!((target.target.width, target.target.height), (64, 32));

    let uniform = uniform_written(&commands, target.uniform).expect("uniform written");
    let camera = PreviewCamera::perspective(config.preview_fov_y_degrees, 2.0, config.near, config.far);
    let expected = camera.view_projection() * Transform::z_up_to_y_up().matrix();
    assert!(uniform.transform.abs_diff_eq(expected, 1e-5));
    assert_eq!((uniform.left_eye, uniform.over_under), (0, 0));
}

// ============================================================================
// Stereo frames
// ============================================================================

#[test]
fn stereo_frame_renders_copies_and_submits_both_eyes() {
    let (mut renderer, record) = stereo_renderer(small_config());
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);

    assert_eq!(renderer.mode(), Some(RenderMode::Stereo));
    assert!(renderer.status().is_none());
    // One sphere pass per eye plus the mirror
    assert_eq!(draw_count(&commands), 3);

    // Both eyes into the composite, then the composite into the window's copy
    let copies = copies(&commands);
    assert_eq!(copies.len(), 3);
    assert_eq!(copies[0].dst_x, 0);
    assert_eq!(copies[1].dst_x, EYE_SIZE);
    assert!(copies[..2].iter().all(|c| c.width == EYE_SIZE && c.height == EYE_SIZE));
    assert_eq!((copies[2].width, copies[2].height), (EYE_SIZE * 2, EYE_SIZE));

    let composite = renderer.resources().and_then(|r| r.composite).expect("composite");
    assert_eq!((composite.width, composite.height), (EYE_SIZE * 2, EYE_SIZE));

    let record = record.lock();
    assert_eq!(record.pose_waits, 1);
    assert_eq!(record.submits.len(), 2);
    assert_eq!(record.submits[0].eye, Eye::Left);
    assert_eq!(record.submits[0].bounds, TextureBounds::LEFT_HALF);
    assert_eq!(record.submits[1].eye, Eye::Right);
    assert_eq!(record.submits[1].bounds, TextureBounds::RIGHT_HALF);
    assert!(record
        .submits
        .iter()
        .all(|s| s.texture == composite.texture && s.color_space == ColorSpace::Gamma));
}

#[test]
fn composite_ends_the_frame_as_a_copy_source() {
    let (mut renderer, _record) = stereo_renderer(small_config());
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);
    let resources = renderer.resources().expect("resources");
    let composite = resources.composite.expect("composite").texture;
    let mirror_copy = resources.mirror_copy.expect("mirror copy").texture;

    let last_use = commands
        .iter()
        .rposition(|c| match c {
            Command::CopyTexture { src, dst, .. } => *src == composite || *dst == composite,
            _ => false,
        })
        .expect("composite used");
    assert!(matches!(
        commands[last_use],
        Command::CopyTexture { src, dst, .. } if src == composite && dst == mirror_copy
    ));

    let end = commands
        .iter()
        .position(|c| matches!(c, Command::EndFrame))
        .expect("frame ended");
    assert!(last_use < end);
}

#[test]
fn eye_transform_composes_projection_offset_pose_and_model() {
    let config = small_config();
    let (mut renderer, _record) = stereo_renderer(config.clone());
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);
    let resources = renderer.resources().expect("resources");

    let projection = Mat4::perspective_rh(100f32.to_radians(), 1.0, config.near, config.far);
    let head = Mat4::from_translation(Vec3::new(0.0, -1.6, 0.0));
    let model = Transform::z_up_to_y_up().matrix();

    for (eye, offset_x) in [(Eye::Left, 0.032), (Eye::Right, -0.032)] {
        let target = resources.target_for(eye).expect("eye target");
        let uniform = uniform_written(&commands, target.uniform).expect("uniform written");
        let offset = Mat4::from_translation(Vec3::new(offset_x, 0.0, 0.0));
        let expected = projection * offset * head * model;
        assert!(
            uniform.transform.abs_diff_eq(expected, 1e-4),
            "{:?} eye transform mismatch",
            eye
        );
    }
}

#[test]
fn lost_tracking_keeps_previous_head_pose() {
    let (mut renderer, record) = stereo_renderer(small_config());
    let mut backend = headless();

    render_one(&mut renderer, &mut backend);
    let tracked = renderer.head_pose().matrix();
    assert!(tracked.abs_diff_eq(Mat4::from_translation(Vec3::new(0.0, -1.6, 0.0)), 1e-6));

    record.lock().hmd_pose = None;
    renderer.render(&mut backend, &frame(1)).expect("render");
    assert_eq!(renderer.head_pose().matrix(), tracked);

    record.lock().hmd_pose = Some(Mat4::from_translation(Vec3::new(1.0, 1.6, 0.0)));
    renderer.render(&mut backend, &frame(2)).expect("render");
    assert!(renderer
        .head_pose()
        .matrix()
        .abs_diff_eq(Mat4::from_translation(Vec3::new(-1.0, -1.6, 0.0)), 1e-6));
}

#[test]
fn retained_device_poses_survive_tracking_loss() {
    let (mut renderer, record) = stereo_renderer(small_config());
    let mut backend = headless();

    render_one(&mut renderer, &mut backend);
    assert!(renderer.device_poses().hmd().valid);
    assert_eq!(renderer.device_poses().valid_count(), 1);

    record.lock().hmd_pose = None;
    renderer.render(&mut backend, &frame(1)).expect("render");

    let hmd = renderer.device_poses().hmd();
    assert!(hmd.valid);
    assert!(hmd
        .device_to_absolute
        .abs_diff_eq(Mat4::from_translation(Vec3::new(0.0, 1.6, 0.0)), 1e-6));
}

#[test]
fn failed_pose_wait_keeps_pose_and_still_submits() {
    let (mut renderer, record) = stereo_renderer(small_config());
    let mut backend = headless();

    render_one(&mut renderer, &mut backend);
    let tracked = renderer.head_pose().matrix();

    record.lock().fail_pose_wait = true;
    renderer.render(&mut backend, &frame(1)).expect("render");
    let commands = backend.take_commands();

    assert_eq!(renderer.head_pose().matrix(), tracked);
    assert_eq!(draw_count(&commands), 3);
    let record = record.lock();
    assert_eq!(record.pose_waits, 2);
    assert_eq!(record.submits.len(), 4);
}

#[test]
fn pose_wait_failing_from_the_start_renders_from_the_origin() {
    let runtime = FakeVrRuntime::new()
        .with_target_size(EYE_SIZE, EYE_SIZE)
        .failing_pose_wait();
    let (mut renderer, record) = with_runtime(small_config(), runtime);
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);

    assert_eq!(renderer.head_pose().matrix(), Mat4::IDENTITY);
    assert_eq!(renderer.device_poses().valid_count(), 0);
    assert_eq!(draw_count(&commands), 3);
    assert_eq!(record.lock().submits.len(), 2);
}

#[test]
fn failed_submit_does_not_fail_the_frame() {
    let runtime = FakeVrRuntime::new()
        .with_target_size(EYE_SIZE, EYE_SIZE)
        .failing_submit();
    let (mut renderer, record) = with_runtime(small_config(), runtime);
    let mut backend = headless();

    render_one(&mut renderer, &mut backend);
    renderer.render(&mut backend, &frame(1)).expect("second frame");

    assert_eq!(record.lock().pose_waits, 2);
}

#[rstest]
#[case(StereoLayout::Mono, (0, 0), (0, 0))]
#[case(StereoLayout::OverUnder, (1, 1), (0, 1))]
fn stereo_layout_sets_eye_flags(
    #[case] layout: StereoLayout,
    #[case] left: (u32, u32),
    #[case] right: (u32, u32),
) {
    let config = panorama_vr::ViewerConfig {
        stereo_layout: layout,
        ..small_config()
    };
    let (mut renderer, _record) = stereo_renderer(config);
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);
    let resources = renderer.resources().expect("resources");

    for (eye, flags) in [(Eye::Left, left), (Eye::Right, right)] {
        let target = resources.target_for(eye).expect("eye target");
        let uniform = uniform_written(&commands, target.uniform).expect("uniform written");
        assert_eq!((uniform.left_eye, uniform.over_under), flags, "{:?} eye", eye);
    }
}

#[rstest]
#[case(1, false)]
#[case(4, true)]
fn eye_passes_resolve_only_when_multisampled(#[case] samples: u32, #[case] resolves: bool) {
    let config = panorama_vr::ViewerConfig {
        msaa_samples: samples,
        ..small_config()
    };
    let (mut renderer, _record) = stereo_renderer(config);
    let mut backend = headless();

    let commands = render_one(&mut renderer, &mut backend);
    let passes: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            Command::BeginRenderPass(desc) => Some(desc.clone()),
            _ => None,
        })
        .collect();

    assert_eq!(passes.len(), 3);
    for pass in &passes[..2] {
        assert_eq!(pass.color_attachments[0].resolve_target.is_some(), resolves);
        assert!(pass.depth_stencil_attachment.is_some());
    }
    // Mirror pass draws straight to the window
    assert!(passes[2].color_attachments[0].resolve_target.is_none());
    assert!(passes[2].depth_stencil_attachment.is_none());
}

#[test]
fn composite_is_clamped_to_device_limit() {
    let (mut renderer, _record) = stereo_renderer(small_config());
    let mut backend = HeadlessBackend::new(320, 240).with_max_texture_dimension(48);

    let commands = render_one(&mut renderer, &mut backend);

    let composite = renderer.resources().and_then(|r| r.composite).expect("composite");
    assert_eq!((composite.width, composite.height), (48, 24));
    let copies = copies(&commands);
    assert_eq!(copies[1].dst_x, 24);
}

#[test]
fn preview_target_keeps_aspect_on_small_devices() {
    let (mut renderer, _record) = preview_renderer(small_config());
    let mut backend = HeadlessBackend::new(320, 240).with_max_texture_dimension(32);

    render_one(&mut renderer, &mut backend);

    let target = &renderer.resources().expect("resources").targets[0];
    assert_eq!((target.target.width, target.target.height), (32, 16));
    assert_eq!(renderer.camera().aspect, 2.0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn render_before_initialize_is_an_error() {
    let (mut renderer, _record) = stereo_renderer(small_config());
    let mut backend = headless();

    let result = renderer.render(&mut backend, &frame(0));

    assert!(matches!(result, Err(ViewerError::NotInitialized)));
    assert!(backend.commands().is_empty());
}

#[test]
fn teardown_releases_resources_and_session() {
    let (mut renderer, record) = stereo_renderer(small_config());
    let mut backend = headless();

    render_one(&mut renderer, &mut backend);
    assert!(backend.live_resource_count() > 0);

    renderer.teardown(&mut backend);
    assert_eq!(backend.live_resource_count(), 0);
    assert_eq!(record.lock().shutdown_calls, 1);
    assert_eq!(renderer.mode(), None);

    drop(renderer);
    assert_eq!(record.lock().shutdown_calls, 1);
}

#[rstest]
#[case(0)]
#[case(3)]
#[case(12)]
fn failed_initialize_releases_everything(#[case] budget: usize) {
    let (mut renderer, record) = stereo_renderer(small_config());
    let mut backend = headless().fail_after(budget);

    let result = renderer.initialize(&mut backend);

    assert!(matches!(result, Err(ViewerError::Context(_))));
    assert_eq!(backend.live_resource_count(), 0);
    assert_eq!(record.lock().shutdown_calls, 1);
    assert_eq!(renderer.mode(), None);
}

#[test]
fn resize_only_touches_the_surface() {
    let (mut renderer, _record) = stereo_renderer(small_config());
    let mut backend = headless();
    render_one(&mut renderer, &mut backend);

    renderer.resize(&mut backend, 800, 600);

    assert_eq!(backend.surface_size(), (800, 600));
    let target = renderer.resources().and_then(|r| r.target_for(Eye::Left)).expect("eye target");
    assert_eq!((target.target.width, target.target.height), (EYE_SIZE, EYE_SIZE));
}

#[test]
fn dropping_without_teardown_still_closes_the_session() {
    let (mut renderer, record) = stereo_renderer(small_config());
    let mut backend = headless();
    renderer.initialize(&mut backend).expect("initialize");

    drop(renderer);

    assert_eq!(record.lock().shutdown_calls, 1);
}
