//! Shared setup for the renderer integration tests.

#![allow(dead_code)]

use panorama_vr::backend::{BufferHandle, Command, HeadlessBackend, TextureCopy, TransformUniform};
use panorama_vr::renderer::{FrameRenderer, HostFrame, PanoramaRenderer};
use panorama_vr::vr::{FakeRecord, FakeVrRuntime, VrRuntime};
use panorama_vr::{SphereOptions, ViewerConfig};
use parking_lot::Mutex;
use std::sync::Arc;

pub const EYE_SIZE: u32 = 32;

/// Small targets and a coarse ball so every frame stays cheap to inspect
pub fn small_config() -> ViewerConfig {
    ViewerConfig {
        sphere: SphereOptions::new(2.0, 8, 4),
        default_target_size: (64, 32),
        max_texture_dimension: 256,
        ..Default::default()
    }
}

pub fn headless() -> HeadlessBackend {
    HeadlessBackend::new(320, 240)
}

pub fn frame(index: u64) -> HostFrame {
    HostFrame {
        index,
        width: 320,
        height: 240,
    }
}

/// Renderer wired to a fake headset, plus the headset's call log
pub fn stereo_renderer(config: ViewerConfig) -> (PanoramaRenderer, Arc<Mutex<FakeRecord>>) {
    with_runtime(config, FakeVrRuntime::new().with_target_size(EYE_SIZE, EYE_SIZE))
}

/// Renderer whose headset never opens
pub fn preview_renderer(config: ViewerConfig) -> (PanoramaRenderer, Arc<Mutex<FakeRecord>>) {
    with_runtime(config, FakeVrRuntime::new().failing_init())
}

pub fn with_runtime(config: ViewerConfig, runtime: FakeVrRuntime) -> (PanoramaRenderer, Arc<Mutex<FakeRecord>>) {
    let record = runtime.record();
    let runtime: Box<dyn VrRuntime> = Box::new(runtime);
    let renderer = PanoramaRenderer::new(config, runtime).expect("valid config");
    (renderer, record)
}

/// Initialize, drop the setup commands and render one frame
pub fn render_one(renderer: &mut PanoramaRenderer, backend: &mut HeadlessBackend) -> Vec<Command> {
    renderer.initialize(backend).expect("initialize");
    backend.take_commands();
    renderer.render(backend, &frame(0)).expect("render");
    backend.take_commands()
}

pub fn draw_count(commands: &[Command]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, Command::DrawIndexed { .. }))
        .count()
}

pub fn copies(commands: &[Command]) -> Vec<TextureCopy> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::CopyTexture { copy, .. } => Some(*copy),
            _ => None,
        })
        .collect()
}

/// Last uniform written to `buffer`
pub fn uniform_written(commands: &[Command], buffer: BufferHandle) -> Option<TransformUniform> {
    commands.iter().rev().find_map(|c| match c {
        Command::WriteBuffer { buffer: b, data, .. } if *b == buffer => {
            Some(bytemuck::pod_read_unaligned::<TransformUniform>(data))
        }
        _ => None,
    })
}
