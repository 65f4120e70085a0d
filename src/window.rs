//! Window host using winit
//!
//! Owns the event loop, the window and the wgpu backend, and drives a
//! [`FrameRenderer`] through its lifecycle.

use crate::backend::{BackendError, GraphicsBackend, WgpuBackend};
use crate::error::{ViewerError, ViewerResult};
use crate::renderer::{FrameRenderer, HostFrame};
use crate::ViewerConfig;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

const VR_FAILURE_TITLE: &str = "Unable to init VR";

/// Title and body of the dialog shown when the renderer reports a problem
fn failure_dialog(status: Option<&str>) -> Option<(&'static str, String)> {
    status.map(|status| {
        (
            VR_FAILURE_TITLE,
            format!("{}\n\nThe panorama will be shown in the window instead.", status),
        )
    })
}

/// Block until the user dismisses the error dialog
fn show_failure_dialog(title: &str, description: &str) {
    log::info!("Showing dialog: {}", title);
    let _ = rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title(title)
        .set_description(description)
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

fn window_title(config: &ViewerConfig, status: Option<&str>) -> String {
    match status {
        Some(status) => format!("{} - {}", config.title, status),
        None => config.title.clone(),
    }
}

/// Open the window and run `renderer` until the window closes.
///
/// Errors from window, backend or renderer initialization are returned, as is
/// any frame error the renderer cannot recover from.
pub fn run<R>(config: &ViewerConfig, mut renderer: R) -> ViewerResult<()>
where
    R: FrameRenderer<WgpuBackend> + 'static,
{
    let event_loop = EventLoop::new().map_err(|e| ViewerError::Window(e.to_string()))?;
    let window: Arc<WinitWindow> = Arc::new(
        WindowBuilder::new()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(&event_loop)
            .map_err(|e| ViewerError::Window(e.to_string()))?,
    );

    let mut backend = WgpuBackend::new(window.clone(), config.vsync)?;
    log::info!(
        "Surface {:?} at {}x{}",
        backend.swapchain_format(),
        backend.surface_size().0,
        backend.surface_size().1
    );

    renderer.initialize(&mut backend)?;
    window.set_title(&window_title(config, renderer.status()));
    if let Some((title, description)) = failure_dialog(renderer.status()) {
        show_failure_dialog(title, &description);
    }

    let fatal: Rc<RefCell<Option<ViewerError>>> = Rc::new(RefCell::new(None));
    let fatal_in_loop = fatal.clone();
    let mut backend = Some(backend);
    let mut frame_index: u64 = 0;
    let max_frames = config.max_frames;

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        elwt.exit();
                    }
                    WindowEvent::Resized(size) => {
                        if let Some(backend) = backend.as_mut() {
                            renderer.resize(backend, size.width, size.height);
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        let Some(backend) = backend.as_mut() else {
                            return;
                        };
                        let (width, height) = backend.surface_size();
                        let frame = HostFrame {
                            index: frame_index,
                            width,
                            height,
                        };
                        frame_index += 1;

                        match renderer.render(backend, &frame) {
                            Ok(()) => {
                                if max_frames.is_some_and(|max| frame_index >= max) {
                                    log::info!("Rendered {} frames, exiting", frame_index);
                                    elwt.exit();
                                }
                            }
                            Err(e) if e.is_surface_lost() => {
                                let size = window.inner_size();
                                renderer.resize(backend, size.width, size.height);
                            }
                            Err(ViewerError::Context(BackendError::AcquireImageFailed(reason))) => {
                                log::warn!("Skipping frame {}: {}", frame.index, reason);
                            }
                            Err(e) => {
                                log::error!("Frame {} failed: {}", frame.index, e);
                                *fatal_in_loop.borrow_mut() = Some(e);
                                elwt.exit();
                            }
                        }
                    }
                    _ => {}
                },
                Event::AboutToWait => {
                    window.request_redraw();
                }
                Event::LoopExiting => {
                    // Release GPU resources while the device is still alive
                    if let Some(mut backend) = backend.take() {
                        renderer.teardown(&mut backend);
                    }
                }
                _ => {}
            }
        })
        .map_err(|e| ViewerError::Window(e.to_string()))?;

    let result = fatal.borrow_mut().take();
    match result {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_reports_status() {
        let config = ViewerConfig::default();
        assert_eq!(window_title(&config, None), "Panorama VR");
        assert_eq!(
            window_title(&config, Some("VR unavailable")),
            "Panorama VR - VR unavailable"
        );
    }

    #[test]
    fn dialog_only_when_renderer_reports_a_problem() {
        assert!(failure_dialog(None).is_none());

        let (title, description) = failure_dialog(Some("VR unavailable: no headset")).unwrap();
        assert_eq!(title, "Unable to init VR");
        assert!(description.starts_with("VR unavailable: no headset"));
    }
}
