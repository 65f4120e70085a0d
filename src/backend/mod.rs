//! Backend abstraction layer
//!
//! Provides the handle-based traits and types the renderer draws through.
//! `WgpuBackend` drives a window; `HeadlessBackend` records commands instead
//! of executing them.

pub mod headless;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use headless::{Command, HeadlessBackend};
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
