//! Top-level viewer error

use crate::backend::BackendError;
use crate::resources::{MeshError, TextureError};
use crate::vr::VrError;
use thiserror::Error;

/// Viewer error type
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error(transparent)]
    Vr(#[from] VrError),
    /// The GPU context could not provide what the viewer needs
    #[error("Graphics context failure: {0}")]
    Context(#[from] BackendError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Window system failure: {0}")]
    Window(String),
    #[error("Renderer used before initialize")]
    NotInitialized,
}

pub type ViewerResult<T> = Result<T, ViewerError>;

impl ViewerError {
    /// Whether the swapchain needs reconfiguring before the next frame
    pub fn is_surface_lost(&self) -> bool {
        matches!(self, ViewerError::Context(BackendError::SurfaceLost))
    }
}
