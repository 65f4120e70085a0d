//! Resource management
//!
//! Sphere and quad meshes, and the panorama texture.

mod mesh;
mod texture;

pub use mesh::*;
pub use texture::*;
