//! Scene placement and the preview camera

mod camera;
mod transform;

pub use camera::*;
pub use transform::*;
