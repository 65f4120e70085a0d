//! Panorama texture loading and upload

use crate::backend::traits::*;
use crate::backend::types::*;
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Texture loading error
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Failed to read texture {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode texture {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: image::ImageError,
    },
}

/// Loaded texture data, always tightly packed RGBA8
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let bytes = std::fs::read(path).map_err(|source| TextureError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes, &name)
    }

    /// Load texture from encoded image bytes
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, TextureError> {
        let img = image::load_from_memory(bytes).map_err(|source| TextureError::Decode {
            name: name.to_string(),
            source,
        })?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let data = img.to_rgba8().into_raw();

        // Panoramas are stored gamma encoded and stay that way through the
        // eye targets; the compositor is told the submitted image is gamma.
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data,
            name: name.to_string(),
        }
    }

    /// Equirect checkerboard used when no panorama is configured or loading fails
    pub fn checkerboard(width: u32, height: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let cell = (width / 16).max(1);
        let mut data = Vec::with_capacity((width * height * 4) as usize);

        for y in 0..height {
            for x in 0..width {
                let is_even = ((x / cell) + (y / cell)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }

        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data,
            name: "checkerboard".to_string(),
        }
    }

    /// Default fallback panorama
    pub fn fallback() -> Self {
        Self::checkerboard(1024, 512, [200, 200, 200, 255], [60, 60, 60, 255])
    }

    /// Downscale so neither edge exceeds `max_dimension`, keeping the aspect ratio
    pub fn fit_within(self, max_dimension: u32) -> Self {
        if self.width <= max_dimension && self.height <= max_dimension {
            return self;
        }

        let scale = (max_dimension as f64 / self.width as f64)
            .min(max_dimension as f64 / self.height as f64);
        let width = ((self.width as f64 * scale) as u32).clamp(1, max_dimension);
        let height = ((self.height as f64 * scale) as u32).clamp(1, max_dimension);

        let Some(buffer) = image::RgbaImage::from_raw(self.width, self.height, self.data) else {
            log::warn!("{}: pixel data does not match its size, using fallback", self.name);
            return Self::fallback().fit_within(max_dimension);
        };

        log::info!(
            "Downscaling {} from {}x{} to {}x{} to fit the device limit",
            self.name,
            self.width,
            self.height,
            width,
            height
        );
        let resized = image::imageops::resize(
            &buffer,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );

        Self {
            width,
            height,
            format: self.format,
            data: resized.into_raw(),
            name: self.name,
        }
    }
}

/// Load the configured panorama, falling back to a checkerboard
pub fn load_panorama(path: Option<&Path>) -> TextureData {
    match path {
        Some(path) => match TextureData::from_file(path) {
            Ok(data) => {
                log::info!("Loaded panorama {} ({}x{})", data.name, data.width, data.height);
                data
            }
            Err(e) => {
                log::error!("{}; using checkerboard", e);
                TextureData::fallback()
            }
        },
        None => {
            log::info!("No panorama configured; using checkerboard");
            TextureData::fallback()
        }
    }
}

/// GPU texture with its view
#[derive(Debug)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl GpuTexture {
    /// Create and upload texture to GPU
    pub fn create<B: GraphicsBackend>(backend: &mut B, data: &TextureData) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            sample_count: 1,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;

        let view = match backend.create_texture_view(handle) {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_texture(handle);
                return Err(e);
            }
        };
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self {
            handle,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
        })
    }
}
