//! Panorama loading from disk.

use image::{ImageBuffer, Rgb, RgbImage};
use panorama_vr::backend::TextureFormat;
use panorama_vr::resources::{load_panorama, TextureData, TextureError};
use std::io::Write;

fn write_panorama(dir: &tempfile::TempDir, name: &str, width: u32, height: u32) -> std::path::PathBuf {
    let image: RgbImage = ImageBuffer::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 0, 255])
        }
    });
    let path = dir.path().join(name);
    image.save(&path).expect("write test image");
    path
}

#[test]
fn loads_png_as_rgba() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_panorama(&dir, "pano.png", 64, 32);

    let texture = TextureData::from_file(&path).expect("load");

    assert_eq!((texture.width, texture.height), (64, 32));
    assert_eq!(texture.format, TextureFormat::Rgba8Unorm);
    assert_eq!(texture.data.len(), 64 * 32 * 4);
    assert_eq!(&texture.data[..4], &[255, 0, 0, 255]);
    let last = texture.data.len() - 4;
    assert_eq!(&texture.data[last..], &[0, 0, 255, 255]);
}

#[test]
fn load_panorama_reads_existing_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_panorama(&dir, "pano.png", 128, 64);

    let texture = load_panorama(Some(path.as_path()));

    assert_eq!((texture.width, texture.height), (128, 64));
}

#[test]
fn corrupt_file_is_a_decode_error_and_falls_back() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.png");
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(b"definitely not a png").expect("write");
    drop(file);

    assert!(matches!(TextureData::from_file(&path), Err(TextureError::Decode { .. })));

    let fallback = load_panorama(Some(path.as_path()));
    let expected = TextureData::fallback();
    assert_eq!((fallback.width, fallback.height), (expected.width, expected.height));
}

#[test]
fn large_panorama_is_downscaled_to_limit() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_panorama(&dir, "wide.png", 256, 128);

    let texture = TextureData::from_file(&path).expect("load").fit_within(64);

    assert_eq!((texture.width, texture.height), (64, 32));
    assert_eq!(texture.data.len(), 64 * 32 * 4);
}
