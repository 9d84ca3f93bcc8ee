//! Shared fixtures: synthetic DZI trees and instrumented sources.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};

/// Deterministic reference pixel used by every synthetic image.
///
/// Smooth gradients keep JPEG round-trip error small, so decoded output can
/// be compared against this function with a tight tolerance.
pub fn reference_pixel(x: u32, y: u32) -> Rgb<u8> {
    Rgb([
        ((x / 4) % 256) as u8,
        ((y / 4) % 256) as u8,
        (((x + y) / 8) % 256) as u8,
    ])
}

/// Build the full reference image.
pub fn reference_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, reference_pixel)
}

/// Rectangle of image pixels a DZI tile covers, overlap included on inner
/// edges only and clipped to the image.
pub fn dzi_tile_rect(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    col: u32,
    row: u32,
) -> (u32, u32, u32, u32) {
    let px = col * tile_size;
    let py = row * tile_size;
    let x = px.saturating_sub(if col > 0 { overlap } else { 0 });
    let y = py.saturating_sub(if row > 0 { overlap } else { 0 });
    let x_end = (px + tile_size + overlap).min(width);
    let y_end = (py + tile_size + overlap).min(height);
    (x, y, x_end - x, y_end - y)
}

/// Encode one DZI tile of the reference image as PNG bytes.
pub fn render_tile_png(
    image: &RgbImage,
    tile_size: u32,
    overlap: u32,
    col: u32,
    row: u32,
) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let (x, y, w, h) = dzi_tile_rect(width, height, tile_size, overlap, col, row);
    let view = image::imageops::crop_imm(image, x, y, w, h).to_image();
    let mut buf = Vec::new();
    view.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Write a complete DZI (manifest + base-layer `_files` tree) of the
/// reference image into `dir`. Only the base layer is materialized; the
/// ripper never requests any other layer.
///
/// Returns the manifest path.
pub fn write_synthetic_dzi(
    dir: &Path,
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
) -> PathBuf {
    let image = reference_image(width, height);
    let base_layer = base_layer_index(width, height);

    let manifest_path = dir.join("scan.dzi");
    std::fs::write(
        &manifest_path,
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       Format="png" TileSize="{tile_size}" Overlap="{overlap}">
  <Size Width="{width}" Height="{height}" />
</Image>"#
        ),
    )
    .unwrap();

    let layer_dir = dir.join("scan_files").join(base_layer.to_string());
    std::fs::create_dir_all(&layer_dir).unwrap();

    for row in 0..height.div_ceil(tile_size) {
        for col in 0..width.div_ceil(tile_size) {
            let bytes = render_tile_png(&image, tile_size, overlap, col, row);
            std::fs::write(layer_dir.join(format!("{col}_{row}.png")), bytes).unwrap();
        }
    }

    manifest_path
}

/// Deep Zoom layer index of the full-resolution layer.
pub fn base_layer_index(width: u32, height: u32) -> u32 {
    let (mut w, mut h) = (width, height);
    let mut index = 0;
    while w > 1 || h > 1 {
        w = w.div_ceil(2);
        h = h.div_ceil(2);
        index += 1;
    }
    index
}

/// Largest absolute per-channel difference between two images.
pub fn max_channel_diff(a: &RgbImage, b: &RgbImage) -> u8 {
    assert_eq!(a.dimensions(), b.dimensions());
    a.pixels()
        .zip(b.pixels())
        .flat_map(|(pa, pb)| {
            pa.0.iter()
                .zip(pb.0.iter())
                .map(|(&ca, &cb)| ca.abs_diff(cb))
        })
        .max()
        .unwrap_or(0)
}
