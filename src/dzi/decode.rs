//! Source tile decoding.

use std::io::Cursor;

use image::{ImageFormat, ImageReader, RgbImage};

use crate::error::RipError;

/// Decode fetched tile bytes into an owned RGB8 raster.
///
/// The image keeps its natural stored dimensions, which for edge tiles are
/// smaller than `tile_size + 2 * overlap`. There is no partial decode: a
/// malformed tile surfaces as `DecodeFailed`.
pub fn decode_tile(bytes: &[u8], format: &str) -> Result<RgbImage, RipError> {
    let cursor = Cursor::new(bytes);

    let image = match tile_format(format) {
        Some(fmt) => ImageReader::with_format(cursor, fmt).decode(),
        None => ImageReader::new(cursor)
            .with_guessed_format()
            .map_err(|e| RipError::DecodeFailed(e.to_string()))?
            .decode(),
    }
    .map_err(|e| RipError::DecodeFailed(e.to_string()))?;

    Ok(image.to_rgb8())
}

/// Map the manifest `Format` attribute to a concrete codec.
///
/// Unknown values fall back to content sniffing.
fn tile_format(format: &str) -> Option<ImageFormat> {
    match format {
        "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        _ => None,
    }
}
