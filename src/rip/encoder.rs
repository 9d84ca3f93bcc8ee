//! JPEG encoding of output tiles.
//!
//! Each output tile is one RGB8 canvas encoded as a baseline YCbCr JPEG at
//! a fixed quality. With shared quantization tables enabled, the tables are
//! computed once, published through the IFD's `JPEGTables` field, and every
//! per-tile stream has its own DQT segments stripped; otherwise each tile
//! is a self-contained JPEG.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::RipError;
use crate::format::jpeg::{shared_quant_tables, strip_quant_tables};

/// Default JPEG quality for output tiles.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Encoder for output tiles at a fixed quality.
pub struct TileEncoder {
    quality: u8,
    shared_tables: Option<Bytes>,
}

impl TileEncoder {
    /// Create an encoder.
    ///
    /// # Errors
    /// Rejects qualities outside `1..=100`.
    pub fn new(quality: u8, use_shared_tables: bool) -> Result<Self, RipError> {
        if quality == 0 || quality > 100 {
            return Err(RipError::InvalidArgument(format!(
                "JPEG quality must be between 1 and 100, got {quality}"
            )));
        }

        let shared_tables = use_shared_tables.then(|| shared_quant_tables(quality));
        Ok(TileEncoder {
            quality,
            shared_tables,
        })
    }

    /// The `JPEGTables` stream, when shared tables are enabled.
    pub fn jpeg_tables(&self) -> Option<&Bytes> {
        self.shared_tables.as_ref()
    }

    /// Configured output quality.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode one canvas into a tile blob ready for appending.
    pub fn encode(&self, canvas: &RgbImage) -> Result<Bytes, RipError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode_image(canvas)
            .map_err(|e| RipError::EncodeFailed(e.to_string()))?;

        Ok(match self.shared_tables {
            Some(_) => strip_quant_tables(&buf),
            None => Bytes::from(buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::jpeg::{has_quant_tables, merge_jpeg_tables};
    use image::Rgb;

    fn canvas() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
    }

    #[test]
    fn test_rejects_bad_quality() {
        assert!(TileEncoder::new(0, false).is_err());
        assert!(TileEncoder::new(101, false).is_err());
        assert!(TileEncoder::new(1, false).is_ok());
        assert!(TileEncoder::new(100, false).is_ok());
    }

    #[test]
    fn test_self_contained_tiles() {
        let encoder = TileEncoder::new(75, false).unwrap();
        assert!(encoder.jpeg_tables().is_none());

        let tile = encoder.encode(&canvas()).unwrap();
        assert!(has_quant_tables(&tile));

        let decoded = image::load_from_memory(&tile).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
    }

    #[test]
    fn test_shared_table_tiles_are_abbreviated() {
        let encoder = TileEncoder::new(75, true).unwrap();
        let tables = encoder.jpeg_tables().unwrap().clone();

        let tile = encoder.encode(&canvas()).unwrap();
        assert!(!has_quant_tables(&tile));

        // Merging the published tables back yields a decodable stream.
        let merged = merge_jpeg_tables(&tables, &tile);
        let decoded = image::load_from_memory(&merged).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
    }

    #[test]
    fn test_shared_tables_decode_matches_self_contained() {
        // Stripping DQT must not change decoded pixels: the published
        // tables are the same tables the encoder used.
        let plain = TileEncoder::new(80, false).unwrap();
        let shared = TileEncoder::new(80, true).unwrap();

        let img = canvas();
        let full = plain.encode(&img).unwrap();
        let abbreviated = shared.encode(&img).unwrap();
        let merged = merge_jpeg_tables(shared.jpeg_tables().unwrap(), &abbreviated);

        let from_full = image::load_from_memory(&full).unwrap().to_rgb8();
        let from_merged = image::load_from_memory(&merged).unwrap().to_rgb8();
        assert_eq!(from_full.as_raw(), from_merged.as_raw());
    }

    #[test]
    fn test_deterministic_output() {
        let encoder = TileEncoder::new(75, false).unwrap();
        let a = encoder.encode(&canvas()).unwrap();
        let b = encoder.encode(&canvas()).unwrap();
        assert_eq!(a, b);
    }
}
