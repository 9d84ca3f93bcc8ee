//! DZI manifest parsing and base-layer geometry.
//!
//! The manifest is a small XML document:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
//!        Format="jpeg" TileSize="254" Overlap="1">
//!   <Size Width="46920" Height="33600" />
//! </Image>
//! ```
//!
//! Unknown attributes and elements are ignored. Deep Zoom defines a chain of
//! layers where the last layer matches `(Width, Height)` and each preceding
//! layer is the ceiling half of the next, down to 1x1; only the index of the
//! last layer matters here because all smaller levels are regenerated from
//! the output file.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::RipError;

/// Tile side used when a plain raster is wrapped as a degenerate DZI.
pub const RASTER_TILE_SIZE: u32 = 256;

// =============================================================================
// Manifest
// =============================================================================

/// Parsed DZI manifest, immutable for the lifetime of a rip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Lowercase tile codec extension, e.g. "jpeg" or "png"
    pub format: String,

    /// Source tile side in pixels, excluding overlap
    pub tile_size: u32,

    /// Pixels of edge duplication on each inner tile side
    pub overlap: u32,

    /// Full image width in pixels
    pub width: u32,

    /// Full image height in pixels
    pub height: u32,
}

impl Manifest {
    /// Parse a manifest from XML text.
    ///
    /// # Errors
    /// Returns `ManifestInvalid` when the XML is malformed, a required
    /// attribute is missing, or a numeric attribute is zero where the format
    /// requires it to be positive.
    pub fn parse(xml: &str) -> Result<Self, RipError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut format: Option<String> = None;
        let mut tile_size: Option<u32> = None;
        let mut overlap: Option<u32> = None;
        let mut width: Option<u32> = None;
        let mut height: Option<u32> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"Image" => {
                        for attr in e.attributes().with_checks(false).flatten() {
                            let value = String::from_utf8_lossy(&attr.value).into_owned();
                            match attr.key.local_name().as_ref() {
                                b"Format" => format = Some(value.to_ascii_lowercase()),
                                b"TileSize" => tile_size = Some(parse_u32("TileSize", &value)?),
                                b"Overlap" => overlap = Some(parse_u32("Overlap", &value)?),
                                _ => {}
                            }
                        }
                    }
                    b"Size" => {
                        for attr in e.attributes().with_checks(false).flatten() {
                            let value = String::from_utf8_lossy(&attr.value).into_owned();
                            match attr.key.local_name().as_ref() {
                                b"Width" => width = Some(parse_u32("Width", &value)?),
                                b"Height" => height = Some(parse_u32("Height", &value)?),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(RipError::ManifestInvalid(format!("XML error: {e}")));
                }
            }
        }

        let manifest = Manifest {
            format: format.ok_or_else(|| missing("Format"))?,
            tile_size: tile_size.ok_or_else(|| missing("TileSize"))?,
            overlap: overlap.unwrap_or(0),
            width: width.ok_or_else(|| missing("Width"))?,
            height: height.ok_or_else(|| missing("Height"))?,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Wrap a plain raster as a degenerate single-layer DZI: fixed tile
    /// size, no overlap, tiles cut from the raster on demand.
    pub fn for_raster(width: u32, height: u32) -> Result<Self, RipError> {
        let manifest = Manifest {
            format: "png".to_string(),
            tile_size: RASTER_TILE_SIZE,
            overlap: 0,
            width,
            height,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), RipError> {
        if self.width == 0 || self.height == 0 {
            return Err(RipError::ManifestInvalid(format!(
                "image dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.tile_size == 0 {
            return Err(RipError::ManifestInvalid(
                "TileSize must be positive".to_string(),
            ));
        }
        if self.format.is_empty() {
            return Err(RipError::ManifestInvalid(
                "Format must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_u32(name: &str, value: &str) -> Result<u32, RipError> {
    value
        .trim()
        .parse()
        .map_err(|_| RipError::ManifestInvalid(format!("{name}: not a number: {value:?}")))
}

fn missing(name: &str) -> RipError {
    RipError::ManifestInvalid(format!("missing required attribute: {name}"))
}

// =============================================================================
// DziLayout
// =============================================================================

/// Base-layer geometry derived from a manifest.
///
/// All pixel coordinates are in base-layer (full resolution) space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DziLayout {
    /// Full image width in pixels
    pub width: u32,

    /// Full image height in pixels
    pub height: u32,

    /// Source tile side excluding overlap
    pub tile_size: u32,

    /// Overlap pixels on inner tile edges
    pub overlap: u32,

    /// DZI layer index of the full-resolution layer (layer 0 is 1x1)
    pub base_layer: u32,

    /// Source-tile columns at the base layer
    pub cols: u32,

    /// Source-tile rows at the base layer
    pub rows: u32,
}

impl DziLayout {
    /// Derive the base-layer geometry from a manifest.
    pub fn new(manifest: &Manifest) -> Self {
        DziLayout {
            width: manifest.width,
            height: manifest.height,
            tile_size: manifest.tile_size,
            overlap: manifest.overlap,
            base_layer: base_layer_index(manifest.width, manifest.height),
            cols: manifest.width.div_ceil(manifest.tile_size),
            rows: manifest.height.div_ceil(manifest.tile_size),
        }
    }

    /// Pixel origin of source tile `(col, row)`, excluding overlap.
    #[inline]
    pub fn tile_origin(&self, col: u32, row: u32) -> (u32, u32) {
        (col * self.tile_size, row * self.tile_size)
    }

    /// Rectangle of image pixels a decoded source tile actually covers.
    ///
    /// The overlap border exists only on inner edges, so a tile in the first
    /// column or row starts exactly at its origin, and the extent is clipped
    /// to the image.
    ///
    /// Returns `(x, y, width, height)`.
    pub fn tile_rect(&self, col: u32, row: u32) -> (u32, u32, u32, u32) {
        let (px, py) = self.tile_origin(col, row);
        let x = px.saturating_sub(if col > 0 { self.overlap } else { 0 });
        let y = py.saturating_sub(if row > 0 { self.overlap } else { 0 });
        let x_end = (px + self.tile_size + self.overlap).min(self.width);
        let y_end = (py + self.tile_size + self.overlap).min(self.height);
        (x, y, x_end - x, y_end - y)
    }

    /// Total number of source tiles at the base layer.
    #[inline]
    pub fn tile_count(&self) -> u64 {
        self.cols as u64 * self.rows as u64
    }
}

/// Index of the full-resolution layer in the Deep Zoom layer chain.
///
/// Built by repeatedly halving (ceiling) until 1x1; the chain length minus
/// one is the base index.
pub(crate) fn base_layer_index(width: u32, height: u32) -> u32 {
    let (mut w, mut h) = (width, height);
    let mut index = 0;
    while w > 1 || h > 1 {
        w = w.div_ceil(2);
        h = h.div_ceil(2);
        index += 1;
    }
    index
}

// =============================================================================
// Tests
// =============================================================================
