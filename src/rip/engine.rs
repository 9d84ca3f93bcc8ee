//! Rip orchestration: manifest to finished pyramid TIFF.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dzi::{DziLayout, DziSource, FetchMetrics};
use crate::error::RipError;
use crate::format::tiff::{use_big_tiff, TiffWriter};

use super::base::write_base_layer;
use super::encoder::TileEncoder;
use super::progress::ProgressSink;
use super::pyramid::write_reduced_layers;

/// Default output-tile side in pixels.
pub const DEFAULT_OUTPUT_TILE: u32 = 256;

/// Largest accepted output-tile side.
pub const MAX_OUTPUT_TILE: u32 = 16384;

// =============================================================================
// Options
// =============================================================================

/// Engine configuration, immutable for one rip.
#[derive(Debug, Clone)]
pub struct RipOptions {
    /// Output tile side in pixels; positive multiple of 16
    pub output_tile: u32,

    /// JPEG quality, 1-100
    pub quality: u8,

    /// Share quantization tables through `JPEGTables`
    pub shared_quant_tables: bool,

    /// `Software` tag value; `None` omits the tag
    pub software: Option<String>,
}

impl Default for RipOptions {
    fn default() -> Self {
        RipOptions {
            output_tile: DEFAULT_OUTPUT_TILE,
            quality: super::encoder::DEFAULT_JPEG_QUALITY,
            shared_quant_tables: false,
            software: Some(default_software()),
        }
    }
}

/// Default `Software` tag value.
///
/// Deliberately carries no timestamp: two rips of the same source with the
/// same options must be byte-identical.
pub fn default_software() -> String {
    format!("dzi-ripper {}", env!("CARGO_PKG_VERSION"))
}

// =============================================================================
// Summary
// =============================================================================

/// Final accounting for a completed rip.
#[derive(Debug, Clone, Copy)]
pub struct RipSummary {
    /// IFDs in the output (base + reduced layers)
    pub ifd_count: u32,

    /// Output tiles across all IFDs
    pub tile_count: u64,

    /// Encoded tile bytes written
    pub tile_bytes: u64,

    /// Whether the output is BigTIFF
    pub big_tiff: bool,

    /// Source fetch counters
    pub metrics: FetchMetrics,
}

// =============================================================================
// Ripper
// =============================================================================

/// Converts one DZI source into one pyramid TIFF file.
///
/// A ripper owns no shared state; concurrent rips need separate instances.
pub struct Ripper {
    options: RipOptions,
}

impl Ripper {
    /// Validate options and build a ripper.
    ///
    /// # Errors
    /// `InvalidArgument` when the output tile is not a positive multiple of
    /// 16 (a JPEG MCU boundary requirement) or is implausibly large.
    pub fn new(options: RipOptions) -> Result<Self, RipError> {
        let o = options.output_tile;
        if o == 0 || o % 16 != 0 {
            return Err(RipError::InvalidArgument(format!(
                "output tile size must be a positive multiple of 16, got {o}"
            )));
        }
        if o > MAX_OUTPUT_TILE {
            return Err(RipError::InvalidArgument(format!(
                "output tile size must not exceed {MAX_OUTPUT_TILE}, got {o}"
            )));
        }
        if options.quality == 0 || options.quality > 100 {
            return Err(RipError::InvalidArgument(format!(
                "JPEG quality must be between 1 and 100, got {}",
                options.quality
            )));
        }
        Ok(Ripper { options })
    }

    /// The validated options.
    pub fn options(&self) -> &RipOptions {
        &self.options
    }

    /// Run a complete rip: base layer first, then the reduced-resolution
    /// chain, emitting progress along the way.
    ///
    /// On any error (including cancellation) the output file is left
    /// truncated and should be deleted by the caller.
    pub async fn rip(
        &self,
        source: &dyn DziSource,
        output: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RipSummary, RipError> {
        let layout = DziLayout::new(source.manifest());
        let big = use_big_tiff(layout.width, layout.height);
        let software = self.options.software.as_deref();

        info!(
            width = layout.width,
            height = layout.height,
            source_tiles = layout.tile_count(),
            output_tile = self.options.output_tile,
            big_tiff = big,
            "starting rip"
        );

        let encoder = TileEncoder::new(self.options.quality, self.options.shared_quant_tables)?;
        let mut writer = TiffWriter::create(output, big).await?;

        let base = write_base_layer(
            source,
            layout,
            &encoder,
            &mut writer,
            self.options.output_tile,
            software,
            sink,
            cancel,
        )
        .await?;

        let pyramid = write_reduced_layers(
            output,
            &mut writer,
            &encoder,
            layout.width,
            layout.height,
            self.options.output_tile,
            software,
            sink,
            cancel,
        )
        .await?;

        writer.finish().await?;

        let summary = RipSummary {
            ifd_count: 1 + pyramid.layer_count,
            tile_count: base.tile_count + pyramid.tile_count,
            tile_bytes: base.bytes + pyramid.bytes,
            big_tiff: big,
            metrics: source.metrics(),
        };
        info!(
            ifds = summary.ifd_count,
            tiles = summary.tile_count,
            bytes = summary.tile_bytes,
            fetches = summary.metrics.fetches,
            retries = summary.metrics.retries,
            "rip complete"
        );
        Ok(summary)
    }
}
