//! Base-layer writing: re-tiling the DZI into the first IFD.

use bytes::Bytes;
use image::RgbImage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dzi::{DziLayout, DziSource};
use crate::error::RipError;
use crate::format::tiff::{
    IfdBuilder, TiffTag, TiffWriter, COMPRESSION_JPEG, PHOTOMETRIC_YCBCR, SAMPLE_FORMAT_UINT,
    SUBFILE_REDUCED_RESOLUTION,
};

use super::encoder::TileEncoder;
use super::filler::RegionFiller;
use super::progress::{ProgressEvent, ProgressSink};

/// What one written layer amounted to.
#[derive(Debug, Clone, Copy)]
pub struct LayerStats {
    /// Output tiles written
    pub tile_count: u64,

    /// Encoded tile bytes appended (excluding IFD structures)
    pub bytes: u64,

    /// File offset of the layer's IFD
    pub ifd_offset: u64,
}

/// Assemble the tag set for one pyramid level IFD.
///
/// The tag values follow JPEG-in-TIFF (Technote 2) semantics: YCbCr
/// photometric, JPEG compression, three 8-bit unsigned samples, 4:2:0
/// subsampling, square tiles of `output_tile` pixels. Offsets, counts and
/// dimensions take the width dictated by the container policy.
pub(crate) struct LevelIfd<'a> {
    pub width: u32,
    pub height: u32,
    pub output_tile: u32,
    pub offsets: &'a [u64],
    pub byte_counts: &'a [u64],
    pub jpeg_tables: Option<&'a Bytes>,
    pub software: Option<&'a str>,
    pub reduced: bool,
}

pub(crate) fn build_level_ifd(big: bool, level: &LevelIfd<'_>) -> IfdBuilder {
    let mut ifd = IfdBuilder::new(big);

    if level.reduced {
        ifd.put_long(TiffTag::NewSubfileType, SUBFILE_REDUCED_RESOLUTION);
    }
    ifd.put_size(TiffTag::ImageWidth, level.width as u64);
    ifd.put_size(TiffTag::ImageLength, level.height as u64);
    ifd.put_shorts(TiffTag::BitsPerSample, &[8, 8, 8]);
    ifd.put_short(TiffTag::Compression, COMPRESSION_JPEG);
    ifd.put_short(TiffTag::PhotometricInterpretation, PHOTOMETRIC_YCBCR);
    ifd.put_short(TiffTag::SamplesPerPixel, 3);
    if let Some(software) = level.software {
        ifd.put_ascii(TiffTag::Software, software);
    }
    ifd.put_short(TiffTag::TileWidth, level.output_tile as u16);
    ifd.put_short(TiffTag::TileLength, level.output_tile as u16);
    ifd.put_sizes(TiffTag::TileOffsets, level.offsets);
    ifd.put_sizes(TiffTag::TileByteCounts, level.byte_counts);
    ifd.put_shorts(
        TiffTag::SampleFormat,
        &[SAMPLE_FORMAT_UINT, SAMPLE_FORMAT_UINT, SAMPLE_FORMAT_UINT],
    );
    if let Some(tables) = level.jpeg_tables {
        ifd.put_undefined(TiffTag::JpegTables, tables);
    }
    ifd.put_shorts(TiffTag::YCbCrSubSampling, &[2, 2]);

    ifd
}

/// Write the full-resolution layer: iterate the output-tile grid row-major,
/// fill each canvas from the DZI, encode, append, then flush the base IFD.
///
/// Cancellation is checked once per output tile; an aborted run leaves the
/// header without a first-IFD offset.
#[allow(clippy::too_many_arguments)]
pub async fn write_base_layer(
    source: &dyn DziSource,
    layout: DziLayout,
    encoder: &TileEncoder,
    writer: &mut TiffWriter,
    output_tile: u32,
    software: Option<&str>,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<LayerStats, RipError> {
    let cols = layout.width.div_ceil(output_tile);
    let rows = layout.height.div_ceil(output_tile);
    let total = cols as u64 * rows as u64;

    sink.emit(&ProgressEvent::StartBase { tile_count: total });

    let mut filler = RegionFiller::new(source, layout, output_tile);
    let mut canvas = RgbImage::new(output_tile, output_tile);
    let mut offsets = Vec::with_capacity(total as usize);
    let mut byte_counts = Vec::with_capacity(total as usize);
    let mut bytes_written = 0u64;
    let mut done = 0u64;

    for row in 0..rows {
        for col in 0..cols {
            if cancel.is_cancelled() {
                return Err(RipError::Cancelled);
            }

            filler
                .fill(col * output_tile, row * output_tile, &mut canvas, cancel)
                .await?;
            let encoded = encoder.encode(&canvas)?;
            let (offset, count) = writer.append_tile(&encoded).await?;
            offsets.push(offset);
            byte_counts.push(count);
            bytes_written += count;

            done += 1;
            sink.emit(&ProgressEvent::BaseProgress { done, total });
        }
    }

    let ifd = build_level_ifd(
        writer.is_big(),
        &LevelIfd {
            width: layout.width,
            height: layout.height,
            output_tile,
            offsets: &offsets,
            byte_counts: &byte_counts,
            jpeg_tables: encoder.jpeg_tables(),
            software,
            reduced: false,
        },
    );
    let ifd_offset = writer.finish_ifd(ifd).await?;
    writer.flush().await?;

    debug!(tiles = total, bytes = bytes_written, ifd_offset, "base IFD flushed");
    sink.emit(&ProgressEvent::CompleteBase {
        tile_count: total,
        bytes: bytes_written,
    });

    Ok(LayerStats {
        tile_count: total,
        bytes: bytes_written,
        ifd_offset,
    })
}
