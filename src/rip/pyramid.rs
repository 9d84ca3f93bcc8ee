//! Reduced-resolution layer generation.
//!
//! After the base IFD is flushed, the file is reopened for reading and each
//! successive level is produced by decoding 2x2 blocks of output tiles from
//! the level written just before it, halving them, and appending a new IFD
//! tagged as reduced resolution. The loop stops once the shorter side fits
//! in a single output tile or drops below 32 pixels.

use std::path::Path;

use image::{Rgb, RgbImage};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RipError, TiffError};
use crate::format::jpeg::merge_jpeg_tables;
use crate::format::tiff::{LevelView, TiffSliceReader, TiffWriter};
use crate::io::{FileRangeReader, RangeReader};

use super::base::{build_level_ifd, LevelIfd};
use super::canvas;
use super::encoder::TileEncoder;
use super::progress::{ProgressEvent, ProgressSink};

/// Smallest shorter side for which another halving is produced.
pub const MIN_REDUCED_DIMENSION: u32 = 32;

/// What the whole reduced-resolution pass amounted to.
#[derive(Debug, Clone, Copy, Default)]
pub struct PyramidStats {
    /// Reduced layers appended
    pub layer_count: u32,

    /// Output tiles written across all reduced layers
    pub tile_count: u64,

    /// Encoded tile bytes appended
    pub bytes: u64,
}

/// Number of reduced layers the pass will write for a base of `w x h`.
///
/// This mirrors the generation loop exactly so the advertised layer count
/// always matches what actually runs.
pub fn reduced_layer_count(width: u32, height: u32, output_tile: u32) -> u32 {
    let (mut w, mut h) = (width, height);
    let mut count = 0;
    while w.min(h) > output_tile && w.min(h) >= MIN_REDUCED_DIMENSION {
        w = w.div_ceil(2);
        h = h.div_ceil(2);
        count += 1;
    }
    count
}

// =============================================================================
// Level Decoder
// =============================================================================

/// Random-access pixel reads over one already-written level.
pub struct LevelDecoder<'a, R: RangeReader> {
    reader: &'a R,
    view: &'a LevelView,
}

impl<'a, R: RangeReader> LevelDecoder<'a, R> {
    /// Wrap a parsed level for region decoding.
    pub fn new(reader: &'a R, view: &'a LevelView) -> Self {
        LevelDecoder { reader, view }
    }

    /// Decode the region with top-left `(x, y)` and the canvas's size into
    /// `canvas`. The canvas must be cleared by the caller; pixels past the
    /// level's edges are left untouched.
    pub async fn decode_region(
        &self,
        x: u32,
        y: u32,
        canvas: &mut RgbImage,
    ) -> Result<(), RipError> {
        let (region_w, region_h) = canvas.dimensions();
        let view = self.view;
        if x >= view.width || y >= view.height {
            return Ok(());
        }

        let tw = view.tile_width;
        let th = view.tile_height;
        let tx0 = x / tw;
        let ty0 = y / th;
        let tx1 = ((x + region_w - 1) / tw).min(view.tiles_x - 1);
        let ty1 = ((y + region_h - 1) / th).min(view.tiles_y - 1);

        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                let (offset, count) = self
                    .view
                    .tile_location(tx, ty)
                    .ok_or(TiffError::MissingTag("TileOffsets"))?;
                let raw = self.reader.read_exact_at(offset, count as usize).await?;

                let stream = match view.jpeg_tables.as_deref() {
                    Some(tables) => merge_jpeg_tables(tables, &raw),
                    None => raw,
                };
                let tile = image::load_from_memory(&stream)
                    .map_err(|e| RipError::DecodeFailed(format!("tile {tx},{ty}: {e}")))?
                    .to_rgb8();

                let dx = (tx * tw) as i64 - x as i64;
                let dy = (ty * th) as i64 - y as i64;
                canvas::blit(canvas, &tile, dx, dy);
            }
        }

        Ok(())
    }
}

// =============================================================================
// Downsampling
// =============================================================================

/// Halve `src` into `dst` by 2x2 block averaging.
///
/// Only `valid_w x valid_h` source pixels are meaningful; blocks clipped by
/// that extent average the pixels they actually have, so edge output
/// pixels still depend only on their own source block. `dst` must be
/// cleared by the caller; only `ceil(valid/2)` pixels per axis are written.
pub fn downsample_into(src: &RgbImage, valid_w: u32, valid_h: u32, dst: &mut RgbImage) {
    let out_w = valid_w.div_ceil(2).min(dst.width());
    let out_h = valid_h.div_ceil(2).min(dst.height());

    for oy in 0..out_h {
        for ox in 0..out_w {
            let bx = ox * 2;
            let by = oy * 2;
            let bw = 2.min(valid_w - bx);
            let bh = 2.min(valid_h - by);

            let mut sum = [0u32; 3];
            for dy in 0..bh {
                for dx in 0..bw {
                    let p = src.get_pixel(bx + dx, by + dy);
                    sum[0] += p.0[0] as u32;
                    sum[1] += p.0[1] as u32;
                    sum[2] += p.0[2] as u32;
                }
            }

            let n = bw * bh;
            dst.put_pixel(
                ox,
                oy,
                Rgb([
                    ((sum[0] + n / 2) / n) as u8,
                    ((sum[1] + n / 2) / n) as u8,
                    ((sum[2] + n / 2) / n) as u8,
                ]),
            );
        }
    }
}

// =============================================================================
// Generation Loop
// =============================================================================

/// Append reduced-resolution IFDs until the terminal size is reached.
///
/// `output_path` is reopened for reading before each level so the reader
/// sees the tiles flushed by the previous one.
#[allow(clippy::too_many_arguments)]
pub async fn write_reduced_layers(
    output_path: &Path,
    writer: &mut TiffWriter,
    encoder: &TileEncoder,
    base_width: u32,
    base_height: u32,
    output_tile: u32,
    software: Option<&str>,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<PyramidStats, RipError> {
    let advertised = reduced_layer_count(base_width, base_height, output_tile);
    sink.emit(&ProgressEvent::StartPyramid {
        layer_count: advertised,
    });

    let o = output_tile;
    let mut stats = PyramidStats::default();
    let mut source_canvas = RgbImage::new(2 * o, 2 * o);
    let mut reduced_canvas = RgbImage::new(o, o);
    let (mut cur_w, mut cur_h) = (base_width, base_height);

    while cur_w.min(cur_h) > o && cur_w.min(cur_h) >= MIN_REDUCED_DIMENSION {
        let layer = stats.layer_count + 1;

        // The previous level's tiles must be readable through a fresh handle.
        writer.flush().await?;
        let reader = FileRangeReader::open(output_path).await?;
        let parsed = TiffSliceReader::open(&reader).await.map_err(RipError::Tiff)?;
        let view = parsed
            .level(&reader, parsed.ifd_count() - 1)
            .await
            .map_err(RipError::Tiff)?;
        let decoder = LevelDecoder::new(&reader, &view);

        let (nw, nh) = (cur_w.div_ceil(2), cur_h.div_ceil(2));
        let cols = nw.div_ceil(o);
        let rows = nh.div_ceil(o);
        let total = cols as u64 * rows as u64;

        sink.emit(&ProgressEvent::StartLayer {
            layer,
            tile_count: total,
            width: nw,
            height: nh,
        });

        let mut offsets = Vec::with_capacity(total as usize);
        let mut byte_counts = Vec::with_capacity(total as usize);
        let mut layer_bytes = 0u64;
        let mut done = 0u64;

        for row in 0..rows {
            for col in 0..cols {
                if cancel.is_cancelled() {
                    return Err(RipError::Cancelled);
                }

                let src_x = col * 2 * o;
                let src_y = row * 2 * o;
                canvas::clear(&mut source_canvas);
                decoder.decode_region(src_x, src_y, &mut source_canvas).await?;

                let valid_w = (cur_w - src_x.min(cur_w)).min(2 * o);
                let valid_h = (cur_h - src_y.min(cur_h)).min(2 * o);
                canvas::clear(&mut reduced_canvas);
                downsample_into(&source_canvas, valid_w, valid_h, &mut reduced_canvas);

                let encoded = encoder.encode(&reduced_canvas)?;
                let (offset, count) = writer.append_tile(&encoded).await?;
                offsets.push(offset);
                byte_counts.push(count);
                layer_bytes += count;

                done += 1;
                sink.emit(&ProgressEvent::LayerProgress { layer, done, total });
            }
        }

        let ifd = build_level_ifd(
            writer.is_big(),
            &LevelIfd {
                width: nw,
                height: nh,
                output_tile: o,
                offsets: &offsets,
                byte_counts: &byte_counts,
                jpeg_tables: encoder.jpeg_tables(),
                software,
                reduced: true,
            },
        );
        writer.finish_ifd(ifd).await?;

        debug!(layer, width = nw, height = nh, tiles = total, "reduced layer flushed");
        sink.emit(&ProgressEvent::CompleteLayer {
            layer,
            tile_count: total,
            bytes: layer_bytes,
        });

        stats.layer_count += 1;
        stats.tile_count += total;
        stats.bytes += layer_bytes;
        (cur_w, cur_h) = (nw, nh);
    }

    writer.flush().await?;
    sink.emit(&ProgressEvent::CompletePyramid {
        layer_count: stats.layer_count,
    });
    Ok(stats)
}

// =============================================================================
// Tests
// =============================================================================
