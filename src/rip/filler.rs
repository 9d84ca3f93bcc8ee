//! Base-layer region filling.
//!
//! For each output tile the filler works out which DZI source tiles cover
//! its pixel rectangle, acquires each one (stripe cache hit or
//! fetch+decode), composites them onto the canvas, and hands tiles that
//! straddle the output tile's right or bottom edge to the next-generation
//! caches.
//!
//! Source tiles are visited in column-major order: the leftmost column is
//! where right-edge carries from the previous output tile land, the top
//! row is where bottom-edge carries from the previous output-tile row land.
//!
//! Overlap handling: a decoded DZI tile carries `overlap` duplicated pixels
//! on each inner edge, so its content starts `overlap` pixels before the
//! tile's pixel origin except along the image's outer edges. Overlapping
//! pixels of adjacent tiles are identical in a conformant DZI, which makes
//! composition order irrelevant.

use image::RgbImage;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::dzi::{decode_tile, DziLayout, DziSource};
use crate::error::RipError;

use super::canvas;
use super::stripe::StripeCaches;

/// Fills output-tile canvases from a DZI source, one at a time.
pub struct RegionFiller<'a> {
    source: &'a dyn DziSource,
    layout: DziLayout,
    output_tile: u32,
    caches: StripeCaches,
}

impl<'a> RegionFiller<'a> {
    /// Create a filler for one base-layer pass.
    pub fn new(source: &'a dyn DziSource, layout: DziLayout, output_tile: u32) -> Self {
        RegionFiller {
            source,
            layout,
            output_tile,
            caches: StripeCaches::new(),
        }
    }

    /// Overwrite `canvas` with base-image pixels at
    /// `[out_x, out_x + O) x [out_y, out_y + O)`, clipped to the image;
    /// pixels outside the image stay zero.
    ///
    /// Fills must proceed row-major over the output grid; the cache
    /// rotations assume the next fill is either the tile to the right or
    /// the first tile of the next row.
    pub async fn fill(
        &mut self,
        out_x: u32,
        out_y: u32,
        canvas: &mut RgbImage,
        cancel: &CancellationToken,
    ) -> Result<(), RipError> {
        canvas::clear(canvas);

        let s = self.layout.tile_size;
        let o = self.output_tile;

        let tx0 = out_x / s;
        let ty0 = out_y / s;
        let tx_count = (out_x % s + o).div_ceil(s).min(self.layout.cols - tx0);
        let ty_count = (out_y % s + o).div_ceil(s).min(self.layout.rows - ty0);

        for tx in tx0..tx0 + tx_count {
            for ty in ty0..ty0 + ty_count {
                let (px, py) = self.layout.tile_origin(tx, ty);

                let tile = self.acquire(tx, ty, tx == tx0, ty == ty0, cancel).await?;

                // Content starts before the origin by the inner-edge overlap.
                let left = if tx > 0 { self.layout.overlap } else { 0 };
                let top = if ty > 0 { self.layout.overlap } else { 0 };
                let dx = px as i64 - out_x as i64 - left as i64;
                let dy = py as i64 - out_y as i64 - top as i64;
                canvas::blit(canvas, &tile, dx, dy);

                self.carry(px, py, out_x, out_y, tile);
            }
        }

        self.caches.rotate_tile();
        if out_x + o >= self.layout.width {
            // Last output column: publish this row's bottom-edge carries
            // for the row below.
            self.caches.rotate_row();
        }
        Ok(())
    }

    /// Get one decoded source tile: vertical cache for the leftmost visited
    /// column, horizontal cache for the topmost visited row, fetch+decode
    /// otherwise.
    async fn acquire(
        &mut self,
        tx: u32,
        ty: u32,
        leftmost: bool,
        topmost: bool,
        cancel: &CancellationToken,
    ) -> Result<RgbImage, RipError> {
        let (px, py) = self.layout.tile_origin(tx, ty);

        if leftmost {
            if let Some(tile) = self.caches.current().vertical.try_take(px, py) {
                trace!(tx, ty, "vertical cache hit");
                return Ok(tile);
            }
        }
        if topmost {
            if let Some(tile) = self.caches.current().horizontal.try_take(px, py) {
                trace!(tx, ty, "horizontal cache hit");
                return Ok(tile);
            }
        }

        let layer = self.layout.base_layer;
        let bytes = self
            .source
            .copy_tile(layer, tx, ty, cancel)
            .await
            .map_err(|e| RipError::from_fetch(e, layer, tx, ty))?;
        decode_tile(&bytes, &self.source.manifest().format)
    }

    /// Decide whether the tile is needed by the output tile to the right or
    /// below, and deposit it into the next-generation caches accordingly.
    ///
    /// A tile needed in both directions is stored once and deep-cloned
    /// once, so each cache owns its entry independently.
    fn carry(&mut self, px: u32, py: u32, out_x: u32, out_y: u32, tile: RgbImage) {
        let s = self.layout.tile_size;
        let o = self.output_tile;
        let right_edge = px + s > out_x + o;
        let bottom_edge = py + s > out_y + o;

        match (right_edge, bottom_edge) {
            (true, true) => {
                let clone = tile.clone();
                self.caches.backup().vertical.insert(px, py, tile);
                self.caches.backup().horizontal.insert(px, py, clone);
            }
            (true, false) => self.caches.backup().vertical.insert(px, py, tile),
            (false, true) => self.caches.backup().horizontal.insert(px, py, tile),
            (false, false) => drop(tile),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
