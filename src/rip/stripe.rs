//! Stripe caches: carrying decoded source tiles between output tiles.
//!
//! A source tile that straddles an output-tile boundary is needed again by
//! the next output tile to the right (right-edge carry) or below
//! (bottom-edge carry). Two small associative stores hold such tiles so
//! each source tile is fetched and decoded approximately once:
//!
//! - the **vertical cache** carries at most one source-tile column, so a
//!   linear list keeps lookups cheap without hashing;
//! - the **horizontal cache** can hold an entire source-tile row, so it is
//!   a hashmap keyed by the packed pixel origin.
//!
//! Caches come in a current/backup pair. The region filler reads from the
//! current pair and deposits carries into the backup pair. The vertical
//! caches swap after every output tile (a right-edge carry is consumed by
//! the very next fill), while the horizontal caches swap only at the end of
//! an output-tile row (a bottom-edge carry is consumed one row later).
//! Whatever the stale side still holds is disposed at the swap.

use std::collections::HashMap;

use image::RgbImage;

/// Pack a source-tile pixel origin into one 64-bit key.
#[inline]
fn pack_origin(x: u32, y: u32) -> u64 {
    (u64::from(x) << 32) | u64::from(y)
}

// =============================================================================
// Vertical Cache
// =============================================================================

/// Right-edge carry store, keyed by source-tile pixel origin.
#[derive(Debug, Default)]
pub struct VerticalCache {
    entries: Vec<(u32, u32, RgbImage)>,
}

impl VerticalCache {
    /// Remove and return the tile at `(x, y)`, if present.
    pub fn try_take(&mut self, x: u32, y: u32) -> Option<RgbImage> {
        let index = self
            .entries
            .iter()
            .position(|(ex, ey, _)| *ex == x && *ey == y)?;
        Some(self.entries.swap_remove(index).2)
    }

    /// Store a tile, replacing (and dropping) any previous entry at the
    /// same origin.
    pub fn insert(&mut self, x: u32, y: u32, tile: RgbImage) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(ex, ey, _)| *ex == x && *ey == y)
        {
            entry.2 = tile;
        } else {
            self.entries.push((x, y, tile));
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored tiles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Horizontal Cache
// =============================================================================

/// Bottom-edge carry store, keyed by packed source-tile pixel origin.
#[derive(Debug, Default)]
pub struct HorizontalCache {
    entries: HashMap<u64, RgbImage>,
}

impl HorizontalCache {
    /// Remove and return the tile at `(x, y)`, if present.
    pub fn try_take(&mut self, x: u32, y: u32) -> Option<RgbImage> {
        self.entries.remove(&pack_origin(x, y))
    }

    /// Store a tile, replacing (and dropping) any previous entry at the
    /// same origin.
    pub fn insert(&mut self, x: u32, y: u32, tile: RgbImage) {
        self.entries.insert(pack_origin(x, y), tile);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored tiles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Cache Pair Rotation
// =============================================================================

/// One generation of carries: a vertical and a horizontal cache.
#[derive(Debug, Default)]
pub struct CachePair {
    /// Right-edge carries
    pub vertical: VerticalCache,

    /// Bottom-edge carries
    pub horizontal: HorizontalCache,
}

impl CachePair {
    fn clear(&mut self) {
        self.vertical.clear();
        self.horizontal.clear();
    }
}

/// Double-buffered cache pairs rotated once per output tile.
#[derive(Debug, Default)]
pub struct StripeCaches {
    current: CachePair,
    backup: CachePair,
}

impl StripeCaches {
    /// Fresh, empty caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pair being read while filling the current output tile.
    pub fn current(&mut self) -> &mut CachePair {
        &mut self.current
    }

    /// The pair receiving carries for the next output tile.
    pub fn backup(&mut self) -> &mut CachePair {
        &mut self.backup
    }

    /// Swap the vertical caches and drop unconsumed right-edge carries.
    ///
    /// Called after every output tile. Residual entries are tiles that were
    /// carried past the last output column and have no consumer.
    pub fn rotate_tile(&mut self) {
        std::mem::swap(&mut self.current.vertical, &mut self.backup.vertical);
        self.backup.vertical.clear();
    }

    /// Swap the horizontal caches and drop unconsumed bottom-edge carries.
    ///
    /// Called at the end of each output-tile row; deposits made while filling
    /// row `r` become readable while filling row `r + 1`.
    pub fn rotate_row(&mut self) {
        std::mem::swap(&mut self.current.horizontal, &mut self.backup.horizontal);
        self.backup.horizontal.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn tile(value: u8) -> RgbImage {
        RgbImage::from_pixel(2, 2, Rgb([value, 0, 0]))
    }

    #[test]
    fn test_pack_origin_distinct() {
        assert_ne!(pack_origin(1, 0), pack_origin(0, 1));
        assert_eq!(pack_origin(3, 7), (3u64 << 32) | 7);
    }

    #[test]
    fn test_vertical_take_removes() {
        let mut cache = VerticalCache::default();
        cache.insert(0, 256, tile(1));
        cache.insert(0, 512, tile(2));
        assert_eq!(cache.len(), 2);

        let taken = cache.try_take(0, 256).unwrap();
        assert_eq!(taken.get_pixel(0, 0).0[0], 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.try_take(0, 256).is_none());
    }

    #[test]
    fn test_vertical_insert_replaces() {
        let mut cache = VerticalCache::default();
        cache.insert(0, 0, tile(1));
        cache.insert(0, 0, tile(9));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.try_take(0, 0).unwrap().get_pixel(0, 0).0[0], 9);
    }

    #[test]
    fn test_horizontal_take_removes() {
        let mut cache = HorizontalCache::default();
        cache.insert(256, 0, tile(5));
        assert!(cache.try_take(0, 256).is_none());
        assert!(cache.try_take(256, 0).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_tile_rotation_swaps_vertical_only() {
        let mut caches = StripeCaches::new();
        caches.backup().vertical.insert(0, 0, tile(1));
        caches.backup().horizontal.insert(256, 0, tile(2));
        caches.current().vertical.insert(9, 9, tile(3)); // residual, never taken

        caches.rotate_tile();

        // Right-edge carries become readable; the residual is disposed.
        assert!(caches.current().vertical.try_take(0, 0).is_some());
        assert!(caches.backup().vertical.is_empty());

        // Bottom-edge carries stay pending until the row ends.
        assert!(caches.current().horizontal.try_take(256, 0).is_none());
        assert_eq!(caches.backup().horizontal.len(), 1);
    }

    #[test]
    fn test_row_rotation_publishes_bottom_carries() {
        let mut caches = StripeCaches::new();
        caches.backup().horizontal.insert(256, 0, tile(2));
        caches.current().horizontal.insert(7, 7, tile(4)); // residual from prior row

        caches.rotate_row();

        assert!(caches.current().horizontal.try_take(256, 0).is_some());
        assert!(caches.backup().horizontal.is_empty());
    }

    #[test]
    fn test_carry_survives_a_full_row_of_tile_rotations() {
        let mut caches = StripeCaches::new();
        caches.backup().horizontal.insert(0, 254, tile(8));

        // Several output tiles pass in the same row.
        caches.rotate_tile();
        caches.rotate_tile();
        caches.rotate_tile();
        assert_eq!(caches.backup().horizontal.len(), 1);

        caches.rotate_row();
        assert!(caches.current().horizontal.try_take(0, 254).is_some());
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut pair = CachePair::default();
        pair.vertical.insert(0, 0, tile(1));
        pair.horizontal.insert(0, 0, tile(2));
        pair.clear();
        assert!(pair.vertical.is_empty());
        assert!(pair.horizontal.is_empty());
    }
}
