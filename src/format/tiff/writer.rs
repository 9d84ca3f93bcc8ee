//! TIFF and BigTIFF output writing.
//!
//! The file is strictly append-only except for two kinds of back-patching:
//! the header's first-IFD offset (patched when the base IFD flushes) and
//! each IFD's next-IFD field (patched when the following IFD flushes).
//! Until the base IFD is flushed the header points at offset 0, so a rip
//! aborted mid-layer leaves a file no TIFF reader will accept.
//!
//! ## Layout
//!
//! ```text
//! header | tile blobs ... | IFD0 (+ external values) | tile blobs ... | IFD1 | ...
//! ```
//!
//! Tile blobs and IFDs start on even offsets (TIFF 6.0 word alignment).

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::tags::{FieldType, TiffTag};

/// Pixel count above which BigTIFF is selected.
pub const CLASSIC_PIXEL_LIMIT: u64 = 1 << 29;

/// Container policy: classic TIFF up to 2^29 pixels, BigTIFF beyond.
///
/// The choice is made once per file and applied uniformly to the header,
/// the dimension tags and the tile offset/count arrays.
#[inline]
pub fn use_big_tiff(width: u32, height: u32) -> bool {
    width as u64 * height as u64 > CLASSIC_PIXEL_LIMIT
}

// =============================================================================
// IfdBuilder
// =============================================================================

struct PendingEntry {
    tag: u16,
    field_type: FieldType,
    count: u64,
    payload: Vec<u8>,
}

/// Accumulates tag values for one IFD before it is flushed.
///
/// Values are serialized little-endian. Tags may be added in any order;
/// the writer sorts them ascending as TIFF requires.
pub struct IfdBuilder {
    big: bool,
    entries: Vec<PendingEntry>,
}

impl IfdBuilder {
    /// Start an empty IFD for a classic or BigTIFF file.
    pub fn new(big: bool) -> Self {
        IfdBuilder {
            big,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, tag: TiffTag, field_type: FieldType, count: u64, payload: Vec<u8>) {
        self.entries.push(PendingEntry {
            tag: tag.as_u16(),
            field_type,
            count,
            payload,
        });
    }

    /// Add a single SHORT value.
    pub fn put_short(&mut self, tag: TiffTag, value: u16) {
        self.push(tag, FieldType::Short, 1, value.to_le_bytes().to_vec());
    }

    /// Add an array of SHORT values.
    pub fn put_shorts(&mut self, tag: TiffTag, values: &[u16]) {
        let payload = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(tag, FieldType::Short, values.len() as u64, payload);
    }

    /// Add a single LONG value.
    pub fn put_long(&mut self, tag: TiffTag, value: u32) {
        self.push(tag, FieldType::Long, 1, value.to_le_bytes().to_vec());
    }

    /// Add a single size value: LONG in classic files, LONG8 in BigTIFF.
    pub fn put_size(&mut self, tag: TiffTag, value: u64) {
        if self.big {
            self.push(tag, FieldType::Long8, 1, value.to_le_bytes().to_vec());
        } else {
            self.push(tag, FieldType::Long, 1, (value as u32).to_le_bytes().to_vec());
        }
    }

    /// Add an array of size values: LONG in classic files, LONG8 in BigTIFF.
    ///
    /// Classic files never exceed 4 GiB under the container policy, so the
    /// narrowing cast is safe there.
    pub fn put_sizes(&mut self, tag: TiffTag, values: &[u64]) {
        if self.big {
            let payload = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            self.push(tag, FieldType::Long8, values.len() as u64, payload);
        } else {
            let payload = values
                .iter()
                .flat_map(|v| (*v as u32).to_le_bytes())
                .collect();
            self.push(tag, FieldType::Long, values.len() as u64, payload);
        }
    }

    /// Add a NUL-terminated ASCII string.
    pub fn put_ascii(&mut self, tag: TiffTag, value: &str) {
        let mut payload = value.as_bytes().to_vec();
        payload.push(0);
        let count = payload.len() as u64;
        self.push(tag, FieldType::Ascii, count, payload);
    }

    /// Add untyped byte data (UNDEFINED).
    pub fn put_undefined(&mut self, tag: TiffTag, data: &[u8]) {
        self.push(tag, FieldType::Undefined, data.len() as u64, data.to_vec());
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// TiffWriter
// =============================================================================

/// Append-oriented writer producing a little-endian TIFF or BigTIFF.
pub struct TiffWriter {
    file: File,
    big: bool,
    pos: u64,
    /// File offset of the pointer field the next flushed IFD must patch:
    /// initially the header's first-IFD field, afterwards the previous
    /// IFD's next-IFD field.
    link_pos: u64,
}

impl TiffWriter {
    /// Create the output file and write its header.
    ///
    /// The first-IFD offset is left at 0 until an IFD is flushed.
    pub async fn create(path: impl AsRef<Path>, big: bool) -> Result<Self, std::io::Error> {
        let mut file = File::create(path).await?;

        let (header, link_pos): (Vec<u8>, u64) = if big {
            let mut h = Vec::with_capacity(16);
            h.extend_from_slice(b"II");
            h.extend_from_slice(&43u16.to_le_bytes());
            h.extend_from_slice(&8u16.to_le_bytes());
            h.extend_from_slice(&0u16.to_le_bytes());
            h.extend_from_slice(&0u64.to_le_bytes());
            (h, 8)
        } else {
            let mut h = Vec::with_capacity(8);
            h.extend_from_slice(b"II");
            h.extend_from_slice(&42u16.to_le_bytes());
            h.extend_from_slice(&0u32.to_le_bytes());
            (h, 4)
        };

        file.write_all(&header).await?;
        let pos = header.len() as u64;

        Ok(TiffWriter {
            file,
            big,
            pos,
            link_pos,
        })
    }

    /// Whether this file uses BigTIFF structures.
    pub fn is_big(&self) -> bool {
        self.big
    }

    /// Current append position (equals the file length).
    pub fn position(&self) -> u64 {
        self.pos
    }

    async fn align(&mut self) -> Result<(), std::io::Error> {
        if self.pos % 2 == 1 {
            self.file.write_all(&[0]).await?;
            self.pos += 1;
        }
        Ok(())
    }

    /// Append one encoded tile blob and return its `(offset, byte_count)`.
    pub async fn append_tile(&mut self, data: &[u8]) -> Result<(u64, u64), std::io::Error> {
        self.align().await?;
        let offset = self.pos;
        self.file.write_all(data).await?;
        self.pos += data.len() as u64;
        Ok((offset, data.len() as u64))
    }

    /// Serialize and append an IFD, linking it into the IFD chain.
    ///
    /// The first flushed IFD becomes the file's first IFD; every later one
    /// is linked from its predecessor. Returns the IFD's file offset.
    pub async fn finish_ifd(&mut self, builder: IfdBuilder) -> Result<u64, std::io::Error> {
        let mut entries = builder.entries;
        entries.sort_by_key(|e| e.tag);

        self.align().await?;
        let ifd_offset = self.pos;

        let (count_size, entry_size, next_size, inline_size) = if self.big {
            (8usize, 20usize, 8usize, 8usize)
        } else {
            (2, 12, 4, 4)
        };
        let block_size = count_size + entries.len() * entry_size + next_size;

        let mut block = Vec::with_capacity(block_size);
        let mut external = Vec::new();

        if self.big {
            block.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        } else {
            block.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        }

        for entry in &entries {
            block.extend_from_slice(&entry.tag.to_le_bytes());
            block.extend_from_slice(&(entry.field_type as u16).to_le_bytes());
            if self.big {
                block.extend_from_slice(&entry.count.to_le_bytes());
            } else {
                block.extend_from_slice(&(entry.count as u32).to_le_bytes());
            }

            if entry.payload.len() <= inline_size {
                let mut value = entry.payload.clone();
                value.resize(inline_size, 0);
                block.extend_from_slice(&value);
            } else {
                // External values follow the IFD block, each even-aligned.
                if external.len() % 2 == 1 {
                    external.push(0);
                }
                let value_offset = ifd_offset + block_size as u64 + external.len() as u64;
                external.extend_from_slice(&entry.payload);
                if self.big {
                    block.extend_from_slice(&value_offset.to_le_bytes());
                } else {
                    block.extend_from_slice(&(value_offset as u32).to_le_bytes());
                }
            }
        }

        // Next-IFD pointer, patched by the following flush.
        let next_field_pos = ifd_offset + (block.len()) as u64;
        block.extend_from_slice(&vec![0u8; next_size]);

        debug_assert_eq!(block.len(), block_size);

        self.file.write_all(&block).await?;
        self.file.write_all(&external).await?;
        self.pos += (block.len() + external.len()) as u64;

        self.patch_link(ifd_offset).await?;
        self.link_pos = next_field_pos;

        Ok(ifd_offset)
    }

    /// Patch the pending pointer field with `ifd_offset`.
    async fn patch_link(&mut self, ifd_offset: u64) -> Result<(), std::io::Error> {
        self.file.seek(SeekFrom::Start(self.link_pos)).await?;
        if self.big {
            self.file.write_all(&ifd_offset.to_le_bytes()).await?;
        } else {
            self.file
                .write_all(&(ifd_offset as u32).to_le_bytes())
                .await?;
        }
        self.file.seek(SeekFrom::Start(self.pos)).await?;
        Ok(())
    }

    /// Flush buffered writes to the OS so a fresh read handle sees them.
    pub async fn flush(&mut self) -> Result<(), std::io::Error> {
        self.file.flush().await
    }

    /// Flush and sync file contents to disk.
    pub async fn finish(mut self) -> Result<(), std::io::Error> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

// =============================================================================
// Tests
// =============================================================================
