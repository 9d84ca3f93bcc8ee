//! Read-back parsing of the pyramid TIFF this crate writes.
//!
//! The reduced-resolution pass decodes tiles out of the level written just
//! before it, so the file is reopened for reading while the writer keeps
//! appending. The parser understands exactly the structures the writer
//! emits (plus big-endian files, for tooling), not arbitrary TIFFs.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};

use super::tags::{FieldType, TiffTag};

/// Size of a BigTIFF header; also enough bytes to classify a classic one.
pub const HEADER_READ_SIZE: usize = 16;

/// Upper bound on IFDs followed in a chain. A pyramid halving from the
/// largest representable image stays far below this.
const MAX_IFDS: usize = 64;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order declared in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II", the order this crate writes
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from a byte slice using this byte order.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    /// Read a u32 from a byte slice using this byte order.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    /// Read a u64 from a byte slice using this byte order.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values
    pub byte_order: ByteOrder,

    /// Whether the file uses BigTIFF structures
    pub is_bigtiff: bool,

    /// Offset of the first IFD
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a header from the leading file bytes.
    ///
    /// # Errors
    /// Rejects unknown magic, versions other than 42/43, BigTIFF offset
    /// sizes other than 8, and first-IFD offsets outside the file. An
    /// offset of 0 is invalid by construction, which is what makes an
    /// aborted rip detectable.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < 8 {
            return Err(TiffError::FileTooSmall {
                required: 8,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            0x4949 => ByteOrder::LittleEndian,
            0x4D4D => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        match version {
            42 => {
                let first_ifd_offset = byte_order.read_u32(&bytes[4..8]) as u64;
                if first_ifd_offset < 8 || first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }
                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: false,
                    first_ifd_offset,
                })
            }
            43 => {
                if bytes.len() < HEADER_READ_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: HEADER_READ_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                let first_ifd_offset = byte_order.read_u64(&bytes[8..16]);
                if first_ifd_offset < 16 || first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }
                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: true,
                    first_ifd_offset,
                })
            }
            other => Err(TiffError::InvalidVersion(other)),
        }
    }

    #[inline]
    const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    #[inline]
    const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    #[inline]
    const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// One entry's raw wire data.
#[derive(Debug, Clone)]
struct RawEntry {
    field_type: Option<FieldType>,
    count: u64,
    /// The 4- or 8-byte value/offset field, verbatim
    value_field: Vec<u8>,
}

impl RawEntry {
    fn is_inline(&self, header: &TiffHeader) -> bool {
        self.field_type
            .map(|ft| ft.fits_inline(self.count, header.is_bigtiff))
            .unwrap_or(false)
    }

    fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_field.len() == 8 {
            byte_order.read_u64(&self.value_field)
        } else {
            byte_order.read_u32(&self.value_field) as u64
        }
    }
}

/// A parsed Image File Directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    entries: HashMap<u16, RawEntry>,

    /// Offset of the next IFD; 0 terminates the chain
    pub next_ifd_offset: u64,
}

impl Ifd {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let count_size = header.ifd_count_size();
        let entry_size = header.ifd_entry_size();

        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = if header.is_bigtiff {
            byte_order.read_u64(&bytes[0..8])
        } else {
            byte_order.read_u16(&bytes[0..2]) as u64
        } as usize;

        let next_offset_start = count_size + entry_count * entry_size;
        let total = next_offset_start + header.ifd_next_offset_size();
        if bytes.len() < total {
            return Err(TiffError::FileTooSmall {
                required: total as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut entries = HashMap::with_capacity(entry_count);
        for i in 0..entry_count {
            let e = &bytes[count_size + i * entry_size..count_size + (i + 1) * entry_size];
            let tag = byte_order.read_u16(&e[0..2]);
            let field_type = FieldType::from_u16(byte_order.read_u16(&e[2..4]));
            let (count, value_field) = if header.is_bigtiff {
                (byte_order.read_u64(&e[4..12]), e[12..20].to_vec())
            } else {
                (byte_order.read_u32(&e[4..8]) as u64, e[8..12].to_vec())
            };
            entries.insert(
                tag,
                RawEntry {
                    field_type,
                    count,
                    value_field,
                },
            );
        }

        let next_ifd_offset = if header.is_bigtiff {
            byte_order.read_u64(&bytes[next_offset_start..next_offset_start + 8])
        } else {
            byte_order.read_u32(&bytes[next_offset_start..next_offset_start + 4]) as u64
        };

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    fn get(&self, tag: TiffTag) -> Option<&RawEntry> {
        self.entries.get(&tag.as_u16())
    }
}

// =============================================================================
// TiffSliceReader
// =============================================================================

/// Parsed IFD chain of a pyramid file, with value readers for the fields
/// the ripper needs.
pub struct TiffSliceReader {
    /// The parsed header
    pub header: TiffHeader,

    /// IFDs in chain order (largest level first)
    pub ifds: Vec<Ifd>,
}

impl TiffSliceReader {
    /// Parse the header and all IFDs through `reader`.
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let head_len = HEADER_READ_SIZE.min(reader.size() as usize);
        let head = reader.read_exact_at(0, head_len).await?;
        let header = TiffHeader::parse(&head, reader.size())?;

        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;
        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
            let entry_count = if header.is_bigtiff {
                header.byte_order.read_u64(&count_bytes)
            } else {
                header.byte_order.read_u16(&count_bytes) as u64
            };

            let total = header.ifd_count_size()
                + entry_count as usize * header.ifd_entry_size()
                + header.ifd_next_offset_size();
            let bytes = reader.read_exact_at(offset, total).await?;
            let ifd = Ifd::parse(&bytes, &header)?;

            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(TiffSliceReader { header, ifds })
    }

    /// Number of IFDs in the chain.
    pub fn ifd_count(&self) -> usize {
        self.ifds.len()
    }

    /// Materialize the tile index of one level.
    pub async fn level<R: RangeReader>(
        &self,
        reader: &R,
        index: usize,
    ) -> Result<LevelView, TiffError> {
        let ifd = self
            .ifds
            .get(index)
            .ok_or(TiffError::MissingTag("no such IFD"))?;

        let width = self.scalar_u32(reader, ifd, TiffTag::ImageWidth).await?;
        let height = self.scalar_u32(reader, ifd, TiffTag::ImageLength).await?;
        let tile_width = self.scalar_u32(reader, ifd, TiffTag::TileWidth).await?;
        let tile_height = self.scalar_u32(reader, ifd, TiffTag::TileLength).await?;
        if tile_width == 0 || tile_height == 0 {
            return Err(TiffError::BadValue("TileWidth"));
        }

        let offsets = self.array_u64(reader, ifd, TiffTag::TileOffsets).await?;
        let byte_counts = self.array_u64(reader, ifd, TiffTag::TileByteCounts).await?;

        let jpeg_tables = match ifd.get(TiffTag::JpegTables) {
            Some(_) => Some(self.raw_bytes(reader, ifd, TiffTag::JpegTables).await?),
            None => None,
        };

        let subfile_type = match ifd.get(TiffTag::NewSubfileType) {
            Some(_) => Some(self.scalar_u32(reader, ifd, TiffTag::NewSubfileType).await?),
            None => None,
        };
        let compression = match ifd.get(TiffTag::Compression) {
            Some(_) => Some(self.scalar_u32(reader, ifd, TiffTag::Compression).await? as u16),
            None => None,
        };

        Ok(LevelView {
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            subfile_type,
            compression,
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Value bytes for an entry, inline or fetched from its offset.
    async fn value_bytes<R: RangeReader>(
        &self,
        reader: &R,
        entry: &RawEntry,
        tag_name: &'static str,
    ) -> Result<Bytes, TiffError> {
        let field_type = entry.field_type.ok_or(TiffError::BadValue(tag_name))?;
        let total = field_type.size_in_bytes() as u64 * entry.count;

        if entry.is_inline(&self.header) {
            Ok(Bytes::copy_from_slice(
                &entry.value_field[..total as usize],
            ))
        } else {
            let offset = entry.value_offset(self.header.byte_order);
            Ok(reader.read_exact_at(offset, total as usize).await?)
        }
    }

    async fn scalar_u32<R: RangeReader>(
        &self,
        reader: &R,
        ifd: &Ifd,
        tag: TiffTag,
    ) -> Result<u32, TiffError> {
        let name = tag_name(tag);
        let entry = ifd.get(tag).ok_or(TiffError::MissingTag(name))?;
        if entry.count != 1 {
            return Err(TiffError::BadValue(name));
        }
        let bytes = self.value_bytes(reader, entry, name).await?;
        let bo = self.header.byte_order;
        match entry.field_type {
            Some(FieldType::Short) => Ok(bo.read_u16(&bytes) as u32),
            Some(FieldType::Long) => Ok(bo.read_u32(&bytes)),
            Some(FieldType::Long8) => Ok(bo.read_u64(&bytes) as u32),
            _ => Err(TiffError::BadValue(name)),
        }
    }

    async fn array_u64<R: RangeReader>(
        &self,
        reader: &R,
        ifd: &Ifd,
        tag: TiffTag,
    ) -> Result<Vec<u64>, TiffError> {
        let name = tag_name(tag);
        let entry = ifd.get(tag).ok_or(TiffError::MissingTag(name))?;
        let bytes = self.value_bytes(reader, entry, name).await?;
        let bo = self.header.byte_order;

        let elem = entry
            .field_type
            .ok_or(TiffError::BadValue(name))?
            .size_in_bytes();
        let mut values = Vec::with_capacity(entry.count as usize);
        for chunk in bytes.chunks_exact(elem) {
            values.push(match elem {
                2 => bo.read_u16(chunk) as u64,
                4 => bo.read_u32(chunk) as u64,
                8 => bo.read_u64(chunk),
                _ => return Err(TiffError::BadValue(name)),
            });
        }
        Ok(values)
    }

    async fn raw_bytes<R: RangeReader>(
        &self,
        reader: &R,
        ifd: &Ifd,
        tag: TiffTag,
    ) -> Result<Bytes, TiffError> {
        let name = tag_name(tag);
        let entry = ifd.get(tag).ok_or(TiffError::MissingTag(name))?;
        self.value_bytes(reader, entry, name).await
    }
}

fn tag_name(tag: TiffTag) -> &'static str {
    match tag {
        TiffTag::NewSubfileType => "NewSubfileType",
        TiffTag::ImageWidth => "ImageWidth",
        TiffTag::ImageLength => "ImageLength",
        TiffTag::BitsPerSample => "BitsPerSample",
        TiffTag::Compression => "Compression",
        TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
        TiffTag::SamplesPerPixel => "SamplesPerPixel",
        TiffTag::Software => "Software",
        TiffTag::TileWidth => "TileWidth",
        TiffTag::TileLength => "TileLength",
        TiffTag::TileOffsets => "TileOffsets",
        TiffTag::TileByteCounts => "TileByteCounts",
        TiffTag::SampleFormat => "SampleFormat",
        TiffTag::JpegTables => "JPEGTables",
        TiffTag::YCbCrSubSampling => "YCbCrSubSampling",
    }
}

// =============================================================================
// LevelView
// =============================================================================

/// The tile index of one pyramid level, ready for random tile access.
#[derive(Debug, Clone)]
pub struct LevelView {
    /// Level width in pixels
    pub width: u32,

    /// Level height in pixels
    pub height: u32,

    /// Tile width in pixels
    pub tile_width: u32,

    /// Tile height in pixels
    pub tile_height: u32,

    /// Tiles across
    pub tiles_x: u32,

    /// Tiles down
    pub tiles_y: u32,

    /// NewSubfileType value, if tagged
    pub subfile_type: Option<u32>,

    /// Compression value, if tagged
    pub compression: Option<u16>,

    /// Byte offset of each tile, row-major
    pub offsets: Vec<u64>,

    /// Byte count of each tile, row-major
    pub byte_counts: Vec<u64>,

    /// Shared JPEG tables, if the level uses them
    pub jpeg_tables: Option<Bytes>,
}

impl LevelView {
    /// Row-major tile index for `(tile_x, tile_y)`, if in bounds.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some((tile_y * self.tiles_x + tile_x) as usize)
    }

    /// Byte location `(offset, byte_count)` of a tile, if in bounds.
    pub fn tile_location(&self, tile_x: u32, tile_y: u32) -> Option<(u64, u64)> {
        let index = self.tile_index(tile_x, tile_y)?;
        match (self.offsets.get(index), self.byte_counts.get(index)) {
            (Some(&offset), Some(&count)) => Some((offset, count)),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
