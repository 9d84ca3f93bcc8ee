//! JPEG stream handling for JPEG-in-TIFF tiles.
//!
//! Tiles are stored per TIFF Technical Note 2: either as self-contained
//! JPEG streams, or as abbreviated streams whose quantization tables live
//! once in the IFD's `JPEGTables` field.
//!
//! The write path strips DQT segments out of each encoded tile and emits a
//! shared `SOI + DQT + DQT + EOI` tables stream computed from the Annex K
//! base tables. The read path reverses this: strip EOI from tables, strip
//! SOI from the tile, concatenate.

use bytes::{BufMut, Bytes, BytesMut};

// =============================================================================
// JPEG Markers
// =============================================================================

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

/// Define Huffman Table marker
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Start Of Scan marker
pub const SOS: [u8; 2] = [0xFF, 0xDA];

// =============================================================================
// Quantization Tables
// =============================================================================

/// JPEG Annex K luminance base table (quality 50), natural order.
#[rustfmt::skip]
const STD_LUMA_QUANT: [u8; 64] = [
    16,  11,  10,  16,  24,  40,  51,  61,
    12,  12,  14,  19,  26,  58,  60,  55,
    14,  13,  16,  24,  40,  57,  69,  56,
    14,  17,  22,  29,  51,  87,  80,  62,
    18,  22,  37,  56,  68, 109, 103,  77,
    24,  35,  55,  64,  81, 104, 113,  92,
    49,  64,  78,  87, 103, 121, 120, 101,
    72,  92,  95,  98, 112, 100, 103,  99,
];

/// JPEG Annex K chrominance base table (quality 50), natural order.
#[rustfmt::skip]
const STD_CHROMA_QUANT: [u8; 64] = [
    17,  18,  24,  47,  99,  99,  99,  99,
    18,  21,  26,  66,  99,  99,  99,  99,
    24,  26,  56,  99,  99,  99,  99,  99,
    47,  66,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99,
];

/// Natural-order index for each zigzag scan position.
#[rustfmt::skip]
const UNZIGZAG: [u8; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Scale an Annex K base table by the classical quality formula.
///
/// `S(Q) = 5000/Q` below 50, `200 - 2Q` at or above; each coefficient
/// becomes `(base * S + 50) / 100` clamped to `1..=255`. This matches what
/// baseline encoders derive from the same base tables, so a stream encoded
/// at the same quality quantizes identically.
pub fn scaled_quant_table(base: &[u8; 64], quality: u8) -> [u8; 64] {
    let quality = u32::from(quality.clamp(1, 100));
    let scale = if quality < 50 {
        5000 / quality
    } else {
        200 - 2 * quality
    };

    let mut table = [0u8; 64];
    for (out, &value) in table.iter_mut().zip(base.iter()) {
        *out = ((u32::from(value) * scale + 50) / 100).clamp(1, 255) as u8;
    }
    table
}

/// Luminance quantization table at the given quality, natural order.
pub fn luma_quant_table(quality: u8) -> [u8; 64] {
    scaled_quant_table(&STD_LUMA_QUANT, quality)
}

/// Chrominance quantization table at the given quality, natural order.
pub fn chroma_quant_table(quality: u8) -> [u8; 64] {
    scaled_quant_table(&STD_CHROMA_QUANT, quality)
}

/// Serialize one DQT segment: marker, length 67, Pq/Tq byte, 64 zigzag
/// coefficients.
fn push_dqt_segment(out: &mut BytesMut, table: &[u8; 64], slot: u8) {
    out.extend_from_slice(&DQT);
    out.extend_from_slice(&67u16.to_be_bytes());
    out.put_u8(slot & 0x0F);
    for &i in UNZIGZAG.iter() {
        out.put_u8(table[usize::from(i)]);
    }
}

/// Build the shared `JPEGTables` stream for the given quality.
///
/// A minimal abbreviated table-specification stream: SOI, luminance DQT in
/// slot 0, chrominance DQT in slot 1, EOI.
pub fn shared_quant_tables(quality: u8) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + 2 * 69 + 2);
    out.extend_from_slice(&SOI);
    push_dqt_segment(&mut out, &luma_quant_table(quality), 0);
    push_dqt_segment(&mut out, &chroma_quant_table(quality), 1);
    out.extend_from_slice(&EOI);
    out.freeze()
}

// =============================================================================
// Stream Surgery
// =============================================================================

/// Remove every DQT segment from a complete JPEG stream.
///
/// Used when quantization tables are shared through `JPEGTables`: each tile
/// keeps its SOI, frame/Huffman segments, scan data and EOI, but drops the
/// tables it duplicates. Everything from SOS onward is copied verbatim
/// because entropy-coded data may contain 0xFF bytes that are not markers.
///
/// A stream that does not start with SOI is returned unchanged.
pub fn strip_quant_tables(data: &[u8]) -> Bytes {
    if data.len() < 4 || data[0..2] != SOI {
        return Bytes::copy_from_slice(data);
    }

    let mut out = BytesMut::with_capacity(data.len());
    out.extend_from_slice(&SOI);

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            // Not a marker boundary; keep the byte and move on.
            out.extend_from_slice(&data[pos..pos + 1]);
            pos += 1;
            continue;
        }

        let marker = [data[pos], data[pos + 1]];
        if marker == SOS {
            out.extend_from_slice(&data[pos..]);
            break;
        }
        if marker == EOI {
            out.extend_from_slice(&EOI);
            break;
        }

        // Standalone markers (TEM, RSTn) have no length field.
        if (0xD0..=0xD9).contains(&marker[1]) || marker[1] == 0x01 {
            out.extend_from_slice(&marker);
            pos += 2;
            continue;
        }

        if pos + 4 > data.len() {
            out.extend_from_slice(&data[pos..]);
            break;
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let end = (pos + 2 + length).min(data.len());
        if marker != DQT {
            out.extend_from_slice(&data[pos..end]);
        }
        pos = end;
    }

    out.freeze()
}

/// Merge a `JPEGTables` stream with an abbreviated tile stream.
///
/// Strip the trailing EOI from the tables, strip the leading SOI from the
/// tile, concatenate. The result decodes with any baseline JPEG decoder.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.len() >= 2 && tables[tables.len() - 2..] == EOI {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.len() >= 2 && tile_data[0..2] == SOI {
        2
    } else {
        0
    };

    let mut result = BytesMut::with_capacity(tables_end + (tile_data.len() - tile_start));
    result.extend_from_slice(&tables[..tables_end]);
    result.extend_from_slice(&tile_data[tile_start..]);
    result.freeze()
}

/// Check whether a JPEG stream carries its own quantization tables.
pub fn has_quant_tables(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }
    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = [data[pos], data[pos + 1]];
        if marker == DQT {
            return true;
        }
        if marker == SOS {
            return false;
        }
        if (0xD0..=0xD9).contains(&marker[1]) || marker[1] == 0x01 {
            pos += 2;
            continue;
        }
        if pos + 4 > data.len() {
            return false;
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 2 + length;
    }
    false
}

// =============================================================================
// Tests
// =============================================================================
