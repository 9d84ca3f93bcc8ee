use async_trait::async_trait;
use bytes::Bytes;

/// Trait for reading byte ranges from a finished or in-progress output file.
///
/// The reduced-resolution pass re-reads tiles the base pass already wrote;
/// this abstraction keeps the TIFF read-back code independent of how the
/// file handle is managed.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, std::io::Error>;

    /// Total size of the resource in bytes at the time it was opened.
    fn size(&self) -> u64;
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// The writer always emits little-endian ("II") files, but the read-back
// parser keeps both byte orders so it can also be pointed at foreign files
// in tests and tooling.

/// Read a little-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Read a big-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
