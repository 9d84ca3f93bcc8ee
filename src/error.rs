use thiserror::Error;

/// Errors raised while fetching a single DZI tile from a source.
///
/// Retry handling lives inside the source implementations; by the time one
/// of these surfaces, any configured retries are already exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The tile does not exist at the source.
    #[error("tile not found: {0}")]
    NotFound(String),

    /// Network or storage failure; one cause per attempt.
    #[error("transport error: {}", .causes.join("; "))]
    Transport { causes: Vec<String> },

    /// The operation was cancelled before the tile arrived.
    #[error("fetch cancelled")]
    Cancelled,
}

/// Errors from parsing TIFF structures during the read-back pass.
#[derive(Debug, Error)]
pub enum TiffError {
    /// First two bytes are not a recognized byte-order marker
    #[error("invalid TIFF magic: {0:#06x}")]
    InvalidMagic(u16),

    /// Version is neither 42 (classic) nor 43 (BigTIFF)
    #[error("invalid TIFF version: {0}")]
    InvalidVersion(u16),

    /// BigTIFF declared an offset size other than 8
    #[error("invalid BigTIFF offset size: {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// Not enough bytes to parse the requested structure
    #[error("file too small: need {required} bytes, have {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// An IFD offset points outside the file
    #[error("invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// A tag required by the tiled-pyramid layout is absent
    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    /// A tag is present but its type or count is unusable
    #[error("unreadable value for tag {0}")]
    BadValue(&'static str),

    /// Underlying read failure
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors for a rip operation.
///
/// Only fetch failures are recovered (by retry, inside the source); every
/// other variant aborts the rip and leaves a truncated output file that the
/// caller should delete.
#[derive(Debug, Error)]
pub enum RipError {
    /// The DZI manifest is malformed or missing required attributes.
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    /// All fetch attempts for one tile failed.
    #[error("fetch failed for tile {layer}/{col}_{row}: {}", .causes.join("; "))]
    FetchFailed {
        layer: u32,
        col: u32,
        row: u32,
        causes: Vec<String>,
    },

    /// Fetched tile bytes could not be decoded.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The JPEG encoder rejected a canvas. Should not occur for 8-bit RGB.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// File read/write error on the output TIFF.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The partially written output could not be read back.
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Cooperative cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid engine configuration (e.g. tile size not a multiple of 16).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RipError {
    /// Map a fetch failure for a specific tile into the engine error.
    pub fn from_fetch(err: FetchError, layer: u32, col: u32, row: u32) -> Self {
        match err {
            FetchError::Cancelled => RipError::Cancelled,
            FetchError::NotFound(cause) => RipError::FetchFailed {
                layer,
                col,
                row,
                causes: vec![cause],
            },
            FetchError::Transport { causes } => RipError::FetchFailed {
                layer,
                col,
                row,
                causes,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_joins_causes() {
        let err = FetchError::Transport {
            causes: vec!["timeout".to_string(), "status 503".to_string()],
        };
        assert_eq!(err.to_string(), "transport error: timeout; status 503");
    }

    #[test]
    fn test_from_fetch_cancelled() {
        let err = RipError::from_fetch(FetchError::Cancelled, 12, 3, 4);
        assert!(matches!(err, RipError::Cancelled));
    }

    #[test]
    fn test_from_fetch_not_found_keeps_cause() {
        let err = RipError::from_fetch(FetchError::NotFound("404".to_string()), 12, 3, 4);
        match err {
            RipError::FetchFailed {
                layer,
                col,
                row,
                causes,
            } => {
                assert_eq!((layer, col, row), (12, 3, 4));
                assert_eq!(causes, vec!["404".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
