//! dzi-ripper - Deep Zoom Image pyramids archived as pyramid TIFFs.
//!
//! This library converts a DZI tile pyramid (HTTP-hosted or on local disk)
//! into a single tiled, JPEG-compressed pyramid TIFF: the first IFD holds
//! the full-resolution image, followed by a chain of half-resolution IFDs
//! down to roughly one output tile across.

pub mod config;
pub mod dzi;
pub mod error;
pub mod format;
pub mod io;
pub mod rip;

// Re-export commonly used types
pub use config::Config;
pub use dzi::{
    decode_tile, open_source, DziLayout, DziSource, FetchMetrics, HttpDziSource, LocalDziSource,
    Manifest, RetryPolicy, SingleRasterSource,
};
pub use error::{FetchError, RipError, TiffError};
pub use format::jpeg::{
    chroma_quant_table, luma_quant_table, merge_jpeg_tables, shared_quant_tables,
    strip_quant_tables,
};
pub use format::tiff::{
    use_big_tiff, ByteOrder, IfdBuilder, LevelView, TiffHeader, TiffSliceReader, TiffWriter,
    CLASSIC_PIXEL_LIMIT,
};
pub use io::{FileRangeReader, RangeReader};
pub use rip::{
    reduced_layer_count, LogSink, NullSink, ProgressEvent, ProgressSink, RipOptions, RipSummary,
    Ripper, TileEncoder,
};
