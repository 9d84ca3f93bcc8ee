//! Deep Zoom Image (DZI) input handling.
//!
//! A DZI is a pyramid of small JPEG/PNG tiles with a configurable pixel
//! overlap on inner edges, described by an XML manifest. The ripper only
//! reads the largest (base) DZI layer; every coarser output level is
//! regenerated by downsampling the output file itself.

mod decode;
mod manifest;
mod source;

pub use decode::decode_tile;
pub use manifest::{DziLayout, Manifest};
pub use source::{
    open_source, DziSource, FetchMetrics, HttpDziSource, LocalDziSource, RetryPolicy,
    SingleRasterSource, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_INTERVAL_MS,
};
