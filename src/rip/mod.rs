//! The pyramid assembly engine.
//!
//! `base` re-tiles the DZI into the full-resolution IFD with the help of
//! `filler` and the `stripe` caches; `pyramid` then grows the chain of
//! half-resolution IFDs by reading the file back. `engine` sequences the
//! two passes.

pub mod base;
pub(crate) mod canvas;
pub mod encoder;
pub mod engine;
pub mod filler;
pub mod progress;
pub mod pyramid;
pub mod stripe;

pub use base::LayerStats;
pub use encoder::{TileEncoder, DEFAULT_JPEG_QUALITY};
pub use engine::{default_software, RipOptions, RipSummary, Ripper, DEFAULT_OUTPUT_TILE};
pub use filler::RegionFiller;
pub use progress::{LogSink, NullSink, ProgressEvent, ProgressSink};
pub use pyramid::{
    downsample_into, reduced_layer_count, LevelDecoder, PyramidStats, MIN_REDUCED_DIMENSION,
};
pub use stripe::{CachePair, HorizontalCache, StripeCaches, VerticalCache};
