//! Progress reporting for long rips.

use tracing::info;

/// Events emitted while a rip runs, in order of occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The base layer starts; `tile_count` output tiles will be written.
    StartBase { tile_count: u64 },

    /// One more base output tile has been written.
    BaseProgress { done: u64, total: u64 },

    /// The base layer is complete.
    CompleteBase { tile_count: u64, bytes: u64 },

    /// The reduced-resolution passes start; `layer_count` layers follow.
    StartPyramid { layer_count: u32 },

    /// One reduced layer starts.
    StartLayer {
        layer: u32,
        tile_count: u64,
        width: u32,
        height: u32,
    },

    /// One more tile of the given reduced layer has been written.
    LayerProgress { layer: u32, done: u64, total: u64 },

    /// One reduced layer is complete.
    CompleteLayer {
        layer: u32,
        tile_count: u64,
        bytes: u64,
    },

    /// All reduced layers are complete.
    CompletePyramid { layer_count: u32 },
}

/// Receiver for progress events.
///
/// Implementations must be cheap: events fire once per output tile.
pub trait ProgressSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: &ProgressEvent);
}

/// Sink that forwards events to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StartBase { tile_count } => {
                info!(tiles = tile_count, "writing base layer");
            }
            ProgressEvent::BaseProgress { done, total } => {
                if done % 64 == 0 || done == total {
                    info!(done, total, "base layer progress");
                }
            }
            ProgressEvent::CompleteBase { tile_count, bytes } => {
                info!(tiles = tile_count, bytes, "base layer complete");
            }
            ProgressEvent::StartPyramid { layer_count } => {
                info!(layers = layer_count, "writing reduced-resolution layers");
            }
            ProgressEvent::StartLayer {
                layer,
                tile_count,
                width,
                height,
            } => {
                info!(layer, tiles = tile_count, width, height, "writing layer");
            }
            ProgressEvent::LayerProgress { .. } => {}
            ProgressEvent::CompleteLayer {
                layer,
                tile_count,
                bytes,
            } => {
                info!(layer, tiles = tile_count, bytes, "layer complete");
            }
            ProgressEvent::CompletePyramid { layer_count } => {
                info!(layers = layer_count, "pyramid complete");
            }
        }
    }
}

/// Sink that discards all events.
#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: &ProgressEvent) {}
}
