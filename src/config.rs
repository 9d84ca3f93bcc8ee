//! Configuration for the `rip` command line.
//!
//! Options come from command-line arguments with `RIP_`-prefixed
//! environment variable fallbacks:
//!
//! - `RIP_TILE_SIZE` - output tile side in pixels (default: 256)
//! - `RIP_JPEG_QUALITY` - output JPEG quality (default: 75)
//! - `RIP_MAX_RETRIES` - fetch attempts per tile (default: 3)
//! - `RIP_RETRY_INTERVAL_MS` - pause between attempts (default: 1000)

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::dzi::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_INTERVAL_MS};
use crate::rip::{default_software, RipOptions, DEFAULT_JPEG_QUALITY, DEFAULT_OUTPUT_TILE};

/// Archive a Deep Zoom Image pyramid as a single pyramid TIFF.
///
/// Reads a DZI manifest (HTTP, HTTPS or local), stitches its tiles into a
/// tiled JPEG-compressed TIFF with a full chain of half-resolution levels,
/// and writes one self-contained output file.
#[derive(Parser, Debug, Clone)]
#[command(name = "rip")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// DZI manifest URI: http(s)://, file://, a manifest path, or a plain
    /// raster file to wrap as a one-layer source.
    pub source_uri: String,

    /// Path of the pyramid TIFF to write.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output tile side in pixels; must be a positive multiple of 16.
    #[arg(long, default_value_t = DEFAULT_OUTPUT_TILE, env = "RIP_TILE_SIZE")]
    pub tile_size: u32,

    /// JPEG quality for output tiles (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "RIP_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Store quantization tables once per IFD instead of once per tile.
    #[arg(long, default_value_t = false)]
    pub use_shared_quantization_tables: bool,

    /// Do not write the Software tag.
    #[arg(long, default_value_t = false)]
    pub no_software_field: bool,

    /// Fetch attempts per tile before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, env = "RIP_MAX_RETRIES")]
    pub max_retries: u32,

    /// Pause between fetch attempts, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL_MS, env = "RIP_RETRY_INTERVAL_MS")]
    pub retry_interval_ms: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 || self.tile_size % 16 != 0 {
            return Err(format!(
                "tile_size must be a positive multiple of 16, got {}",
                self.tile_size
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                self.jpeg_quality
            ));
        }
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }
        if self.source_uri.is_empty() {
            return Err("source URI must not be empty".to_string());
        }
        Ok(())
    }

    /// Engine options derived from the flags.
    pub fn rip_options(&self) -> RipOptions {
        RipOptions {
            output_tile: self.tile_size,
            quality: self.jpeg_quality,
            shared_quant_tables: self.use_shared_quantization_tables,
            software: (!self.no_software_field).then(default_software),
        }
    }

    /// Fetch retry policy derived from the flags.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
