//! DZI tile sources.
//!
//! A source resolves `(layer, col, row)` to the encoded bytes of one tile.
//! The engine never calls a source concurrently, so implementations only
//! need interior mutability for their counters.
//!
//! Three variants cover the supported inputs:
//! - [`HttpDziSource`] - manifest and tiles fetched over HTTP with retry
//! - [`LocalDziSource`] - manifest and tiles read from a local `_files` tree
//! - [`SingleRasterSource`] - a plain raster wrapped as a degenerate DZI

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, RgbImage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, RipError};

use super::manifest::{base_layer_index, Manifest};

/// Default number of fetch attempts per tile.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between fetch attempts in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

// =============================================================================
// Source Trait
// =============================================================================

/// Fetch counters, readable at any point during or after a rip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchMetrics {
    /// Tiles successfully fetched
    pub fetches: u64,

    /// Extra attempts beyond the first, across all tiles
    pub retries: u64,
}

/// A resolver from DZI tile coordinates to encoded tile bytes.
#[async_trait]
pub trait DziSource: Send + Sync {
    /// The manifest describing this source. Immutable after open.
    fn manifest(&self) -> &Manifest;

    /// Fetch the encoded bytes of one tile.
    ///
    /// Idempotent: fetching the same coordinates twice yields the same
    /// bytes. Cancellation is observed at least once per retry attempt.
    async fn copy_tile(
        &self,
        layer: u32,
        col: u32,
        row: u32,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError>;

    /// Snapshot of the fetch counters.
    fn metrics(&self) -> FetchMetrics;
}

/// Shared counter cell for source implementations.
#[derive(Debug, Default)]
struct MetricsCell {
    fetches: AtomicU64,
    retries: AtomicU64,
}

impl MetricsCell {
    fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FetchMetrics {
        FetchMetrics {
            fetches: self.fetches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Fixed-interval retry configuration for remote fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per tile (at least 1)
    pub max_retries: u32,

    /// Pause between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: DEFAULT_MAX_RETRIES,
            interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

// =============================================================================
// HTTP Source
// =============================================================================

/// DZI source backed by an HTTP(S) server.
///
/// Tile URLs follow the Deep Zoom convention:
/// `{base}/{name}_files/{layer}/{col}_{row}.{format}` where `{base}` is the
/// manifest URL with its filename stripped and `{name}` is the manifest
/// filename without extension.
pub struct HttpDziSource {
    client: reqwest::Client,
    files_base: Url,
    manifest: Manifest,
    policy: RetryPolicy,
    metrics: MetricsCell,
}

impl HttpDziSource {
    /// Fetch and parse the manifest at `manifest_url`.
    pub async fn open(manifest_url: &str, policy: RetryPolicy) -> Result<Self, RipError> {
        let url = Url::parse(manifest_url)
            .map_err(|e| RipError::ManifestInvalid(format!("bad manifest URL: {e}")))?;
        let files_base = files_base_url(&url)?;

        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();
        let metrics = MetricsCell::default();
        let body = fetch_with_retry(&client, url.clone(), &policy, &cancel, &metrics)
            .await
            .map_err(|e| RipError::ManifestInvalid(format!("failed to fetch manifest: {e}")))?;

        let manifest = Manifest::parse(&String::from_utf8_lossy(&body))?;
        debug!(url = %url, ?manifest, "opened HTTP DZI source");

        Ok(HttpDziSource {
            client,
            files_base,
            manifest,
            policy,
            metrics: MetricsCell::default(),
        })
    }

    fn tile_url(&self, layer: u32, col: u32, row: u32) -> Result<Url, FetchError> {
        let path = format!(
            "{}/{}_{}.{}",
            layer, col, row, self.manifest.format
        );
        self.files_base
            .join(&path)
            .map_err(|e| FetchError::NotFound(format!("bad tile URL {path}: {e}")))
    }
}

#[async_trait]
impl DziSource for HttpDziSource {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn copy_tile(
        &self,
        layer: u32,
        col: u32,
        row: u32,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let url = self.tile_url(layer, col, row)?;
        let bytes = fetch_with_retry(&self.client, url, &self.policy, cancel, &self.metrics).await?;
        self.metrics.record_fetch();
        Ok(bytes)
    }

    fn metrics(&self) -> FetchMetrics {
        self.metrics.snapshot()
    }
}

/// Derive `{base}/{name}_files/` from the manifest URL.
fn files_base_url(manifest_url: &Url) -> Result<Url, RipError> {
    let file_name = manifest_url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            RipError::ManifestInvalid(format!("manifest URL has no filename: {manifest_url}"))
        })?;
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);

    // Trailing slash so tile paths join under the directory.
    manifest_url
        .join(&format!("{stem}_files/"))
        .map_err(|e| RipError::ManifestInvalid(format!("bad manifest URL: {e}")))
}

/// GET `url`, retrying up to `policy.max_retries` attempts with a fixed
/// pause. Any non-2xx status or transport error counts as a failed attempt;
/// the final error aggregates one cause per attempt.
async fn fetch_with_retry(
    client: &reqwest::Client,
    url: Url,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    metrics: &MetricsCell,
) -> Result<Bytes, FetchError> {
    let attempts = policy.max_retries.max(1);
    let mut causes = Vec::new();
    let mut all_not_found = true;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if attempt > 1 {
            metrics.record_retry();
            tokio::time::sleep(policy.interval).await;
        }

        match client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.bytes().await.map_err(|e| FetchError::Transport {
                        causes: vec![format!("attempt {attempt}: body read: {e}")],
                    });
                }
                if status != reqwest::StatusCode::NOT_FOUND {
                    all_not_found = false;
                }
                warn!(%url, %status, attempt, "tile fetch failed");
                causes.push(format!("attempt {attempt}: HTTP {status}"));
            }
            Err(e) => {
                all_not_found = false;
                warn!(%url, error = %e, attempt, "tile fetch failed");
                causes.push(format!("attempt {attempt}: {e}"));
            }
        }
    }

    if all_not_found {
        Err(FetchError::NotFound(format!("{url}: HTTP 404")))
    } else {
        Err(FetchError::Transport { causes })
    }
}

// =============================================================================
// Local Source
// =============================================================================

/// DZI source backed by a manifest and `_files` tree on local disk.
pub struct LocalDziSource {
    files_dir: PathBuf,
    manifest: Manifest,
    metrics: MetricsCell,
}

impl LocalDziSource {
    /// Read and parse the manifest at `manifest_path`.
    pub async fn open(manifest_path: impl AsRef<Path>) -> Result<Self, RipError> {
        let manifest_path = manifest_path.as_ref();
        let xml = tokio::fs::read_to_string(manifest_path).await?;
        let manifest = Manifest::parse(&xml)?;

        let stem = manifest_path
            .file_stem()
            .ok_or_else(|| {
                RipError::ManifestInvalid(format!(
                    "manifest path has no filename: {}",
                    manifest_path.display()
                ))
            })?
            .to_string_lossy();
        let files_dir = manifest_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}_files"));

        Ok(LocalDziSource {
            files_dir,
            manifest,
            metrics: MetricsCell::default(),
        })
    }

    fn tile_path(&self, layer: u32, col: u32, row: u32) -> PathBuf {
        self.files_dir
            .join(layer.to_string())
            .join(format!("{}_{}.{}", col, row, self.manifest.format))
    }
}

#[async_trait]
impl DziSource for LocalDziSource {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn copy_tile(
        &self,
        layer: u32,
        col: u32,
        row: u32,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let path = self.tile_path(layer, col, row);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                self.metrics.record_fetch();
                Ok(Bytes::from(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(FetchError::Transport {
                causes: vec![format!("{}: {e}", path.display())],
            }),
        }
    }

    fn metrics(&self) -> FetchMetrics {
        self.metrics.snapshot()
    }
}

// =============================================================================
// Single Raster Source
// =============================================================================

/// A plain raster file (TIFF, PNG, JPEG, ...) served as a degenerate DZI.
///
/// The raster is decoded once at open; tiles are cut from it on demand and
/// re-encoded losslessly as PNG so the byte contract of [`DziSource`] holds
/// without altering pixels.
pub struct SingleRasterSource {
    image: RgbImage,
    manifest: Manifest,
    base_layer: u32,
    metrics: MetricsCell,
}

impl SingleRasterSource {
    /// Decode the raster at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RipError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| RipError::DecodeFailed(format!("raster: {e}")))?
            .to_rgb8();

        let (width, height) = image.dimensions();
        let manifest = Manifest::for_raster(width, height)?;
        let base_layer = base_layer_index(width, height);

        Ok(SingleRasterSource {
            image,
            manifest,
            base_layer,
            metrics: MetricsCell::default(),
        })
    }
}

#[async_trait]
impl DziSource for SingleRasterSource {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn copy_tile(
        &self,
        layer: u32,
        col: u32,
        row: u32,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if layer != self.base_layer {
            return Err(FetchError::NotFound(format!(
                "raster source only serves layer {}, got {layer}",
                self.base_layer
            )));
        }

        let s = self.manifest.tile_size;
        let (width, height) = self.image.dimensions();
        let x = col * s;
        let y = row * s;
        if x >= width || y >= height {
            return Err(FetchError::NotFound(format!(
                "tile {col}_{row} outside {width}x{height} raster"
            )));
        }

        let w = s.min(width - x);
        let h = s.min(height - y);
        let view = image::imageops::crop_imm(&self.image, x, y, w, h).to_image();

        let mut buf = Vec::new();
        view.write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| FetchError::Transport {
                causes: vec![format!("tile encode: {e}")],
            })?;

        self.metrics.record_fetch();
        Ok(Bytes::from(buf))
    }

    fn metrics(&self) -> FetchMetrics {
        self.metrics.snapshot()
    }
}

// =============================================================================
// Source Factory
// =============================================================================

/// Open the right source for `uri`.
///
/// `http://` and `https://` URIs go to [`HttpDziSource`]. `file://` URIs and
/// plain paths are inspected: XML content is treated as a DZI manifest,
/// anything else as a single raster.
pub async fn open_source(uri: &str, policy: RetryPolicy) -> Result<Box<dyn DziSource>, RipError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Box::new(HttpDziSource::open(uri, policy).await?));
    }

    let path = if let Some(rest) = uri.strip_prefix("file://") {
        PathBuf::from(rest)
    } else {
        PathBuf::from(uri)
    };

    // A manifest is small and text; sniff the leading bytes rather than
    // trusting the extension.
    let head = tokio::fs::read(&path).await?;
    let looks_like_xml = head
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<');

    if looks_like_xml {
        Ok(Box::new(LocalDziSource::open(&path).await?))
    } else {
        Ok(Box::new(SingleRasterSource::open(&path).await?))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_base_url() {
        let url = Url::parse("https://example.com/scans/mona.dzi").unwrap();
        let base = files_base_url(&url).unwrap();
        assert_eq!(base.as_str(), "https://example.com/scans/mona_files/");
    }

    #[test]
    fn test_files_base_url_no_extension() {
        let url = Url::parse("https://example.com/scans/mona").unwrap();
        let base = files_base_url(&url).unwrap();
        assert_eq!(base.as_str(), "https://example.com/scans/mona_files/");
    }

    #[test]
    fn test_files_base_url_rejects_directory() {
        let url = Url::parse("https://example.com/scans/").unwrap();
        assert!(files_base_url(&url).is_err());
    }

    #[test]
    fn test_tile_url_formation() {
        let source = HttpDziSource {
            client: reqwest::Client::new(),
            files_base: Url::parse("https://example.com/scans/mona_files/").unwrap(),
            manifest: Manifest {
                format: "jpeg".to_string(),
                tile_size: 254,
                overlap: 1,
                width: 1000,
                height: 800,
            },
            policy: RetryPolicy::default(),
            metrics: MetricsCell::default(),
        };
        let url = source.tile_url(10, 3, 7).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/scans/mona_files/10/3_7.jpeg"
        );
    }

    #[tokio::test]
    async fn test_local_source_missing_tile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("img.dzi");
        tokio::fs::write(
            &manifest_path,
            r#"<Image Format="png" TileSize="256" Overlap="0"><Size Width="10" Height="10"/></Image>"#,
        )
        .await
        .unwrap();

        let source = LocalDziSource::open(&manifest_path).await.unwrap();
        let cancel = CancellationToken::new();
        let err = source.copy_tile(4, 0, 0, &cancel).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
        assert_eq!(source.metrics().fetches, 0);
    }

    #[tokio::test]
    async fn test_local_source_reads_tile() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("img.dzi");
        tokio::fs::write(
            &manifest_path,
            r#"<Image Format="png" TileSize="256" Overlap="0"><Size Width="10" Height="10"/></Image>"#,
        )
        .await
        .unwrap();
        let tile_dir = dir.path().join("img_files").join("4");
        tokio::fs::create_dir_all(&tile_dir).await.unwrap();
        tokio::fs::write(tile_dir.join("0_0.png"), b"tile-bytes")
            .await
            .unwrap();

        let source = LocalDziSource::open(&manifest_path).await.unwrap();
        let cancel = CancellationToken::new();
        let bytes = source.copy_tile(4, 0, 0, &cancel).await.unwrap();
        assert_eq!(&bytes[..], b"tile-bytes");
        assert_eq!(source.metrics().fetches, 1);
    }

    #[tokio::test]
    async fn test_local_source_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("img.dzi");
        tokio::fs::write(
            &manifest_path,
            r#"<Image Format="png" TileSize="256" Overlap="0"><Size Width="10" Height="10"/></Image>"#,
        )
        .await
        .unwrap();

        let source = LocalDziSource::open(&manifest_path).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source.copy_tile(4, 0, 0, &cancel).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_raster_source_round_trip() {
        use image::Rgb;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        let img = RgbImage::from_fn(300, 120, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 9]));
        img.save(&path).unwrap();

        let source = SingleRasterSource::open(&path).await.unwrap();
        assert_eq!(source.manifest().width, 300);
        assert_eq!(source.manifest().tile_size, 256);

        let cancel = CancellationToken::new();
        let base = source.base_layer;

        // Right-edge tile is clipped to 44 pixels wide.
        let bytes = source.copy_tile(base, 1, 0, &cancel).await.unwrap();
        let tile = crate::dzi::decode_tile(&bytes, "png").unwrap();
        assert_eq!(tile.dimensions(), (44, 120));
        assert_eq!(tile.get_pixel(0, 0), &Rgb([0, 0, 9])); // x=256 wraps mod 256

        // Out-of-grid coordinates do not exist.
        let err = source.copy_tile(base, 2, 0, &cancel).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }
}
