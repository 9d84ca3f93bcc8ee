//! `rip` - archive a Deep Zoom Image pyramid as one pyramid TIFF.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dzi_ripper::{
    config::Config,
    dzi::open_source,
    rip::{LogSink, RipOptions, Ripper},
};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    if let Err(e) = run(&config, cancel).await {
        error!("Rip failed: {}", e);
        warn!(
            "The output file at {} is incomplete and should be deleted",
            config.output.display()
        );
        std::process::exit(1);
    }
}

async fn run(config: &Config, cancel: CancellationToken) -> Result<(), dzi_ripper::RipError> {
    info!("Opening source {}", config.source_uri);
    let source = open_source(&config.source_uri, config.retry_policy()).await?;

    let manifest = source.manifest();
    info!(
        "  {}x{} pixels, {}px {} tiles, overlap {}",
        manifest.width, manifest.height, manifest.tile_size, manifest.format, manifest.overlap
    );

    let options: RipOptions = config.rip_options();
    let ripper = Ripper::new(options)?;
    let summary = ripper
        .rip(source.as_ref(), &config.output, &LogSink, &cancel)
        .await?;

    info!(
        "Wrote {} ({} IFDs, {} tiles, {} tile bytes, {}, {} fetches, {} retries)",
        config.output.display(),
        summary.ifd_count,
        summary.tile_count,
        summary.tile_bytes,
        if summary.big_tiff { "BigTIFF" } else { "TIFF" },
        summary.metrics.fetches,
        summary.metrics.retries,
    );
    Ok(())
}

/// Cancel the rip on Ctrl-C; a second Ctrl-C kills the process.
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current tile");
            cancel.cancel();
        }
    });
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dzi_ripper=debug,rip=debug"
    } else {
        "dzi_ripper=info,rip=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
