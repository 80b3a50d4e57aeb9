//! Audio Transcoding Server
//!
//! Accepts an uploaded audio file over HTTP and returns it re-encoded as
//! WAV or MP3 with the requested parameters. Conversions are streamed
//! through FFmpeg into a per-request scratch file that is removed once the
//! response has been delivered. `audio-transcoder encode` runs the same
//! conversions over files on disk.

mod artifact;
mod batch;
mod cli;
mod config;
mod config_file;
mod error;
mod ffmpeg;
mod form;
mod format;
mod http;
#[cfg(test)]
mod integration;
mod metrics;
mod orchestrator;
mod params;
mod state;
mod transcode;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::batch::BatchEncoder;
use crate::cli::{Cli, Command, EncodeCommand};
use crate::config::{LogFormat, ServerConfig};
use crate::error::{Result, TranscodeError};
use crate::format::FormatRegistry;
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "audio-transcoder";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.init_config.as_deref() {
        config_file::generate_default_config(path)
            .map_err(|e| TranscodeError::Config(format!("Failed to write {}: {}", path, e)))?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    if let Some(Command::Encode(command)) = cli.command {
        init_logging(&ServerConfig::default());
        ffmpeg::init()?;
        ffmpeg::install_log_filter();
        return encode(command).await;
    }

    let (config, config_warning) = load_config(&cli.config);

    init_logging(&config);
    if let Some(warning) = config_warning {
        tracing::warn!("{}", warning);
    }

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!("FFmpeg version: {}", ffmpeg::version_info());

    ffmpeg::init()?;
    ffmpeg::install_log_filter();
    if !transcode::encoder::is_mp3_encoder_available() {
        tracing::warn!("No MP3 encoder available, MP3 output requests will fail");
    }
    tracing::info!("FFmpeg initialized successfully");
    tracing::info!("Configuration loaded: {:?}", config);

    std::fs::create_dir_all(&config.scratch_dir)?;
    artifact::sweep_stale(&config.scratch_dir)?;

    let registry = FormatRegistry::builtin()
        .map_err(|e| TranscodeError::Config(format!("Format registry: {}", e)))?;
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::with_registry(
        config.clone(),
        registry,
        shutdown.clone(),
    ));

    let app = create_router(state.clone());

    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| TranscodeError::Config(format!("Invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Convert files on disk. Ctrl-C cancels the file in progress and ends the batch.
async fn encode(command: EncodeCommand) -> Result<()> {
    let output = command.output_format();
    let config = params::validate(output, &command.fields())?;
    let registry = FormatRegistry::builtin()
        .map_err(|e| TranscodeError::Config(format!("Format registry: {}", e)))?;

    let batch = command.batch().clone();
    let encoder = BatchEncoder::new(registry, config, &batch);
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let token = cancel.clone();
    let summary = tokio::task::spawn_blocking(move || encoder.run(&batch.paths, &token))
        .await
        .map_err(|e| TranscodeError::Internal(format!("Batch task failed: {}", e)))??;

    tracing::info!(
        converted = summary.converted,
        failed = summary.failed,
        skipped = summary.skipped,
        "batch finished"
    );
    if cancel.is_cancelled() {
        return Err(TranscodeError::Cancelled);
    }
    if summary.failed > 0 {
        return Err(TranscodeError::Internal(format!(
            "{} file(s) failed to convert",
            summary.failed
        )));
    }
    Ok(())
}

/// Config from `path`, falling back to defaults when missing or unreadable.
/// Logging is not up yet, so a load failure is returned as a message.
fn load_config(path: &str) -> (ServerConfig, Option<String>) {
    if !std::path::Path::new(path).exists() {
        return (ServerConfig::default(), None);
    }
    match config_file::ConfigFile::from_file(path) {
        Ok(cf) => (cf.into_server_config(), None),
        Err(e) => (
            ServerConfig::default(),
            Some(format!(
                "Failed to load config file {}: {}. Using defaults.",
                path, e
            )),
        ),
    }
}

/// Wait for Ctrl-C, then cancel everything running under `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown requested, cancelling in-flight transcodes");
    shutdown.cancel();
}

/// Initialize logging with tracing
fn init_logging(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "audio_transcoder={},tower_http={}",
            config.log_level, config.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
