//! # CRSF Bridge
//!
//! Relay CRSF frames between a half-duplex serial radio link and UDP.
//!
//! Usage: `crsf-bridge [CONFIG_PATH]` (defaults to `config/default.toml`).

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crsf_bridge::bridge::Bridge;
use crsf_bridge::config::{Config, LoggingConfig};
use crsf_bridge::serial;
use crsf_bridge::udp::UdpTransport;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Log file name prefix inside `logging.log_dir`
const LOG_FILE_PREFIX: &str = "crsf-bridge.log";

/// Default filter: `RUST_LOG` wins, otherwise INFO (or DEBUG when configured)
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt::layer());

    if config.log_dir.is_empty() {
        registry.try_init().context("Failed to install logger")?;
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .context("Failed to install logger")?;

    Ok(Some(guard))
}

/// Main entry point for CRSF Bridge
///
/// 1. Load configuration and set up logging
/// 2. Open the serial line (port + direction pins) and the UDP socket
/// 3. Run the bridge until Ctrl+C or a fatal I/O error
///
/// # Errors
///
/// Returns error if the configuration is invalid, the serial port or GPIO
/// lines cannot be claimed, the socket cannot be bound, or the bridge stops
/// on a fatal I/O error.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging)?;

    info!("CRSF Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let transceiver = serial::open_transceiver(&config.serial, &config.direction)?;
    let transport = UdpTransport::bind(
        config.udp.local_port,
        &config.udp.remote_host,
        config.udp.remote_port,
    )
    .await?;

    let bridge = Bridge::new(
        transceiver,
        transport,
        config.bridge.clone(),
        config.serial.poll_interval(),
    );

    let cancel = CancellationToken::new();
    let run = tokio::spawn(bridge.run(cancel.clone()));

    info!("Press Ctrl+C to exit");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    run.await.context("Bridge task panicked")??;
    info!("Shutdown complete");

    Ok(())
}
