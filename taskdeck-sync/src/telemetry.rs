//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events. Installing a subscriber is left
//! to the embedding process, which calls [`init_tracing`] once at startup.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{SyncError, SyncResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &LoggingConfig) -> SyncResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };
    installed.map_err(|e| SyncError::Telemetry(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(filter = %config.filter, format = ?config.format, "Tracing initialized");
    Ok(())
}
