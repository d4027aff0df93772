// packages/engine/src/observability/mod.rs
//! Logging and metrics setup
//!
//! Both initializers are process-wide and meant to be called once from the
//! binary. Library code only emits through `tracing` and `metrics` macros.

use crate::utils::config::{LogFormat, LoggingConfig, MetricsConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::ObservabilityError(format!("Invalid log filter '{}': {}", config.level, e)))?;

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init(),
    };

    installed.map_err(|e| EngineError::ObservabilityError(e.to_string()))
}

/// Start the Prometheus exporter when metrics are enabled
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| EngineError::ConfigError(format!("Invalid metrics address '{}': {}", config.listen_addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ObservabilityError(e.to_string()))?;

    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}
