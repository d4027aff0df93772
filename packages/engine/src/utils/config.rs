// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Layered loading with the `config` crate:
//!
//! 1. Built-in defaults (serde `default` on every section)
//! 2. Optional config file (`config/engine.{yaml,toml,json}`, or the path in
//!    `WEAVER_CONFIG`)
//! 3. Environment variables, e.g. `WEAVER__PROXY__RETRY_BASE_MS=500`

use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default config file stem, resolved relative to the working directory
const DEFAULT_CONFIG_PATH: &str = "config/engine";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub runtime: RuntimeConfig,
    pub proxy: ProxyConfig,
    pub listener: ListenerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub storage: StorageConfig,
}

/// Launcher / channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bounded capacity of the result channel
    pub channel_capacity: usize,

    /// Runs slower than this are logged at WARN
    pub acceptable_run_secs: u64,

    /// Hand agents a proxy pool at all
    pub proxy_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            acceptable_run_secs: 600,
            proxy_enabled: true,
        }
    }
}

/// How the rotating set is traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    Random,
    RoundRobin,
}

/// Proxy pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Exclusive-use endpoints (`host:port`)
    pub sticky: Vec<String>,

    /// Shared-use endpoints (`host:port`)
    pub rotating: Vec<String>,

    /// Proxy service credentials
    pub username: Option<String>,
    pub password: Option<String>,

    pub rotation: RotationStrategy,

    /// Backoff base delay in milliseconds
    pub retry_base_ms: u64,

    /// Backoff ceiling in milliseconds; a delay above this is not slept on
    pub max_wait_ms: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sticky: vec![],
            rotating: vec![],
            username: None,
            password: None,
            rotation: RotationStrategy::Random,
            retry_base_ms: 2_000,
            max_wait_ms: 60_000,
            request_timeout_secs: 30,
        }
    }
}

impl ProxyConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pipeline listener settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Treat persistence faults like validation faults (flip agent to ERROR)
    pub persist_fault_sets_error: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Prometheus scrape listener
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file receiving broken-agent records; `None` logs only
    pub error_db_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let path = std::env::var("WEAVER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load configuration from a specific file (missing file is allowed)
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("WEAVER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("proxy.sticky")
                    .with_list_parse_key("proxy.rotating"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.runtime.channel_capacity == 0 {
            return Err(EngineError::ConfigError(
                "runtime.channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.proxy.retry_base_ms == 0 {
            return Err(EngineError::ConfigError(
                "proxy.retry_base_ms must be greater than 0".to_string(),
            ));
        }

        if self.proxy.max_wait_ms < self.proxy.retry_base_ms {
            return Err(EngineError::ConfigError(format!(
                "proxy.max_wait_ms ({}) is below proxy.retry_base_ms ({})",
                self.proxy.max_wait_ms, self.proxy.retry_base_ms
            )));
        }

        if self.proxy.request_timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "proxy.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
