//! Configuration management
//!
//! Loads and validates telemetry settings from a TOML file.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::export::HttpExporterConfig;
use crate::scheduler::DEFAULT_MAX_CONCURRENT_EXPORTS;
use crate::store::DEFAULT_MAX_OPERATION_KEYS;

/// Environment variable consulted when the file leaves `bearer_token` empty
pub const TOKEN_ENV_VAR: &str = "PIZZA_TELEMETRY_TOKEN";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector and flush settings
#[derive(Clone, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP/HTTP metrics endpoint
    pub collector_url: String,
    /// Sent as `Authorization: Bearer <token>`
    #[serde(default)]
    pub bearer_token: String,
    /// Value of the `source` attribute on every data point
    pub source: String,
    /// Seconds between flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    /// Per-request timeout for collector pushes, in seconds
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
    /// Distinct (method, endpoint) operations tracked per interval
    #[serde(default = "default_max_operation_keys", alias = "max_latency_keys")]
    pub max_operation_keys: usize,
    /// Collector requests in flight at once during a flush
    #[serde(default = "default_max_concurrent_exports")]
    pub max_concurrent_exports: usize,
    /// Push whatever is pending when shutting down
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,
}

impl TelemetryConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    /// Settings for [`crate::export::HttpExporter`]
    pub fn exporter_config(&self) -> Result<HttpExporterConfig> {
        let collector_url = Url::parse(&self.collector_url)
            .with_context(|| format!("Invalid collector_url: {}", self.collector_url))?;
        Ok(HttpExporterConfig {
            collector_url,
            bearer_token: self.bearer_token.clone(),
            timeout: self.export_timeout(),
        })
    }
}

impl std::fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("collector_url", &self.collector_url)
            .field("bearer_token", &"<redacted>")
            .field("source", &self.source)
            .field("flush_interval_secs", &self.flush_interval_secs)
            .field("export_timeout_secs", &self.export_timeout_secs)
            .field("max_operation_keys", &self.max_operation_keys)
            .field("max_concurrent_exports", &self.max_concurrent_exports)
            .field("flush_on_shutdown", &self.flush_on_shutdown)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_flush_interval() -> u64 { 10 }
fn default_export_timeout() -> u64 { 5 }
fn default_max_operation_keys() -> usize { DEFAULT_MAX_OPERATION_KEYS }
fn default_max_concurrent_exports() -> usize { DEFAULT_MAX_CONCURRENT_EXPORTS }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        if config.telemetry.bearer_token.is_empty() {
            if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
                config.telemetry.bearer_token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let telemetry = &self.telemetry;
        let url = Url::parse(&telemetry.collector_url)
            .with_context(|| format!("Invalid collector_url: {}", telemetry.collector_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("collector_url must be http or https");
        }
        if telemetry.bearer_token.trim().is_empty() {
            anyhow::bail!("bearer_token must be set (or {} exported)", TOKEN_ENV_VAR);
        }
        if telemetry.source.trim().is_empty() {
            anyhow::bail!("source must not be empty");
        }
        if telemetry.flush_interval_secs == 0 {
            anyhow::bail!("flush_interval_secs must be > 0");
        }
        if telemetry.export_timeout_secs == 0 {
            anyhow::bail!("export_timeout_secs must be > 0");
        }
        if telemetry.export_timeout_secs > telemetry.flush_interval_secs {
            anyhow::bail!("export_timeout_secs must not exceed flush_interval_secs");
        }
        if telemetry.max_operation_keys == 0 {
            anyhow::bail!("max_operation_keys must be > 0");
        }
        if telemetry.max_concurrent_exports == 0 {
            anyhow::bail!("max_concurrent_exports must be > 0");
        }
        Ok(())
    }
}
