//! Configuration loading and validation for the music service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any variable is present but invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::telemetry::TelemetrySettings;

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// OTLP/gRPC collector address, `host:port` or a full URI.
    #[serde(default = "default_otlp_endpoint")]
    pub otel_exporter_otlp_endpoint: String,

    /// `service.name` resource attribute.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// `service.version` resource attribute.
    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// `deployment.environment` resource attribute.
    #[serde(default = "default_deployment_env")]
    pub deployment_env: String,

    /// SQLite connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: `"json"` or `"text"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// How often (seconds) accumulated metrics are exported.
    #[serde(default = "default_metric_export_interval")]
    pub metric_export_interval_secs: u64,

    /// Timeout (seconds) for a single export call to the collector.
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,

    /// Upper bound (seconds) on flushing telemetry at shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_otlp_endpoint() -> String {
    "localhost:4317".into()
}
fn default_service_name() -> String {
    "music-svc".into()
}
fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}
fn default_deployment_env() -> String {
    "local".into()
}
fn default_database_url() -> String {
    "sqlite://music.db?mode=rwc".into()
}
fn default_http_port() -> u16 {
    8081
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "json".into()
}
fn default_metric_export_interval() -> u64 {
    10
}
fn default_export_timeout() -> u64 {
    10
}
fn default_shutdown_timeout() -> u64 {
    5
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::default())
    }

    fn load(source: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Settings for [`crate::telemetry::TelemetryPipeline::init`].
    pub fn telemetry_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            endpoint: self.otel_exporter_otlp_endpoint.clone(),
            service_name: self.service_name.clone(),
            service_version: self.service_version.clone(),
            deployment_environment: self.deployment_env.clone(),
            metric_export_interval: Duration::from_secs(self.metric_export_interval_secs),
            export_timeout: Duration::from_secs(self.export_timeout_secs),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.otel_exporter_otlp_endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;
        ensure_non_empty(&self.service_name, "SERVICE_NAME")?;
        ensure_non_empty(&self.deployment_env, "DEPLOYMENT_ENV")?;
        ensure_non_empty(&self.database_url, "DATABASE_URL")?;

        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("LOG_FORMAT must be \"json\" or \"text\", got {:?}", self.log_format);
        }
        if self.http_port == 0 {
            anyhow::bail!("HTTP_PORT must be > 0");
        }
        if self.metric_export_interval_secs == 0 {
            anyhow::bail!("METRIC_EXPORT_INTERVAL_SECS must be > 0");
        }
        if self.export_timeout_secs == 0 {
            anyhow::bail!("EXPORT_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} must not be empty");
    }
    Ok(())
}
