//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys
//! use `__` as the separator, e.g. `ENGINE__MONTHLY_EXECUTION_LIMIT`.

use nodeflow_ai::ProviderEndpoints;
use nodeflow_workflow::EngineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Orchestrator and step journal tunables.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Chat-model provider base URLs.
    #[serde(default)]
    pub providers: ProviderEndpoints,

    /// Timeout for outbound provider requests, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Status events buffered per SSE subscriber.
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_status_buffer() -> usize {
    256
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Timeout for outbound provider requests.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
