//! # Observability Settings
//!
//! Logging and metrics configuration for the SDS server.

use validator::Validate;

use super::parse_bool;
use crate::{Error, Result};

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Validate)]
pub struct ObservabilityConfig {
    /// Tracing service name, attached to every log line
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Default log level (trace, debug, info, warn, error) when RUST_LOG is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Prometheus exporter port (0 = disabled)
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "sds-server".to_string(),
            log_level: "info".to_string(),
            json_logging: true,
            metrics_port: 0,
        }
    }
}

impl ObservabilityConfig {
    pub(crate) fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let metrics_port = match lookup("SDS_METRICS_PORT") {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
                Error::config(format!("Invalid SDS_METRICS_PORT '{}': {}", raw, e))
            })?,
            _ => defaults.metrics_port,
        };

        Ok(Self {
            service_name: lookup("SDS_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: lookup("SDS_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging: lookup("SDS_LOG_JSON")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.json_logging),
            metrics_port,
        })
    }

    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
