//! # Structured Logging
//!
//! Installs the global `tracing` subscriber and provides the span macro used by
//! the SDS stream handler.

use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;
use crate::{Error, Result};

/// Create a tracing span for one SDS stream.
///
/// ```rust,ignore
/// let span = sds_span!("stream_secrets", node_id, session_id = %session_id);
/// ```
#[macro_export]
macro_rules! sds_span {
    ($operation:expr, $node_id:expr) => {
        tracing::info_span!(
            "sds_stream",
            operation = %$operation,
            node_id = %$node_id,
            session_id = tracing::field::Empty
        )
    };
    ($operation:expr, $node_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "sds_stream",
            operation = %$operation,
            node_id = %$node_id,
            $($field)*
        )
    };
}

/// Build the env filter: `RUST_LOG` wins, otherwise the configured level
fn env_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            Error::config(format!("Invalid log level '{}': {}", config.log_level, e))
        }),
    }
}

/// Install the global fmt subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed (tests, embedding).
pub fn init_logging(config: &ObservabilityConfig) -> Result<bool> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = if config.json_logging {
        builder.json().flatten_event(true).with_current_span(true).try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    Ok(installed)
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::Config) {
    tracing::info!(
        service = %config.observability.service_name,
        socket_path = %config.socket_path.display(),
        provisioner = ?config.provisioner,
        certificate_id = %config.certificate_id,
        ca_cert_configured = config.ca_cert.is_some(),
        rotation_period_secs = config.rotation_period_seconds,
        shutdown_grace_secs = config.shutdown_grace_seconds,
        metrics_port = config.observability.metrics_port,
        "SDS server configuration"
    );
}
