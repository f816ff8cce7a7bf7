//! # Metrics Collection
//!
//! Prometheus metrics for SDS streams, sessions and provisioner fetches.
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use crate::config::ObservabilityConfig;
use crate::{Error, Result};

/// Which fetch of a rotation task's life a provisioner call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Initial,
    Rotation,
}

impl FetchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPhase::Initial => "initial",
            FetchPhase::Rotation => "rotation",
        }
    }
}

/// Record an SDS stream opening or closing
pub fn record_stream(connected: bool) {
    if connected {
        gauge!("sds_streams_active").increment(1.0);
    } else {
        gauge!("sds_streams_active").decrement(1.0);
    }
}

/// Record a session entering or leaving the secrets manager registry
pub fn record_session(registered: bool) {
    if registered {
        gauge!("sds_sessions_active").increment(1.0);
    } else {
        gauge!("sds_sessions_active").decrement(1.0);
    }
}

/// Record the outcome of writing a discovery response
pub fn record_response(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("sds_responses_total", "status" => status).increment(1);
}

/// Record how an inbound request was classified (ack, nack, stale_nonce, unexpected)
pub fn record_client_request(kind: &'static str) {
    counter!("sds_client_requests_total", "kind" => kind).increment(1);
}

/// Record a provisioner call made by a rotation task
pub fn record_provisioner_fetch(phase: FetchPhase, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "sds_provisioner_fetches_total",
        "phase" => phase.as_str(),
        "status" => status
    )
    .increment(1);
}

fn describe_metrics() {
    describe_gauge!("sds_streams_active", Unit::Count, "Open SDS streams");
    describe_gauge!("sds_sessions_active", Unit::Count, "Sessions with a running rotation task");
    describe_counter!(
        "sds_responses_total",
        Unit::Count,
        "Discovery responses written, by outcome"
    );
    describe_counter!(
        "sds_client_requests_total",
        Unit::Count,
        "Inbound discovery requests after the handshake, by classification"
    );
    describe_counter!(
        "sds_provisioner_fetches_total",
        Unit::Count,
        "Provisioner calls made by rotation tasks, by phase and outcome"
    );
}

/// Initialize the Prometheus exporter if a metrics port is configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            info!("Metrics exporter disabled (SDS_METRICS_PORT=0)");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            warn!(error = %e, "Failed to install Prometheus exporter");
            Error::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    describe_metrics();

    info!(metrics_addr = %metrics_addr, "Metrics collection initialized");
    Ok(())
}
