//! SDS Streaming Protocol Implementation
//!
//! Drives one proxy-facing `StreamSecrets` call through its lifecycle.
//!
//! # Protocol Flow
//!
//! 1. **Handshake**: the first `DiscoveryRequest` names the node and the
//!    resources it wants. A session id is minted and registered with the
//!    [`SecretsManager`] for those names, repeats dropped. Nothing is sent
//!    before this request arrives.
//! 2. **Push Updates**: every secret snapshot delivered by the session's
//!    rotation task becomes a `DiscoveryResponse` with a fresh nonce and
//!    version.
//! 3. **ACK/NACK**: later requests are classified against the last response
//!    and logged. They never change control flow: a NACK does not trigger a
//!    resend.
//!
//! # Termination
//!
//! - Client closes the stream, or the process stop token fires: `Ok(())`
//! - Receive error or failed write: that error
//!
//! The session is unregistered on every path once the handshake completed.

use std::collections::HashSet;
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::manager::SecretsManager;
use crate::observability::metrics::{record_client_request, record_response, record_stream};
use crate::secrets::Secret;
use crate::xds::secret::{create_discovery_response, new_nonce, VersionClock};

/// Tracks the last sent version and nonce for ACK/NACK detection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LastDiscoverySnapshot {
    pub version: Arc<str>,
    pub nonce: Arc<str>,
}

/// How an inbound request relates to the last response sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// The proxy rejected a response
    Nack { code: i32, message: String },
    /// The nonce does not match the last response
    StaleNonce,
    /// The proxy accepted the last response
    Ack,
    /// Matching nonce but a different version
    Unexpected,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Nack { .. } => "nack",
            RequestKind::StaleNonce => "stale_nonce",
            RequestKind::Ack => "ack",
            RequestKind::Unexpected => "unexpected",
        }
    }
}

/// Classify a post-handshake request; first matching rule wins
pub fn classify_request(
    request: &DiscoveryRequest,
    last_sent: &LastDiscoverySnapshot,
) -> RequestKind {
    if let Some(detail) = request.error_detail.as_ref() {
        return RequestKind::Nack { code: detail.code, message: detail.message.clone() };
    }
    if request.response_nonce.as_str() != last_sent.nonce.as_ref() {
        return RequestKind::StaleNonce;
    }
    if request.version_info.as_str() == last_sent.version.as_ref() {
        return RequestKind::Ack;
    }
    RequestKind::Unexpected
}

/// How the inbound half of the stream ended
#[derive(Debug)]
enum ReceiveOutcome {
    Closed,
    Failed(Status),
}

/// Pull inbound requests off the transport so the event loop never blocks on a read
fn spawn_receiver<S>(
    mut inbound: S,
    requests: mpsc::Sender<DiscoveryRequest>,
    outcome: oneshot::Sender<ReceiveOutcome>,
    stream_cancel: CancellationToken,
    stop: CancellationToken,
) where
    S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let result = loop {
            let next = tokio::select! {
                biased;
                _ = stream_cancel.cancelled() => return,
                _ = stop.cancelled() => return,
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(request)) => {
                    tokio::select! {
                        biased;
                        _ = stream_cancel.cancelled() => return,
                        _ = stop.cancelled() => return,
                        sent = requests.send(request) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Err(status)) => break ReceiveOutcome::Failed(status),
                None => break ReceiveOutcome::Closed,
            }
        };

        let _ = outcome.send(result);
    });
}

/// Drop repeated names, keeping the first occurrence of each
pub fn unique_resource_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    names.iter().filter(|name| seen.insert(name.as_str())).cloned().collect()
}

fn finish(outcome: Result<ReceiveOutcome, oneshot::error::RecvError>) -> Result<(), Status> {
    match outcome {
        Ok(ReceiveOutcome::Failed(status)) => Err(status),
        // A dropped sender means the receiver exited on cancellation
        Ok(ReceiveOutcome::Closed) | Err(_) => Ok(()),
    }
}

/// Serve one `StreamSecrets` call until the client leaves or the server stops
pub async fn run_secret_stream<S>(
    manager: Arc<SecretsManager>,
    stop: CancellationToken,
    inbound: S,
    outbound: mpsc::Sender<Result<DiscoveryResponse, Status>>,
) -> Result<(), Status>
where
    S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
{
    let stream_cancel = CancellationToken::new();
    let _receiver_guard = stream_cancel.clone().drop_guard();

    let (request_tx, mut requests) = mpsc::channel(1);
    let (outcome_tx, mut outcome) = oneshot::channel();
    spawn_receiver(inbound, request_tx, outcome_tx, stream_cancel, stop.clone());

    // Handshake
    let first = tokio::select! {
        biased;
        _ = stop.cancelled() => {
            info!("SDS server stopped before the first request");
            return Err(Status::unavailable("SDS server is stopped before receiving request"));
        }
        request = requests.recv() => request,
        received = &mut outcome => {
            debug!("Stream ended before the first request");
            return finish(received);
        }
    };

    let first = match first {
        Some(request) => request,
        None => return finish(outcome.await),
    };

    let node_id = first.node.as_ref().map(|node| node.id.clone()).unwrap_or_default();
    let session_id = Uuid::new_v4().to_string();
    let span = crate::sds_span!("stream_secrets", node_id, session_id = %session_id);

    async move {
        let resource_names = unique_resource_names(&first.resource_names);
        if resource_names.len() != first.resource_names.len() {
            debug!(requested = ?first.resource_names, "Ignoring repeated resource names");
        }
        info!(resources = ?resource_names, "SDS stream established");
        record_stream(true);

        let updates = manager.register(&session_id, resource_names);
        let result = event_loop(&stop, &mut requests, outcome, updates, &outbound).await;

        if let Err(e) = manager.unregister(&session_id) {
            error!(error = %e, "Failed to unregister session");
        }
        record_stream(false);

        match &result {
            Ok(()) => info!("SDS stream closed"),
            Err(status) => warn!(code = ?status.code(), message = %status.message(), "SDS stream failed"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn event_loop(
    stop: &CancellationToken,
    requests: &mut mpsc::Receiver<DiscoveryRequest>,
    outcome: oneshot::Receiver<ReceiveOutcome>,
    mut updates: mpsc::Receiver<Vec<Secret>>,
    outbound: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
) -> Result<(), Status> {
    let mut last_sent = LastDiscoverySnapshot::default();
    let mut clock = VersionClock::new();
    let mut updates_closed = false;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                info!("SDS server is stopped");
                return Ok(());
            }
            request = requests.recv() => {
                let Some(request) = request else {
                    // Buffered requests are drained; the receiver has reported how it ended
                    let received = outcome.await;
                    if let Ok(ReceiveOutcome::Failed(ref status)) = received {
                        error!(error = %status, "Failed to receive discovery request");
                    }
                    return finish(received);
                };
                observe_request(&request, &last_sent);
            }
            update = updates.recv(), if !updates_closed => {
                let Some(secrets) = update else {
                    warn!("Secret updates ended, no further pushes on this stream");
                    updates_closed = true;
                    continue;
                };

                let nonce = new_nonce();
                let version = clock.next_version();
                let response = create_discovery_response(&nonce, &version, &secrets).map_err(|e| {
                    error!(error = %e, "Failed to create discovery response");
                    record_response(false);
                    Status::from(e)
                })?;

                last_sent = LastDiscoverySnapshot { version: Arc::from(version), nonce: Arc::from(nonce) };
                info!(
                    version = %response.version_info,
                    nonce = %response.nonce,
                    resource_count = response.resources.len(),
                    "Sending discovery response"
                );

                if outbound.send(Ok(response)).await.is_err() {
                    error!("Discovery response receiver dropped");
                    record_response(false);
                    return Err(Status::cancelled("discovery response stream closed"));
                }
                record_response(true);
            }
        }
    }
}

fn observe_request(request: &DiscoveryRequest, last_sent: &LastDiscoverySnapshot) {
    let kind = classify_request(request, last_sent);
    record_client_request(kind.as_str());

    match kind {
        RequestKind::Nack { code, message } => warn!(
            nonce = %request.response_nonce,
            error_code = code,
            error_message = %message,
            "[NACK] Envoy rejected previous response"
        ),
        RequestKind::StaleNonce => info!(
            nonce = %request.response_nonce,
            expected_nonce = %last_sent.nonce,
            "Received request with stale nonce"
        ),
        RequestKind::Ack => info!(
            version = %request.version_info,
            nonce = %request.response_nonce,
            "[ACK] Envoy accepted response"
        ),
        RequestKind::Unexpected => info!(
            version = %request.version_info,
            last_version = %last_sent.version,
            nonce = %request.response_nonce,
            "Unexpected discovery request"
        ),
    }
}
