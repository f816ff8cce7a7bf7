use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::{
    SecretDiscoveryService, SecretDiscoveryServiceServer,
};

use crate::manager::SecretsManager;

use super::stream::run_secret_stream;

/// Buffered responses per stream before pushes wait on the transport
const RESPONSE_BUFFER: usize = 16;

/// State-of-the-world SDS backed by the secrets manager
#[derive(Debug, Clone)]
pub struct SdsService {
    manager: Arc<SecretsManager>,
    stop: CancellationToken,
}

impl SdsService {
    pub fn new(manager: Arc<SecretsManager>, stop: CancellationToken) -> Self {
        Self { manager, stop }
    }

    pub fn into_server(self) -> SecretDiscoveryServiceServer<Self> {
        SecretDiscoveryServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl SecretDiscoveryService for SdsService {
    type StreamSecretsStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
    type DeltaSecretsStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn stream_secrets(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamSecretsStream>, Status> {
        info!("New SDS stream connection established");

        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        let errors = tx.clone();
        let manager = self.manager.clone();
        let stop = self.stop.clone();
        let inbound = request.into_inner();

        tokio::spawn(async move {
            if let Err(status) = run_secret_stream(manager, stop, inbound, tx).await {
                // Ends the RPC with this status; fails only if the client is gone
                if errors.send(Err(status)).await.is_err() {
                    debug!("SDS client disconnected before the stream error was delivered");
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn delta_secrets(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaSecretsStream>, Status> {
        Err(Status::unimplemented("DeltaSecrets is not supported, use StreamSecrets"))
    }

    async fn fetch_secrets(
        &self,
        _request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        Err(Status::unimplemented("FetchSecrets is not supported, use StreamSecrets"))
    }
}
