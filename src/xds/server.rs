//! SDS gRPC server on a Unix domain socket

use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryServiceServer;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use crate::manager::SecretsManager;
use crate::xds::services::SdsService;
use crate::{Error, Result};

type ServerTask = JoinHandle<std::result::Result<(), tonic::transport::Error>>;

/// Bind the SDS socket, replacing a stale socket left by a previous run
pub async fn bind_socket(path: &Path) -> Result<UnixListener> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.file_type().is_socket() => {
            debug!(path = %path.display(), "Removing stale socket");
            tokio::fs::remove_file(path).await?;
        }
        Ok(_) => {
            return Err(Error::config(format!(
                "{} already exists and is not a socket",
                path.display()
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path).map_err(|e| {
        Error::transport(format!("SDS server failed to bind to {}: {}", path.display(), e))
    })?;

    // The proxy runs as a different user
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).await?;

    Ok(listener)
}

/// Serve SDS, health and reflection until `stop` fires
///
/// In-flight streams get `grace` to unwind before the server task is aborted.
pub async fn serve(
    socket_path: &Path,
    manager: Arc<SecretsManager>,
    stop: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let listener = bind_socket(socket_path).await?;

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter.set_serving::<SecretDiscoveryServiceServer<SdsService>>().await;

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| Error::internal(format!("Failed to build reflection service: {}", e)))?;

    let sds_service = SdsService::new(manager, stop.clone()).into_server();

    let shutdown = stop.clone();
    let mut server: ServerTask = tokio::spawn(
        Server::builder()
            .add_service(health_service)
            .add_service(reflection_service)
            .add_service(sds_service)
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                shutdown.cancelled().await
            }),
    );

    info!(socket = %socket_path.display(), "SDS server listening");

    let result = tokio::select! {
        joined = &mut server => {
            warn!("SDS server exited before shutdown was requested");
            server_result(joined)
        }
        _ = stop.cancelled() => {
            info!(grace_secs = grace.as_secs(), "Stopping SDS server");
            health_reporter.set_not_serving::<SecretDiscoveryServiceServer<SdsService>>().await;

            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => server_result(joined),
                Err(_) => {
                    warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out, forcing stop");
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    if let Err(e) = tokio::fs::remove_file(socket_path).await {
        debug!(path = %socket_path.display(), error = %e, "Socket already removed");
    }

    result
}

fn server_result(
    joined: std::result::Result<
        std::result::Result<(), tonic::transport::Error>,
        tokio::task::JoinError,
    >,
) -> Result<()> {
    match joined {
        Ok(Ok(())) => {
            info!("SDS server stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(Error::transport(format!("SDS server failed: {}", e))),
        Err(e) => Err(Error::internal(format!("SDS server task failed: {}", e))),
    }
}
