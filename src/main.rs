use std::sync::Arc;

use sds_server::{
    config::Config,
    observability::{init_observability, log_config_info},
    startup::{build_provisioner, preflight},
    xds, Result, SecretsManager, APP_NAME, VERSION,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `stop` on SIGINT or SIGTERM
fn spawn_signal_handler(stop: CancellationToken) -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for CTRL+C");
                }
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        stop.cancel();
    });

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = Config::from_env()?;
    init_observability(&config.observability)?;

    info!(app_name = APP_NAME, version = VERSION, "Starting SDS server");
    log_config_info(&config);

    let provisioner = build_provisioner(&config).await?;
    if let Err(e) = preflight(provisioner.as_ref(), &config.preflight_resources()).await {
        error!(error = %e, "Refusing to start without working credentials");
        std::process::exit(1);
    }

    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone())?;

    let manager = Arc::new(
        SecretsManager::new(provisioner, config.rotation_period()).with_stop(stop.clone()),
    );

    let served =
        xds::serve(&config.socket_path, manager.clone(), stop.clone(), config.shutdown_grace())
            .await;

    // Rotation tasks are children of `stop`; make sure they are cancelled even on a server error
    stop.cancel();
    manager.shutdown().await;

    if let Err(e) = served {
        error!(error = %e, "SDS server terminated with error");
        std::process::exit(1);
    }

    info!("SDS server shutdown completed");
    Ok(())
}
