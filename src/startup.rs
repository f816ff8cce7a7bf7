//! Startup sequence for the SDS server
//!
//! Builds the configured provisioner and proves it can deliver credentials
//! before the socket is opened.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{Config, ProvisionerKind};
use crate::errors::{Error, Result};
use crate::secrets::{FileProvisioner, Provisioner};

/// Session id used for the preflight fetch
pub const PREFLIGHT_SESSION_ID: &str = "startup-preflight";

/// Construct the provisioner selected by `SDS_PROVISIONER`
pub async fn build_provisioner(config: &Config) -> Result<Arc<dyn Provisioner>> {
    match config.provisioner {
        ProvisionerKind::File => Ok(Arc::new(
            FileProvisioner::new(&config.certificate_id)
                .with_passphrase(config.certificate_passphrase.clone())
                .with_ca_cert(config.ca_cert.clone()),
        )),
        #[cfg(feature = "vault")]
        ProvisionerKind::Vault => Ok(Arc::new(crate::secrets::VaultProvisioner::new(
            &config.vault,
            config.certificate_id.clone(),
            config.ca_cert.clone(),
        )?)),
        #[cfg(not(feature = "vault"))]
        ProvisionerKind::Vault => {
            Err(Error::config("SDS_PROVISIONER=vault requires the 'vault' feature"))
        }
        #[cfg(feature = "aws")]
        ProvisionerKind::Acm => Ok(Arc::new(
            crate::secrets::AcmProvisioner::from_env(
                config.certificate_id.clone(),
                config.ca_cert.clone(),
            )
            .await,
        )),
        #[cfg(not(feature = "aws"))]
        ProvisionerKind::Acm => {
            Err(Error::config("SDS_PROVISIONER=acm requires the 'aws' feature"))
        }
    }
}

/// Fetch every startup resource once; any failure aborts startup
pub async fn preflight(provisioner: &dyn Provisioner, resource_names: &[String]) -> Result<()> {
    info!(
        provisioner = provisioner.kind(),
        resources = ?resource_names,
        "Running credential preflight"
    );

    let secrets = provisioner.get_resources(PREFLIGHT_SESSION_ID, resource_names).await.map_err(
        |e| {
            error!(provisioner = provisioner.kind(), error = %e, "Credential preflight failed");
            Error::provisioner(format!("Startup preflight failed: {}", e))
        },
    )?;

    if secrets.len() != resource_names.len() {
        return Err(Error::provisioner(format!(
            "Startup preflight returned {} secrets for {} resources",
            secrets.len(),
            resource_names.len()
        )));
    }

    info!(provisioner = provisioner.kind(), count = secrets.len(), "Credential preflight succeeded");
    Ok(())
}
