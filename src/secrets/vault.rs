//! Vault-backed provisioner
//!
//! Reads the certificate bundle from a HashiCorp Vault KV v2 secret. The
//! credential identifier is the path inside the KV mount.
//!
//! ## Secret Format in Vault
//!
//! ```json
//! {
//!   "certificate_chain": "<PEM>",
//!   "private_key": "<PEM>",
//!   "password": "<optional>"
//! }
//! ```
//!
//! `certificate` / `cert` and `key` are accepted as aliases.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, error, info};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use super::provisioner::{
    ca_certificate_secret, validate_resources, Provisioner, CA_CERTIFICATE_RESOURCE,
    CERTIFICATE_RESOURCE,
};
use super::types::{Secret, TlsCertificateBundle};
use crate::config::VaultConfig;
use crate::{Error, Result};

/// Provisioner reading certificates from Vault KV v2
pub struct VaultProvisioner {
    client: VaultClient,
    kv_mount_path: String,
    secret_path: String,
    ca_cert: Option<String>,
}

impl std::fmt::Debug for VaultProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultProvisioner")
            .field("kv_mount_path", &self.kv_mount_path)
            .field("secret_path", &self.secret_path)
            .field("client", &"[VaultClient]")
            .finish()
    }
}

impl VaultProvisioner {
    /// Create a provisioner for the secret at `secret_path`
    pub fn new(
        config: &VaultConfig,
        secret_path: impl Into<String>,
        ca_cert: Option<String>,
    ) -> Result<Self> {
        let address = config
            .address
            .as_deref()
            .ok_or_else(|| Error::config("VAULT_ADDR is required for the vault provisioner"))?;

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(address);

        if let Some(ref token) = config.token {
            settings_builder.token(token);
        }

        if let Some(ref namespace) = config.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }

        let settings = settings_builder
            .build()
            .map_err(|e| Error::config(format!("Invalid Vault configuration: {}", e)))?;

        let client = VaultClient::new(settings)
            .map_err(|e| Error::config(format!("Failed to create Vault client: {}", e)))?;

        let secret_path = secret_path.into();
        info!(
            address = %address,
            kv_mount = %config.kv_mount_path,
            path = %secret_path,
            "Initialized Vault provisioner"
        );

        Ok(Self { client, kv_mount_path: config.kv_mount_path.clone(), secret_path, ca_cert })
    }

    async fn certificate_secret(&self) -> Result<Secret> {
        debug!(path = %self.secret_path, mount = %self.kv_mount_path, "Reading certificate from Vault");

        let data: HashMap<String, serde_json::Value> =
            kv2::read(&self.client, &self.kv_mount_path, &self.secret_path).await.map_err(|e| {
                error!(path = %self.secret_path, error = %e, "Failed to read secret from Vault");
                Error::provisioner(format!(
                    "Failed to read Vault secret '{}': {}",
                    self.secret_path, e
                ))
            })?;

        Ok(Secret::tls_certificate(CERTIFICATE_RESOURCE, parse_certificate(&data)?))
    }
}

/// Map KV fields onto a certificate bundle
fn parse_certificate(data: &HashMap<String, serde_json::Value>) -> Result<TlsCertificateBundle> {
    let field = |names: &[&str]| {
        names.iter().find_map(|name| data.get(*name).and_then(|v| v.as_str()))
    };

    let certificate_chain = field(&["certificate_chain", "certificate", "cert"])
        .ok_or_else(|| Error::provisioner("Vault secret must have a 'certificate_chain' field"))?;

    let private_key = field(&["private_key", "key"])
        .ok_or_else(|| Error::provisioner("Vault secret must have a 'private_key' field"))?;

    let password = field(&["password"]).unwrap_or_default();

    Ok(TlsCertificateBundle::new(
        certificate_chain.as_bytes().to_vec(),
        private_key.as_bytes().to_vec(),
        password,
    ))
}

#[async_trait]
impl Provisioner for VaultProvisioner {
    async fn get_resources(
        &self,
        session_id: &str,
        resource_names: &[String],
    ) -> Result<Vec<Secret>> {
        validate_resources(resource_names)?;

        // One KV read per call, shared by every `certificate` entry
        let mut certificate: Option<Secret> = None;
        let mut secrets = Vec::with_capacity(resource_names.len());

        for name in resource_names {
            match name.as_str() {
                CERTIFICATE_RESOURCE => {
                    let secret = match certificate {
                        Some(ref cached) => cached.clone(),
                        None => {
                            let fetched = self.certificate_secret().await?;
                            certificate = Some(fetched.clone());
                            fetched
                        }
                    };
                    secrets.push(secret);
                }
                CA_CERTIFICATE_RESOURCE => {
                    secrets.push(ca_certificate_secret(self.ca_cert.as_deref())?);
                }
                _ => unreachable!("resource names validated above"),
            }
        }

        info!(session_id, count = secrets.len(), "Secrets resolved from Vault");
        Ok(secrets)
    }

    fn kind(&self) -> &'static str {
        "vault"
    }
}
