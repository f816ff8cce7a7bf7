//! AWS Certificate Manager provisioner
//!
//! Exports a private certificate from ACM on every fetch. Each export is
//! encrypted with a fresh random passphrase, which is handed to the proxy as
//! the private key password. The certificate and its chain are concatenated
//! into one PEM chain.

use async_trait::async_trait;
use aws_sdk_acm::error::DisplayErrorContext;
use aws_sdk_acm::primitives::Blob;
use aws_sdk_acm::Client;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::provisioner::{
    ca_certificate_secret, validate_resources, Provisioner, CA_CERTIFICATE_RESOURCE,
    CERTIFICATE_RESOURCE,
};
use super::types::{Secret, TlsCertificateBundle};
use crate::{Error, Result};

/// Provisioner exporting one ACM certificate by ARN
pub struct AcmProvisioner {
    client: Client,
    certificate_arn: String,
    ca_cert: Option<String>,
}

impl std::fmt::Debug for AcmProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmProvisioner")
            .field("certificate_arn", &self.certificate_arn)
            .field("client", &"[AcmClient]")
            .finish()
    }
}

impl AcmProvisioner {
    pub fn new(client: Client, certificate_arn: impl Into<String>, ca_cert: Option<String>) -> Self {
        Self { client, certificate_arn: certificate_arn.into(), ca_cert }
    }

    /// Build the ACM client from the standard AWS environment (region, credentials chain)
    pub async fn from_env(certificate_arn: impl Into<String>, ca_cert: Option<String>) -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let certificate_arn = certificate_arn.into();

        info!(
            arn = %certificate_arn,
            region = ?shared.region(),
            "Initialized ACM provisioner"
        );

        Self::new(Client::new(&shared), certificate_arn, ca_cert)
    }

    async fn certificate_secret(&self) -> Result<Secret> {
        let passphrase = new_passphrase();
        debug!(arn = %self.certificate_arn, "Exporting certificate from ACM");

        let exported = self
            .client
            .export_certificate()
            .certificate_arn(&self.certificate_arn)
            .passphrase(Blob::new(passphrase.as_bytes()))
            .send()
            .await
            .map_err(|e| {
                error!(arn = %self.certificate_arn, error = %DisplayErrorContext(&e), "ACM export failed");
                Error::provisioner(format!(
                    "Failed to export certificate '{}': {}",
                    self.certificate_arn,
                    DisplayErrorContext(&e)
                ))
            })?;

        let certificate = exported
            .certificate()
            .ok_or_else(|| Error::provisioner("ACM export returned no certificate"))?;
        let private_key = exported
            .private_key()
            .ok_or_else(|| Error::provisioner("ACM export returned no private key"))?;
        let chain = exported.certificate_chain().unwrap_or_default();

        Ok(Secret::tls_certificate(
            CERTIFICATE_RESOURCE,
            TlsCertificateBundle::new(
                format!("{}{}", certificate, chain).into_bytes(),
                private_key.as_bytes().to_vec(),
                passphrase,
            ),
        ))
    }
}

/// Random export passphrase: base64 of a fresh UUID
fn new_passphrase() -> String {
    STANDARD.encode(Uuid::new_v4().to_string())
}

#[async_trait]
impl Provisioner for AcmProvisioner {
    async fn get_resources(
        &self,
        session_id: &str,
        resource_names: &[String],
    ) -> Result<Vec<Secret>> {
        validate_resources(resource_names)?;

        let mut certificate: Option<Secret> = None;
        let mut secrets = Vec::with_capacity(resource_names.len());

        for name in resource_names {
            match name.as_str() {
                CERTIFICATE_RESOURCE => {
                    let secret = match certificate {
                        Some(ref exported) => exported.clone(),
                        None => {
                            let exported = self.certificate_secret().await?;
                            certificate = Some(exported.clone());
                            exported
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

        info!(session_id, count = secrets.len(), "Secrets resolved from ACM");
        Ok(secrets)
    }

    fn kind(&self) -> &'static str {
        "acm"
    }
}
