//! File-backed provisioner
//!
//! Reads the certificate from a directory laid out like a Kubernetes TLS
//! secret mount (`tls.crt` + `tls.key`). Files are re-read on every call, so
//! replacing them on disk is picked up at the next rotation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::provisioner::{
    ca_certificate_secret, validate_resources, Provisioner, CA_CERTIFICATE_RESOURCE,
    CERTIFICATE_RESOURCE,
};
use super::types::{Secret, TlsCertificateBundle};
use crate::{Error, Result};

/// Certificate chain file inside the certificate directory
pub const CERTIFICATE_FILE: &str = "tls.crt";

/// Private key file inside the certificate directory
pub const PRIVATE_KEY_FILE: &str = "tls.key";

/// Provisioner serving PEM files from local disk
#[derive(Clone)]
pub struct FileProvisioner {
    certificate_dir: PathBuf,
    passphrase: Option<String>,
    ca_cert: Option<String>,
}

impl std::fmt::Debug for FileProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProvisioner")
            .field("certificate_dir", &self.certificate_dir)
            .field("has_passphrase", &self.passphrase.is_some())
            .field("has_ca_cert", &self.ca_cert.is_some())
            .finish()
    }
}

impl FileProvisioner {
    pub fn new(certificate_dir: impl Into<PathBuf>) -> Self {
        Self { certificate_dir: certificate_dir.into(), passphrase: None, ca_cert: None }
    }

    /// Passphrase protecting `tls.key`
    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase;
        self
    }

    /// Inline trust bundle served as `ca_certificate`
    pub fn with_ca_cert(mut self, ca_cert: Option<String>) -> Self {
        self.ca_cert = ca_cert;
        self
    }

    pub fn certificate_dir(&self) -> &Path {
        &self.certificate_dir
    }

    async fn read_pem(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.certificate_dir.join(file);
        let contents = tokio::fs::read(&path).await.map_err(|e| {
            Error::provisioner(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if contents.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::provisioner(format!("{} is empty", path.display())));
        }

        Ok(contents)
    }

    async fn certificate_secret(&self) -> Result<Secret> {
        let certificate_chain = self.read_pem(CERTIFICATE_FILE).await?;
        let private_key = self.read_pem(PRIVATE_KEY_FILE).await?;

        Ok(Secret::tls_certificate(
            CERTIFICATE_RESOURCE,
            TlsCertificateBundle::new(
                certificate_chain,
                private_key,
                self.passphrase.clone().unwrap_or_default(),
            ),
        ))
    }
}

#[async_trait]
impl Provisioner for FileProvisioner {
    async fn get_resources(
        &self,
        session_id: &str,
        resource_names: &[String],
    ) -> Result<Vec<Secret>> {
        validate_resources(resource_names)?;

        let mut secrets = Vec::with_capacity(resource_names.len());
        for name in resource_names {
            match name.as_str() {
                CERTIFICATE_RESOURCE => {
                    let secret = self.certificate_secret().await.map_err(|e| {
                        Error::provisioner(format!("Failed to get certificate secret: {}", e))
                    })?;
                    info!(session_id, dir = %self.certificate_dir.display(), "Certificate secret loaded from disk");
                    secrets.push(secret);
                }
                CA_CERTIFICATE_RESOURCE => {
                    secrets.push(ca_certificate_secret(self.ca_cert.as_deref())?);
                    debug!(session_id, "CA certificate secret built from configuration");
                }
                _ => unreachable!("resource names validated above"),
            }
        }

        Ok(secrets)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
