//! Provisioner trait and shared resource helpers
//!
//! A provisioner resolves the resource names a proxy asks for into concrete
//! [`Secret`] values. Rotation tasks call it once per period per session.

use async_trait::async_trait;

use super::types::{Secret, TrustValidationBundle};
use crate::{Error, Result};

/// Resource name of the TLS certificate bundle
pub const CERTIFICATE_RESOURCE: &str = "certificate";

/// Resource name of the trust bundle
pub const CA_CERTIFICATE_RESOURCE: &str = "ca_certificate";

/// Every resource name a provisioner can resolve
pub const KNOWN_RESOURCES: [&str; 2] = [CERTIFICATE_RESOURCE, CA_CERTIFICATE_RESOURCE];

/// Credential backend consumed by rotation tasks
///
/// Implementations must be safe to call concurrently from independent sessions.
#[async_trait]
pub trait Provisioner: Send + Sync + std::fmt::Debug {
    /// Resolve `resource_names` into secrets, in request order.
    ///
    /// Unknown names fail the whole call rather than being skipped.
    async fn get_resources(&self, session_id: &str, resource_names: &[String])
        -> Result<Vec<Secret>>;

    /// Short backend identifier used in logs
    fn kind(&self) -> &'static str;
}

/// Reject any name outside [`KNOWN_RESOURCES`]
pub fn validate_resources(resource_names: &[String]) -> Result<()> {
    match resource_names.iter().find(|name| !KNOWN_RESOURCES.contains(&name.as_str())) {
        Some(unknown) => Err(Error::unknown_resource(unknown.clone())),
        None => Ok(()),
    }
}

/// Build the `ca_certificate` secret from a configured inline bundle
pub fn ca_certificate_secret(ca_cert: Option<&str>) -> Result<Secret> {
    let ca_cert = ca_cert
        .filter(|pem| !pem.is_empty())
        .ok_or_else(|| Error::provisioner("CA certificate is not set"))?;

    Ok(Secret::validation_context(
        CA_CERTIFICATE_RESOURCE,
        TrustValidationBundle::new(ca_cert.as_bytes().to_vec()),
    ))
}
