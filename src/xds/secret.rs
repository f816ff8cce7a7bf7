//! Discovery response builder for SDS
//!
//! Converts [`Secret`] values into Envoy `Secret` protobufs packed as `Any`
//! and wraps them in a `DiscoveryResponse`. Also mints the nonce and version
//! tag attached to every push.

use std::collections::HashSet;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, CertificateValidationContext, Secret as EnvoySecret, TlsCertificate,
};
use envoy_types::pb::envoy::service::discovery::v3::DiscoveryResponse;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::debug;
use uuid::Uuid;

use crate::secrets::{Secret, SecretPayload, TlsCertificateBundle, TrustValidationBundle};
use crate::{Error, Result};

/// Type URL for Envoy Secret resources
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Build the response pushed to the proxy for one secret snapshot
///
/// Fails on an empty or repeated secret name; nothing is sent in that case.
pub fn create_discovery_response(
    nonce: &str,
    version: &str,
    secrets: &[Secret],
) -> Result<DiscoveryResponse> {
    let mut seen = HashSet::with_capacity(secrets.len());
    let mut resources = Vec::with_capacity(secrets.len());

    for secret in secrets {
        if secret.name().is_empty() {
            return Err(Error::invalid_secret("secret name cannot be empty"));
        }
        if !seen.insert(secret.name()) {
            return Err(Error::invalid_secret(format!(
                "duplicate secret name '{}' in one response",
                secret.name()
            )));
        }

        let encoded = build_envoy_secret(secret).encode_to_vec();
        debug!(secret_name = %secret.name(), encoded_size = encoded.len(), "Built secret resource");

        resources.push(Any { type_url: SECRET_TYPE_URL.to_string(), value: encoded });
    }

    Ok(DiscoveryResponse {
        version_info: version.to_string(),
        resources,
        type_url: SECRET_TYPE_URL.to_string(),
        nonce: nonce.to_string(),
        ..Default::default()
    })
}

/// Convert one secret into its Envoy representation
pub fn build_envoy_secret(secret: &Secret) -> EnvoySecret {
    let secret_type = match secret.payload() {
        SecretPayload::TlsCertificate(bundle) => build_tls_certificate(bundle),
        SecretPayload::ValidationContext(bundle) => build_validation_context(bundle),
    };

    EnvoySecret { name: secret.name().to_string(), r#type: Some(secret_type) }
}

fn inline_bytes(bytes: &[u8]) -> Option<DataSource> {
    Some(DataSource { specifier: Some(Specifier::InlineBytes(bytes.to_vec())), ..Default::default() })
}

fn build_tls_certificate(bundle: &TlsCertificateBundle) -> secret::Type {
    let mut tls_cert = TlsCertificate {
        certificate_chain: inline_bytes(bundle.certificate_chain()),
        private_key: inline_bytes(bundle.private_key()),
        ..Default::default()
    };

    // Only encrypted keys carry a password
    if !bundle.passphrase().is_empty() {
        tls_cert.password = Some(DataSource {
            specifier: Some(Specifier::InlineString(bundle.passphrase().to_string())),
            ..Default::default()
        });
    }

    secret::Type::TlsCertificate(tls_cert)
}

fn build_validation_context(bundle: &TrustValidationBundle) -> secret::Type {
    secret::Type::ValidationContext(CertificateValidationContext {
        trusted_ca: inline_bytes(bundle.trusted_ca()),
        ..Default::default()
    })
}

/// Fresh nonce for one push
pub fn new_nonce() -> String {
    Uuid::new_v4().to_string()
}

/// Per-stream source of version tags
///
/// Tags are RFC 3339 UTC timestamps with nanosecond precision. Each tag is
/// strictly later than the previous one even if the wall clock stalls or
/// steps backwards.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: Option<DateTime<Utc>>,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_version(&mut self) -> String {
        self.next_at(Utc::now())
    }

    fn next_at(&mut self, now: DateTime<Utc>) -> String {
        let instant = match self.last {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last = Some(instant);
        instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}
