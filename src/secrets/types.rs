//! Secret value types
//!
//! A [`Secret`] is one named credential handed to the proxy: either a TLS
//! certificate bundle or a trust-validation bundle. Values are immutable once
//! built; key material is wiped from memory when dropped.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Certificate chain, private key and optional key passphrase
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TlsCertificateBundle {
    certificate_chain: Vec<u8>,
    private_key: Vec<u8>,
    passphrase: String,
}

impl TlsCertificateBundle {
    pub fn new(
        certificate_chain: impl Into<Vec<u8>>,
        private_key: impl Into<Vec<u8>>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            certificate_chain: certificate_chain.into(),
            private_key: private_key.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn certificate_chain(&self) -> &[u8] {
        &self.certificate_chain
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// Empty when the private key is not encrypted
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl fmt::Debug for TlsCertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCertificateBundle")
            .field("certificate_chain_len", &self.certificate_chain.len())
            .field("private_key", &"[REDACTED]")
            .field("has_passphrase", &!self.passphrase.is_empty())
            .finish()
    }
}

/// Trusted CA bundle used to validate peers
#[derive(Clone, PartialEq, Eq)]
pub struct TrustValidationBundle {
    trusted_ca: Vec<u8>,
}

impl TrustValidationBundle {
    pub fn new(trusted_ca: impl Into<Vec<u8>>) -> Self {
        Self { trusted_ca: trusted_ca.into() }
    }

    pub fn trusted_ca(&self) -> &[u8] {
        &self.trusted_ca
    }
}

impl fmt::Debug for TrustValidationBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustValidationBundle")
            .field("trusted_ca_len", &self.trusted_ca.len())
            .finish()
    }
}

/// Credential carried by a [`Secret`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretPayload {
    TlsCertificate(TlsCertificateBundle),
    ValidationContext(TrustValidationBundle),
}

/// One named credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    name: String,
    payload: SecretPayload,
}

impl Secret {
    pub fn new(name: impl Into<String>, payload: SecretPayload) -> Self {
        Self { name: name.into(), payload }
    }

    /// Build a TLS certificate secret
    pub fn tls_certificate(name: impl Into<String>, bundle: TlsCertificateBundle) -> Self {
        Self::new(name, SecretPayload::TlsCertificate(bundle))
    }

    /// Build a trust-validation secret
    pub fn validation_context(name: impl Into<String>, bundle: TrustValidationBundle) -> Self {
        Self::new(name, SecretPayload::ValidationContext(bundle))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &SecretPayload {
        &self.payload
    }
}
