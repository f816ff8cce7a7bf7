//! # Secrets
//!
//! Secret value types and the provisioners that resolve resource names into
//! them.

#[cfg(feature = "aws")]
pub mod acm;
pub mod file;
pub mod provisioner;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
#[cfg(feature = "vault")]
pub mod vault;

#[cfg(feature = "aws")]
pub use acm::AcmProvisioner;
pub use file::FileProvisioner;
pub use provisioner::{
    ca_certificate_secret, validate_resources, Provisioner, CA_CERTIFICATE_RESOURCE,
    CERTIFICATE_RESOURCE, KNOWN_RESOURCES,
};
pub use types::{Secret, SecretPayload, TlsCertificateBundle, TrustValidationBundle};
#[cfg(feature = "vault")]
pub use vault::VaultProvisioner;
