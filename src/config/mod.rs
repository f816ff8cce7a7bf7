//! # Configuration Management
//!
//! Environment-driven configuration for the SDS server. Every value has an
//! `SDS_*` variable; the Vault client reuses the standard `VAULT_*` names.
//! `CERTIFICATE_ARN`, `CA_CERT` and `ROTATION_PERIOD` are read as fallbacks
//! for deployments configured with the unprefixed names.

use std::path::PathBuf;
use std::time::Duration;

use validator::Validate;

use crate::{Error, Result};

mod settings;

pub use settings::ObservabilityConfig;

/// Default Unix domain socket the proxy connects to
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/envoy.sock";

/// Default rotation period (24 hours)
pub const DEFAULT_ROTATION_PERIOD_SECONDS: u64 = 24 * 60 * 60;

/// Default grace period before a stuck shutdown is forced
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 10;

/// Which credential backend feeds the rotation tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionerKind {
    /// PEM files on local disk
    File,
    /// HashiCorp Vault KV v2
    Vault,
    /// AWS Certificate Manager export
    Acm,
}

impl std::str::FromStr for ProvisionerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "vault" => Ok(Self::Vault),
            "acm" => Ok(Self::Acm),
            other => Err(Error::config(format!(
                "Unknown provisioner '{}', expected 'file', 'vault' or 'acm'",
                other
            ))),
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Validate)]
pub struct Config {
    /// Filesystem path of the SDS socket
    pub socket_path: PathBuf,

    #[validate(range(min = 1, message = "Rotation period must be at least 1 second"))]
    pub rotation_period_seconds: u64,

    pub shutdown_grace_seconds: u64,

    pub provisioner: ProvisionerKind,

    /// Credential identifier: a certificate directory, a Vault KV path or an ACM ARN
    #[validate(length(min = 1, message = "SDS_CERTIFICATE_ID cannot be empty"))]
    pub certificate_id: String,

    pub certificate_passphrase: Option<String>,

    /// Inline trust bundle served as `ca_certificate`
    pub ca_cert: Option<String>,

    pub vault: VaultConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

/// Vault client settings
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub address: Option<String>,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub kv_mount_path: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self { address: None, token: None, namespace: None, kv_mount_path: "secret".to_string() }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let socket_path = non_empty("SDS_SOCKET_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));

        let rotation_period_seconds =
            match non_empty("SDS_ROTATION_PERIOD").or_else(|| non_empty("ROTATION_PERIOD")) {
                Some(raw) => parse_duration_secs(&raw)?,
                None => parse_u64(
                    &lookup,
                    "SDS_ROTATION_PERIOD_SECONDS",
                    DEFAULT_ROTATION_PERIOD_SECONDS,
                )?,
            };
        let shutdown_grace_seconds =
            parse_u64(&lookup, "SDS_SHUTDOWN_GRACE_SECONDS", DEFAULT_SHUTDOWN_GRACE_SECONDS)?;

        let provisioner = match non_empty("SDS_PROVISIONER") {
            Some(value) => value.parse()?,
            None => ProvisionerKind::File,
        };

        let certificate_id = non_empty("SDS_CERTIFICATE_ID")
            .or_else(|| non_empty("CERTIFICATE_ARN"))
            .ok_or_else(|| Error::config("SDS_CERTIFICATE_ID is required"))?;

        let vault = VaultConfig {
            address: non_empty("VAULT_ADDR"),
            token: non_empty("VAULT_TOKEN"),
            namespace: non_empty("VAULT_NAMESPACE"),
            kv_mount_path: non_empty("SDS_VAULT_KV_MOUNT").unwrap_or_else(|| "secret".to_string()),
        };

        let config = Self {
            socket_path,
            rotation_period_seconds,
            shutdown_grace_seconds,
            provisioner,
            certificate_id,
            certificate_passphrase: non_empty("SDS_CERTIFICATE_PASSPHRASE"),
            ca_cert: non_empty("SDS_CA_CERT").or_else(|| non_empty("CA_CERT")),
            vault,
            observability: ObservabilityConfig::from_lookup(&lookup)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and cross-field requirements
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::config(format!("Validation failed: {}", e)))?;

        if self.provisioner == ProvisionerKind::Vault && self.vault.address.is_none() {
            return Err(Error::config("VAULT_ADDR is required when SDS_PROVISIONER=vault"));
        }

        Ok(())
    }

    /// Rotation period as Duration
    pub fn rotation_period(&self) -> Duration {
        Duration::from_secs(self.rotation_period_seconds)
    }

    /// Shutdown grace period as Duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Resource names the startup preflight must be able to resolve
    pub fn preflight_resources(&self) -> Vec<String> {
        let mut names = vec![crate::secrets::CERTIFICATE_RESOURCE.to_string()];
        if self.ca_cert.is_some() {
            names.push(crate::secrets::CA_CERTIFICATE_RESOURCE.to_string());
        }
        names
    }
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

/// Parse a duration such as `24h` or `90m 30s` into whole seconds
fn parse_duration_secs(raw: &str) -> Result<u64> {
    humantime::parse_duration(raw.trim())
        .map(|period| period.as_secs())
        .map_err(|e| Error::config(format!("Invalid rotation period '{}': {}", raw, e)))
}

pub(crate) fn parse_bool(raw: &str) -> bool {
    let raw = raw.trim();
    raw.eq_ignore_ascii_case("true") || raw == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[("SDS_CERTIFICATE_ID", "/etc/certs")]))
            .unwrap();

        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.rotation_period(), Duration::from_secs(86400));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(config.provisioner, ProvisionerKind::File);
        assert!(config.ca_cert.is_none());
        assert_eq!(config.vault.kv_mount_path, "secret");
        assert_eq!(config.preflight_resources(), vec!["certificate".to_string()]);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "pki/envoy"),
            ("SDS_SOCKET_PATH", "/run/sds.sock"),
            ("SDS_ROTATION_PERIOD_SECONDS", "3600"),
            ("SDS_PROVISIONER", "Vault"),
            ("VAULT_ADDR", "http://127.0.0.1:8200"),
            ("SDS_CA_CERT", "-----BEGIN CERTIFICATE-----"),
        ]))
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/sds.sock"));
        assert_eq!(config.rotation_period(), Duration::from_secs(3600));
        assert_eq!(config.provisioner, ProvisionerKind::Vault);
        assert_eq!(
            config.preflight_resources(),
            vec!["certificate".to_string(), "ca_certificate".to_string()]
        );
    }

    #[test]
    fn test_missing_certificate_id() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("SDS_CERTIFICATE_ID"));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "/etc/certs"),
            ("SDS_ROTATION_PERIOD_SECONDS", "24h"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "/etc/certs"),
            ("SDS_ROTATION_PERIOD_SECONDS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Rotation period"));

        let err = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "/etc/certs"),
            ("SDS_PROVISIONER", "gcp"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Unknown provisioner"));

        let err = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "/etc/certs"),
            ("SDS_ROTATION_PERIOD", "a day"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Invalid rotation period"));

        let err = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "/etc/certs"),
            ("SDS_ROTATION_PERIOD", "500ms"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Rotation period"));
    }

    #[test]
    fn test_rotation_period_duration_string() {
        let config = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "/etc/certs"),
            ("SDS_ROTATION_PERIOD", "1h 30m"),
            ("SDS_ROTATION_PERIOD_SECONDS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.rotation_period(), Duration::from_secs(5400));

        let config = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "/etc/certs"),
            ("ROTATION_PERIOD", "24h"),
        ]))
        .unwrap();
        assert_eq!(config.rotation_period(), Duration::from_secs(86400));
    }

    #[test]
    fn test_unprefixed_acm_names() {
        let config = Config::from_lookup(lookup_from(&[
            ("SDS_PROVISIONER", "acm"),
            ("CERTIFICATE_ARN", "arn:aws:acm:us-east-1:123456789012:certificate/abc"),
            ("CA_CERT", "ca-pem"),
        ]))
        .unwrap();

        assert_eq!(config.provisioner, ProvisionerKind::Acm);
        assert_eq!(config.certificate_id, "arn:aws:acm:us-east-1:123456789012:certificate/abc");
        assert_eq!(config.ca_cert.as_deref(), Some("ca-pem"));
    }

    #[test]
    fn test_vault_requires_address() {
        let err = Config::from_lookup(lookup_from(&[
            ("SDS_CERTIFICATE_ID", "pki/envoy"),
            ("SDS_PROVISIONER", "vault"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("VAULT_ADDR"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("yes"));
    }
}
