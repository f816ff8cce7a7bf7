//! # SDS Server
//!
//! Envoy Secret Discovery Service server. Proxies connect over a local Unix
//! socket, name the secrets they need, and receive them again every time the
//! rotation period elapses.
//!
//! ## Architecture
//!
//! ```text
//! Envoy ⇄ xds::services (one stream per proxy)
//!              ↓ register / unregister
//!         manager::SecretsManager → rotation task per session
//!              ↓ get_resources
//!         secrets::Provisioner (file, Vault)
//! ```

pub mod config;
pub mod errors;
pub mod manager;
pub mod observability;
pub mod secrets;
pub mod startup;
pub mod xds;

pub use config::Config;
pub use errors::{Error, Result};
pub use manager::SecretsManager;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "sds-server");
    }
}
