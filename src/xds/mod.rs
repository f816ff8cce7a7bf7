//! # Envoy Secret Discovery Service
//!
//! `secret` builds discovery responses, `services` runs the per-stream
//! protocol and `server` exposes it over a Unix domain socket.

pub mod secret;
pub mod server;
pub mod services;

pub use secret::{create_discovery_response, new_nonce, VersionClock, SECRET_TYPE_URL};
pub use server::{bind_socket, serve};
pub use services::{run_secret_stream, SdsService};
