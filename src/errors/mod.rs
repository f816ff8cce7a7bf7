//! # Error Handling
//!
//! Error types for the SDS server, built with `thiserror`.

use tonic::Status;

/// Custom result type for SDS server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SDS server
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential backend failures
    #[error("Provisioner error: {0}")]
    Provisioner(String),

    /// A requested resource name the provisioner does not know
    #[error("Unknown resource: {0:?}")]
    UnknownResource(String),

    /// Session id absent from the secrets manager registry
    #[error("Session {session_id} is not registered")]
    NotRegistered { session_id: String },

    /// A secret that cannot be placed in a discovery response
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    /// Network transport errors (gRPC, socket)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new provisioner error
    pub fn provisioner<S: Into<String>>(message: S) -> Self {
        Self::Provisioner(message.into())
    }

    /// Create an unknown resource error
    pub fn unknown_resource<S: Into<String>>(name: S) -> Self {
        Self::UnknownResource(name.into())
    }

    /// Create a not-registered error for a session
    pub fn not_registered<S: Into<String>>(session_id: S) -> Self {
        Self::NotRegistered { session_id: session_id.into() }
    }

    /// Create an invalid secret error
    pub fn invalid_secret<S: Into<String>>(message: S) -> Self {
        Self::InvalidSecret(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this is a registry miss
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered { .. })
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        match &error {
            Error::UnknownResource(_) => Status::invalid_argument(error.to_string()),
            Error::NotRegistered { .. } => Status::failed_precondition(error.to_string()),
            Error::Transport(_) => Status::unavailable(error.to_string()),
            Error::Provisioner(_) => Status::unavailable(error.to_string()),
            Error::Config(_)
            | Error::InvalidSecret(_)
            | Error::Io(_)
            | Error::Internal(_) => Status::internal(error.to_string()),
        }
    }
}
