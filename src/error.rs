//! Error types for the VexDB client

use thiserror::Error;

use crate::types::StatusCode;

/// Error type for VexDB client operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete client configuration. Raised at construction
    /// time only; a client is never handed out half-initialized.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed frame or payload on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error status
    #[error("Server error ({status:?}): {message}")]
    Server {
        /// Wire status code reported by the server
        status: StatusCode,
        /// Server-supplied error message
        message: String,
    },

    /// Server does not recognize the requested method
    #[error("Server does not recognize method `{0}`")]
    UnknownMethod(String),

    /// Server lacks a capability this client requires
    #[error("Incompatible server: {0}")]
    Incompatible(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a server error from a wire status and message
    pub fn server<S: Into<String>>(status: StatusCode, msg: S) -> Self {
        Error::Server {
            status,
            message: msg.into(),
        }
    }

    /// Whether this error indicates the underlying channel can no longer be
    /// trusted. The pool discards channels whose last call failed this way.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Io(_) | Error::Timeout(_) | Error::Protocol(_)
        )
    }
}
