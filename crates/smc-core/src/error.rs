//! Error types for the SMC exporter
//!
//! This module defines all error types used throughout the workspace.

use thiserror::Error;

/// Result type alias for exporter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the SMC exporter
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration, raised before any network call
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or empty responses from the SMC API
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unexpected HTTP status from the SMC API
    #[error("Remote error (HTTP {status}): {message}")]
    Remote {
        /// HTTP status code returned by the appliance
        status: u16,
        /// What was being attempted
        message: String,
    },

    /// Operation the remote API does not support
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Connection refused, timeout and other transport failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// A list role has no registered remote identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// Key-value store errors
    #[error("Key-value store error: {0}")]
    KeyValueStore(String),

    /// IDS rule-file workflow errors
    #[error("Rule workflow error: {0}")]
    RuleWorkflow(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a remote error carrying the HTTP status
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Create a "not supported" error
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a key-value store error
    pub fn kv_store(msg: impl Into<String>) -> Self {
        Self::KeyValueStore(msg.into())
    }

    /// Create a rule workflow error
    pub fn rule_workflow(msg: impl Into<String>) -> Self {
        Self::RuleWorkflow(msg.into())
    }

    /// HTTP status carried by a [`Error::Remote`], if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
