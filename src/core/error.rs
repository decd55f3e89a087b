//! Error types for chainpulse.

use thiserror::Error;

/// Result type alias for chainpulse operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chainpulse operations.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    // Chain client errors
    #[error("RPC transport error: {0}")]
    RpcTransport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),

    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),

    // Sampling errors
    #[error("Resource sampling failed: {0}")]
    SamplingFailed(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Generic errors
    #[error("Watcher is not running")]
    WatcherStopped,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::RpcTransport(err.to_string())
    }
}
