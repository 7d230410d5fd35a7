//! Error types for the Edgegate service.

use thiserror::Error;

/// Main error type for Edgegate operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store read/write failures
    #[error("Counter store error: {0}")]
    Store(String),

    /// Transport failures talking to the upstream origin
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Store(err.to_string())
    }
}

/// Result type alias for Edgegate operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
