//! Error types for the Gatekeeper admission layer.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors (fatal at construction time)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window store errors
    #[error("Window store error: {0}")]
    Store(#[from] StoreError),

    /// The concurrency gate was closed while a request was waiting on it
    #[error("Concurrency gate is closed")]
    GateClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
