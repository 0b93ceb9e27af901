//! Error types for windowguard.

use thiserror::Error;

/// Main error type for windowguard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// A limit, window or other setting is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No caller identity could be derived from the request.
    #[error("Missing rate limit key")]
    MissingKey,

    /// The shared store could not complete the atomic check.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        GuardError::StoreUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for GuardError {
    fn from(err: config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

impl GuardError {
    /// Whether this error means the limiter could not render a decision.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, GuardError::StoreUnavailable(_))
    }
}

/// Result type alias for windowguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
