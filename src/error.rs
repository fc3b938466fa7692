//! Error types for the Turnstile gateway.

use thiserror::Error;

use crate::admission::CellKey;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every forwarding attempt failed at the transport level
    #[error("Upstream unreachable after {retry_count} failed attempts: {last_error}")]
    UpstreamUnreachable {
        retry_count: u32,
        last_error: String,
    },

    /// A concurrency slot was released more often than it was acquired
    #[error("Concurrency slot released with no active requests for {0}")]
    SlotUnderflow(CellKey),

    /// HTTP client construction errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
