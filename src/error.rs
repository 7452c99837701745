//! Error types for the perceptor service

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the perceptor service
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (rejected at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device sampling failed
    #[error("Device sampling failed: {0}")]
    Sampler(String),

    /// An analyzer rejected or failed to process an event
    #[error("Analyzer '{analyzer}' failed: {reason}")]
    Analyzer { analyzer: String, reason: String },

    /// Background task did not stop within the shutdown deadline
    #[error("Shutdown timed out waiting for task: {0}")]
    ShutdownTimeout(String),

    /// Event payload could not be decoded
    #[error("Failed to decode event: {0}")]
    EventDecode(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
