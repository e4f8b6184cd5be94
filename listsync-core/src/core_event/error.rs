//! Error types for event primitives

use thiserror::Error;

/// Result type for parsing event primitives
pub type EventResult<T> = Result<T, EventError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Not 64 hex characters
    #[error("Invalid {what}: {value:?}")]
    InvalidHex { what: &'static str, value: String },

    #[error("Invalid relay url {url:?}: {reason}")]
    InvalidRelayUrl { url: String, reason: &'static str },

    #[error("Invalid event JSON: {0}")]
    InvalidJson(String),
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        EventError::InvalidJson(e.to_string())
    }
}
