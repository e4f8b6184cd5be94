//! Error types for opening requests

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Relay failures never show up here; they only reduce coverage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("No tokio runtime available to drive the request")]
    NoRuntime,
}
