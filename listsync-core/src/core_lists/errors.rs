//! Errors raised by list entities and the lists directory

use thiserror::Error;

use crate::core_event::{EventError, Kind, PublicKey};
use crate::core_sync::SyncError;

/// Failures of a single list entity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    #[error("Event kind {0} is not a people list")]
    WrongKind(Kind),

    #[error("List event has no identifier (d) tag")]
    MissingIdentifier,

    #[error("{0} is already a member")]
    AlreadyMember(PublicKey),

    #[error("{0} is not a member")]
    NotMember(PublicKey),

    #[error("List identifier is {0} bytes, too long for an address")]
    IdentifierTooLong(usize),
}

/// Failures at the directory boundary
#[derive(Debug, Error)]
pub enum ListsError {
    #[error("Invalid owner identity: {0}")]
    InvalidIdentity(#[source] EventError),

    #[error("Could not open list request: {0}")]
    Sync(#[from] SyncError),
}

pub type ListResult<T> = Result<T, ListError>;
pub type ListsResult<T> = Result<T, ListsError>;
