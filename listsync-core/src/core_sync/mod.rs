//! Multi-relay requests
//!
//! One filter, many relays, one deduplicated stream of events.

pub mod error;
pub mod request;

pub use error::{SyncError, SyncResult};
pub use request::{MultiRelayRequest, RequestStatus};
