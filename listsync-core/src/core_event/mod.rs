//! Event primitives shared by every subsystem
//!
//! Identifiers, tags, filters, and coordinates of the events relays deliver.

pub mod coordinate;
pub mod error;
pub mod event;
pub mod filter;
pub mod ids;
pub mod tag;

pub use coordinate::Coordinate;
pub use error::{EventError, EventResult};
pub use event::{Event, EventDraft};
pub use filter::Filter;
pub use ids::{EventId, Kind, PublicKey, RelayUrl, Timestamp};
pub use tag::Tag;
