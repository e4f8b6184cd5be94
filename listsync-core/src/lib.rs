//! listsync: people lists fetched from many relays, kept convergent
//!
//! Layers, leaves first:
//!
//! - [`core_event`]: event, tag, filter and identifier types
//! - [`core_state`]: replay-latest observable cells
//! - [`core_relay`]: relay connector seam, in-memory relays, relay ranking
//! - [`core_sync`]: one filter across many relays, deduplicated
//! - [`core_lists`]: list entities and the per-owner lists directory
//!
//! Ambient: [`config`], [`logging`], [`metrics`], and [`test_utils`].

pub mod config;
pub mod core_event;
pub mod core_lists;
pub mod core_relay;
pub mod core_state;
pub mod core_sync;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::Config;
pub use core_lists::{ListsDirectory, PeopleList};
pub use logging::{init_logging, LogLevel};
