//! People lists
//!
//! This module turns relay events into convergent per-owner list state.
//!
//! ## Pieces
//!
//! - **PeopleList**: one list, last-write-wins by `created_at`, members
//!   projected from `p` tags
//! - **ListsDirectory**: coalesces fetches per owner, routes events into
//!   lists, publishes each owner's `name -> list` snapshot
//! - **ListAddress**: shareable pointer to a list with a relay hint
//! - **EventCache**: receives every unique event the directory sees

pub mod address;
pub mod cache;
pub mod directory;
pub mod errors;
pub mod list;

#[cfg(test)]
pub mod tests;

pub use address::ListAddress;
pub use cache::{EventCache, NoopEventCache};
pub use directory::{ListMap, ListsDirectory, OwnerStatus};
pub use errors::{ListError, ListResult, ListsError, ListsResult};
pub use list::{ApplyOutcome, ListMember, PeopleList};
