//! Test utilities shared by unit tests, integration tests and the CLI tests
//!
//! Fixtures build people-list events and relay urls; async helpers put
//! bounds on waiting for channels and futures.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
