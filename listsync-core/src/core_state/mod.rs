//! Observable state containers

pub mod cell;

pub use cell::{StateCell, Subscription};
