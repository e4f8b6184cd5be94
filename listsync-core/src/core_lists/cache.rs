//! Hand-off point for a generic event cache
//!
//! Every unique event a directory request receives is offered to the cache
//! before list routing. The directory never waits on or reads from it.

use crate::core_event::Event;

pub trait EventCache: Send + Sync {
    fn handle_event(&self, event: &Event);
}

/// Cache that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventCache;

impl EventCache for NoopEventCache {
    fn handle_event(&self, _event: &Event) {}
}
