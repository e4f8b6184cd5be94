//! Which relays have delivered which events

use hashlink::LruCache;
use parking_lot::Mutex;
use std::fmt;

use crate::core_event::{EventId, RelayUrl};

/// Events tracked when no capacity is configured
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

/// Event id -> relays that delivered it, in first-seen order
///
/// Fed by every relay delivery (including duplicates the request suppresses)
/// so that address construction knows every relay carrying an event.
/// Bounded: once full, the least recently recorded event is evicted. Events
/// that stop being a list's current revision are dropped with [`forget`](Self::forget).
pub struct SeenOnRelays {
    seen: Mutex<LruCache<EventId, Vec<RelayUrl>>>,
}

impl SeenOnRelays {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SeenOnRelays {
            seen: Mutex::new(LruCache::new(capacity.max(1))),
        }
    }

    /// Returns true if `relay` was not yet known for `id`
    pub fn record(&self, id: EventId, relay: &RelayUrl) -> bool {
        let mut seen = self.seen.lock();
        if let Some(relays) = seen.get_mut(&id) {
            if relays.contains(relay) {
                return false;
            }
            relays.push(relay.clone());
            return true;
        }
        seen.insert(id, vec![relay.clone()]);
        true
    }

    pub fn relays_for(&self, id: &EventId) -> Vec<RelayUrl> {
        self.seen.lock().peek(id).cloned().unwrap_or_default()
    }

    /// Stop tracking `id`; returns false if it was not tracked
    pub fn forget(&self, id: &EventId) -> bool {
        self.seen.lock().remove(id).is_some()
    }

    /// Number of events tracked
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.seen.lock().capacity()
    }
}

impl Default for SeenOnRelays {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SeenOnRelays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seen = self.seen.lock();
        f.debug_struct("SeenOnRelays")
            .field("events", &seen.len())
            .field("capacity", &seen.capacity())
            .finish()
    }
}
