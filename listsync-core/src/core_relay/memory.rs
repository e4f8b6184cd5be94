/*
    memory.rs - In-process relays

    MemoryRelayPool implements RelayConnector over relays that live in memory.
    Each relay stores events, replays the matching ones on subscribe followed
    by EOSE, and pushes later `publish`ed events to open subscriptions.

    Knobs for exercising the sync layer:
    - set_online(false): subscribe fails with ConnectFailed
    - set_latency(d): stored replay starts after `d`
    - set_withhold_eose(true): stored events are sent but EOSE never is
    - subscription_count(): how many subscriptions a relay has accepted
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::connector::{RelayConnector, RelayError, RelayMessage};
use crate::core_event::{Event, Filter, RelayUrl};

/// Buffer per subscription channel
const SUBSCRIPTION_BUFFER: usize = 1024;

#[derive(Default)]
struct MemoryRelay {
    events: Vec<Event>,
    online: bool,
    latency: Option<Duration>,
    withhold_eose: bool,
    subscriptions_opened: usize,
    live: Vec<(Filter, mpsc::Sender<RelayMessage>)>,
}

/// A set of in-memory relays addressed by url
#[derive(Clone, Default)]
pub struct MemoryRelayPool {
    relays: Arc<Mutex<HashMap<RelayUrl, MemoryRelay>>>,
}

impl MemoryRelayPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty, online relay (no-op if it exists)
    pub fn add_relay(&self, relay: &RelayUrl) {
        self.relays
            .lock()
            .entry(relay.clone())
            .or_insert_with(|| MemoryRelay {
                online: true,
                ..Default::default()
            });
    }

    /// Store an event without notifying open subscriptions
    pub fn insert(&self, relay: &RelayUrl, event: Event) {
        self.add_relay(relay);
        if let Some(state) = self.relays.lock().get_mut(relay) {
            state.events.push(event);
        }
    }

    /// Store an event and push it to every open subscription it matches
    ///
    /// Returns the number of subscriptions it was delivered to.
    pub fn publish(&self, relay: &RelayUrl, event: Event) -> usize {
        self.add_relay(relay);
        let mut relays = self.relays.lock();
        let Some(state) = relays.get_mut(relay) else {
            return 0;
        };

        state.events.push(event.clone());
        state.live.retain(|(_, tx)| !tx.is_closed());

        let mut delivered = 0;
        for (filter, tx) in &state.live {
            if filter.matches(&event) && tx.try_send(RelayMessage::Event(event.clone())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every open subscription on `relay` with a CLOSED message
    pub fn close_subscriptions(&self, relay: &RelayUrl, reason: &str) {
        if let Some(state) = self.relays.lock().get_mut(relay) {
            for (_, tx) in state.live.drain(..) {
                let _ = tx.try_send(RelayMessage::Closed(reason.to_string()));
            }
        }
    }

    pub fn set_online(&self, relay: &RelayUrl, online: bool) {
        self.add_relay(relay);
        if let Some(state) = self.relays.lock().get_mut(relay) {
            state.online = online;
            if !online {
                state.live.clear();
            }
        }
    }

    pub fn set_latency(&self, relay: &RelayUrl, latency: Duration) {
        self.add_relay(relay);
        if let Some(state) = self.relays.lock().get_mut(relay) {
            state.latency = Some(latency);
        }
    }

    pub fn set_withhold_eose(&self, relay: &RelayUrl, withhold: bool) {
        self.add_relay(relay);
        if let Some(state) = self.relays.lock().get_mut(relay) {
            state.withhold_eose = withhold;
        }
    }

    pub fn subscription_count(&self, relay: &RelayUrl) -> usize {
        self.relays
            .lock()
            .get(relay)
            .map(|state| state.subscriptions_opened)
            .unwrap_or(0)
    }

    /// Open subscriptions whose receiver is still alive
    pub fn live_subscription_count(&self, relay: &RelayUrl) -> usize {
        self.relays
            .lock()
            .get(relay)
            .map(|state| state.live.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn relay_urls(&self) -> Vec<RelayUrl> {
        let mut urls: Vec<RelayUrl> = self.relays.lock().keys().cloned().collect();
        urls.sort();
        urls
    }
}

#[async_trait]
impl RelayConnector for MemoryRelayPool {
    async fn subscribe(
        &self,
        relay: &RelayUrl,
        filter: &Filter,
    ) -> Result<mpsc::Receiver<RelayMessage>, RelayError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let (stored, latency, withhold_eose) = {
            let mut relays = self.relays.lock();
            let state = relays.get_mut(relay).ok_or_else(|| RelayError::ConnectFailed {
                relay: relay.clone(),
                reason: "unknown relay".to_string(),
            })?;
            if !state.online {
                return Err(RelayError::ConnectFailed {
                    relay: relay.clone(),
                    reason: "relay offline".to_string(),
                });
            }

            state.subscriptions_opened += 1;
            state.live.push((filter.clone(), tx.clone()));

            let stored: Vec<Event> = state
                .events
                .iter()
                .filter(|event| filter.matches(event))
                .cloned()
                .collect();
            (stored, state.latency, state.withhold_eose)
        };

        debug!(relay = %relay, stored = stored.len(), "memory relay subscription opened");

        tokio::spawn(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            for event in stored {
                if tx.send(RelayMessage::Event(event)).await.is_err() {
                    return;
                }
            }
            if !withhold_eose {
                let _ = tx.send(RelayMessage::EndOfStoredEvents).await;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_event::{EventId, Kind, PublicKey, Timestamp};

    fn url(name: &str) -> RelayUrl {
        RelayUrl::parse(&format!("wss://{}.example", name)).unwrap()
    }

    fn event(id: u8, kind: u16) -> Event {
        Event {
            id: EventId::from_bytes([id; 32]),
            pubkey: PublicKey::from_bytes([1; 32]),
            kind: Kind(kind),
            created_at: Timestamp(id as u64),
            tags: vec![],
            content: String::new(),
            sig: None,
        }
    }

    #[tokio::test]
    async fn test_replays_matching_events_then_eose() {
        let pool = MemoryRelayPool::new();
        pool.insert(&url("a"), event(1, 30000));
        pool.insert(&url("a"), event(2, 1));

        let filter = Filter::new().kind(Kind::PEOPLE_LIST);
        let mut rx = pool.subscribe(&url("a"), &filter).await.unwrap();

        assert_eq!(rx.recv().await, Some(RelayMessage::Event(event(1, 30000))));
        assert_eq!(rx.recv().await, Some(RelayMessage::EndOfStoredEvents));
        assert_eq!(pool.subscription_count(&url("a")), 1);
    }

    #[tokio::test]
    async fn test_offline_and_unknown_relays_fail() {
        let pool = MemoryRelayPool::new();
        pool.set_online(&url("down"), false);

        let err = pool.subscribe(&url("down"), &Filter::new()).await.unwrap_err();
        assert_eq!(err.relay(), &url("down"));
        assert!(pool.subscribe(&url("nowhere"), &Filter::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_live_subscriptions() {
        let pool = MemoryRelayPool::new();
        pool.add_relay(&url("a"));
        let mut rx = pool.subscribe(&url("a"), &Filter::new().kind(Kind(30000))).await.unwrap();
        assert_eq!(rx.recv().await, Some(RelayMessage::EndOfStoredEvents));

        assert_eq!(pool.publish(&url("a"), event(3, 30000)), 1);
        assert_eq!(pool.publish(&url("a"), event(4, 1)), 0);
        assert_eq!(rx.recv().await, Some(RelayMessage::Event(event(3, 30000))));

        drop(rx);
        assert_eq!(pool.live_subscription_count(&url("a")), 0);
    }

    #[tokio::test]
    async fn test_close_subscriptions_sends_closed() {
        let pool = MemoryRelayPool::new();
        pool.set_withhold_eose(&url("a"), true);
        let mut rx = pool.subscribe(&url("a"), &Filter::new()).await.unwrap();

        pool.close_subscriptions(&url("a"), "shutting down");
        assert_eq!(rx.recv().await, Some(RelayMessage::Closed("shutting down".to_string())));
    }
}
