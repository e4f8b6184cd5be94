/*
    request.rs - One filter across many relays

    Layout of a running request:

      relay task (per relay) ──┐
      relay task (per relay) ──┼──► inbound channel ──► dispatcher ──► handler(Event)
      relay task (per relay) ──┘                           │
                                                           └──► status: StateCell<RequestStatus>

    Relay tasks:
    - subscribe through the pool's RelayConnector, bounded by connect_timeout
    - forward every event, report EOSE / close / failure as "settled"
    - report response time and failures to the pool's RelayFeedback
    - settle on their own after eose_timeout if the relay never sends EOSE

    Dispatcher:
    - drops events that do not match the filter
    - records (event id, relay) in the pool's SeenOnRelays, duplicates included
    - delivers each event id to the handler exactly once, in arrival order
    - flips status to Drained once every relay settled; keeps forwarding live
      events afterwards

    close() is idempotent. Once it returns the handler is never called again;
    a handler may close its own request.
*/

use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use super::error::{SyncError, SyncResult};
use crate::core_event::{Event, EventId, Filter, RelayUrl};
use crate::core_relay::{RelayError, RelayMessage, RelayPool};
use crate::core_state::StateCell;
use crate::metrics;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Request whose handler is running on this thread, if any
    static DELIVERING: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Progress of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// `pending` relays have not finished sending stored events
    Loading { pending: usize },
    /// Every relay finished (or failed, or timed out); live events still flow
    Drained,
    Closed,
}

impl RequestStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, RequestStatus::Loading { .. })
    }
}

enum Inbound {
    Event(RelayUrl, Event),
    /// The relay no longer holds back the drained state
    Settled(RelayUrl),
}

struct Gate {
    closed: AtomicBool,
    // Held for reading while the handler runs; close() takes it for writing
    delivery: RwLock<()>,
}

/// A running multi-relay request; dropping it closes it
#[must_use = "dropping a MultiRelayRequest closes it"]
pub struct MultiRelayRequest {
    id: u64,
    relays: Vec<RelayUrl>,
    filter: Filter,
    status: StateCell<RequestStatus>,
    gate: Arc<Gate>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MultiRelayRequest {
    /// Start querying `relays` with `filter`, delivering unique events to `handler`
    pub fn open<F>(
        pool: &RelayPool,
        relays: &[RelayUrl],
        filter: Filter,
        handler: F,
    ) -> SyncResult<Self>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);

        let mut unique: Vec<RelayUrl> = Vec::with_capacity(relays.len());
        for relay in relays {
            if !unique.contains(relay) {
                unique.push(relay.clone());
            }
        }

        let status = StateCell::new(if unique.is_empty() {
            RequestStatus::Drained
        } else {
            RequestStatus::Loading {
                pending: unique.len(),
            }
        });
        let gate = Arc::new(Gate {
            closed: AtomicBool::new(false),
            delivery: RwLock::new(()),
        });

        info!(request = id, relays = unique.len(), filter = ?filter, "opening multi-relay request");
        metrics::request_opened();

        let (tx, rx) = mpsc::channel(pool.options.channel_capacity);
        let mut tasks = Vec::with_capacity(unique.len() + 1);
        for relay in &unique {
            tasks.push(runtime.spawn(run_relay(
                id,
                pool.clone(),
                relay.clone(),
                filter.clone(),
                tx.clone(),
            )));
        }
        drop(tx);

        let dispatcher = Dispatcher {
            id,
            filter: filter.clone(),
            pool: pool.clone(),
            pending: unique.iter().cloned().collect(),
            delivered: HashSet::new(),
            status: status.clone(),
            gate: gate.clone(),
            handler,
        };
        tasks.push(runtime.spawn(dispatcher.run(rx)));

        Ok(MultiRelayRequest {
            id,
            relays: unique,
            filter,
            status,
            gate,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn relays(&self) -> &[RelayUrl] {
        &self.relays
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn status(&self) -> StateCell<RequestStatus> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.gate.closed.load(Ordering::Acquire)
    }

    /// Resolves once the request is no longer loading (drained or closed)
    pub async fn wait_drained(&self) -> RequestStatus {
        let mut rx = self.status.watch();
        rx.wait_for(|status| !status.is_loading())
            .await
            .map(|status| *status)
            .unwrap_or(RequestStatus::Closed)
    }

    /// Stop all relay subscriptions; no event is delivered after this returns
    pub fn close(&self) {
        if self.gate.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Wait out a delivery running on another thread. When called from our
        // own handler the delivery in progress is the caller itself.
        let from_own_handler = DELIVERING.with(|current| current.get() == Some(self.id));
        if !from_own_handler {
            drop(self.gate.delivery.write());
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.status.set(RequestStatus::Closed);
        info!(request = self.id, "request closed");
    }
}

impl Drop for MultiRelayRequest {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MultiRelayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiRelayRequest")
            .field("id", &self.id)
            .field("relays", &self.relays)
            .field("status", &self.status.get())
            .finish()
    }
}

struct DeliveryMarker {
    previous: Option<u64>,
}

impl DeliveryMarker {
    fn enter(id: u64) -> Self {
        let previous = DELIVERING.with(|current| current.replace(Some(id)));
        DeliveryMarker { previous }
    }
}

impl Drop for DeliveryMarker {
    fn drop(&mut self) {
        DELIVERING.with(|current| current.set(self.previous));
    }
}

struct Dispatcher<F> {
    id: u64,
    filter: Filter,
    pool: RelayPool,
    pending: HashSet<RelayUrl>,
    delivered: HashSet<EventId>,
    status: StateCell<RequestStatus>,
    gate: Arc<Gate>,
    handler: F,
}

impl<F> Dispatcher<F>
where
    F: FnMut(Event) + Send + 'static,
{
    async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some(message) = inbound.recv().await {
            let keep_going = match message {
                Inbound::Event(relay, event) => self.on_event(relay, event),
                Inbound::Settled(relay) => self.on_settled(&relay),
            };
            if !keep_going {
                break;
            }
        }
        trace!(request = self.id, "dispatcher finished");
    }

    fn on_event(&mut self, relay: RelayUrl, event: Event) -> bool {
        if !self.filter.matches(&event) {
            debug!(request = self.id, relay = %relay, event = %event.id, "dropping event outside filter");
            metrics::event_rejected();
            return true;
        }

        self.pool.seen.record(event.id, &relay);
        if !self.delivered.insert(event.id) {
            trace!(request = self.id, relay = %relay, event = %event.id, "duplicate event");
            metrics::event_duplicate();
            return true;
        }

        let _delivery = self.gate.delivery.read();
        if self.gate.closed.load(Ordering::Acquire) {
            return false;
        }

        metrics::event_received();
        let _marker = DeliveryMarker::enter(self.id);
        (self.handler)(event);
        true
    }

    fn on_settled(&mut self, relay: &RelayUrl) -> bool {
        if self.gate.closed.load(Ordering::Acquire) {
            return false;
        }
        if !self.pending.remove(relay) {
            return true;
        }

        if self.pending.is_empty() {
            info!(request = self.id, "request drained");
            self.status.set(RequestStatus::Drained);
        } else {
            self.status.set(RequestStatus::Loading {
                pending: self.pending.len(),
            });
        }
        true
    }
}

async fn run_relay(
    request: u64,
    pool: RelayPool,
    relay: RelayUrl,
    filter: Filter,
    tx: mpsc::Sender<Inbound>,
) {
    let options = pool.options;
    let started = Instant::now();

    let subscribed = timeout(options.connect_timeout, pool.connector.subscribe(&relay, &filter))
        .await
        .unwrap_or_else(|_| Err(RelayError::Timeout(relay.clone())));
    let mut messages = match subscribed {
        Ok(messages) => messages,
        Err(err) => {
            warn!(request, relay = %relay, error = %err, "relay subscription failed");
            report_failure(&pool, &relay);
            let _ = tx.send(Inbound::Settled(relay)).await;
            return;
        }
    };

    let eose_deadline = sleep(options.eose_timeout);
    tokio::pin!(eose_deadline);
    let mut responded = false;
    let mut settled = false;

    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else {
                    debug!(request, relay = %relay, "relay stream ended");
                    if !settled {
                        report_failure(&pool, &relay);
                        let _ = tx.send(Inbound::Settled(relay)).await;
                    }
                    return;
                };

                if !responded {
                    responded = true;
                    pool.feedback.record_response(&relay, started.elapsed());
                }

                match message {
                    RelayMessage::Event(event) => {
                        if tx.send(Inbound::Event(relay.clone(), event)).await.is_err() {
                            return;
                        }
                    }
                    RelayMessage::EndOfStoredEvents => {
                        if !settled {
                            settled = true;
                            debug!(request, relay = %relay, elapsed = ?started.elapsed(), "end of stored events");
                            if tx.send(Inbound::Settled(relay.clone())).await.is_err() {
                                return;
                            }
                        }
                    }
                    RelayMessage::Closed(reason) => {
                        debug!(request, relay = %relay, reason = %reason, "relay closed subscription");
                        if !settled {
                            report_failure(&pool, &relay);
                            let _ = tx.send(Inbound::Settled(relay)).await;
                        }
                        return;
                    }
                }
            }
            _ = &mut eose_deadline, if !settled => {
                settled = true;
                warn!(request, relay = %relay, timeout = ?options.eose_timeout, "relay did not finish stored events in time");
                if tx.send(Inbound::Settled(relay.clone())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn report_failure(pool: &RelayPool, relay: &RelayUrl) {
    metrics::relay_failed();
    pool.feedback.record_failure(relay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_relay::{MemoryRelayPool, PoolOptions, RelayScoreboard};
    use crate::test_utils::*;
    use std::time::Duration;

    fn options() -> PoolOptions {
        PoolOptions {
            connect_timeout: Duration::from_secs(2),
            eose_timeout: Duration::from_millis(300),
            channel_capacity: 64,
            seen_capacity: 1_000,
        }
    }

    fn pool_over(relays: &MemoryRelayPool) -> (RelayPool, Arc<RelayScoreboard>) {
        let scoreboard = Arc::new(RelayScoreboard::new());
        let pool = RelayPool::with_scoreboard(Arc::new(relays.clone()), scoreboard.clone(), options());
        (pool, scoreboard)
    }

    fn collector() -> (impl FnMut(Event) + Send + 'static, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |event| {
            let _ = tx.send(event);
        }, rx)
    }

    #[tokio::test]
    async fn test_same_event_from_two_relays_delivered_once() {
        let relays = MemoryRelayPool::new();
        let list = ListEventBuilder::new(pubkey(1), "friends").build();
        relays.insert(&relay("a"), list.clone());
        relays.insert(&relay("b"), list.clone());
        let (pool, _) = pool_over(&relays);

        let (handler, mut rx) = collector();
        let request = MultiRelayRequest::open(
            &pool,
            &[relay("a"), relay("b")],
            Filter::people_lists(pubkey(1)),
            handler,
        )
        .unwrap();

        assert_eq!(
            assert_completes_within(DEFAULT_TEST_TIMEOUT, request.wait_drained()).await,
            RequestStatus::Drained
        );
        assert_eq!(try_drain(&mut rx), vec![list.clone()]);

        let seen = pool.seen.relays_for(&list.id);
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&relay("a")) && seen.contains(&relay("b")));
    }

    #[tokio::test]
    async fn test_failed_relay_does_not_block_drain() {
        let relays = MemoryRelayPool::new();
        let list = ListEventBuilder::new(pubkey(1), "friends").build();
        relays.insert(&relay("up"), list.clone());
        relays.set_online(&relay("down"), false);
        let (pool, scoreboard) = pool_over(&relays);

        let (handler, mut rx) = collector();
        let request = MultiRelayRequest::open(
            &pool,
            &[relay("down"), relay("up")],
            Filter::people_lists(pubkey(1)),
            handler,
        )
        .unwrap();

        assert_eq!(
            assert_completes_within(DEFAULT_TEST_TIMEOUT, request.wait_drained()).await,
            RequestStatus::Drained
        );
        assert_eq!(try_drain(&mut rx), vec![list]);
        assert_eq!(scoreboard.score(&relay("down")).failures, 1);
        assert_eq!(scoreboard.score(&relay("up")).successes, 1);
    }

    #[tokio::test]
    async fn test_missing_eose_drains_after_timeout() {
        let relays = MemoryRelayPool::new();
        relays.add_relay(&relay("a"));
        relays.set_withhold_eose(&relay("slow"), true);
        let (pool, _) = pool_over(&relays);

        let (handler, _rx) = collector();
        let request = MultiRelayRequest::open(
            &pool,
            &[relay("a"), relay("slow")],
            Filter::people_lists(pubkey(1)),
            handler,
        )
        .unwrap();

        let status = request.status();
        wait_for_state(&status, DEFAULT_TEST_TIMEOUT, |s| {
            *s == RequestStatus::Loading { pending: 1 }
        })
        .await;

        assert_eq!(
            assert_completes_within(DEFAULT_TEST_TIMEOUT, request.wait_drained()).await,
            RequestStatus::Drained
        );
    }

    #[tokio::test]
    async fn test_live_events_flow_after_drain() {
        let relays = MemoryRelayPool::new();
        relays.add_relay(&relay("a"));
        let (pool, _) = pool_over(&relays);

        let (handler, mut rx) = collector();
        let request = MultiRelayRequest::open(
            &pool,
            &[relay("a")],
            Filter::people_lists(pubkey(1)),
            handler,
        )
        .unwrap();
        request.wait_drained().await;

        let later = ListEventBuilder::new(pubkey(1), "later").created_at(5).build();
        assert_eq!(relays.publish(&relay("a"), later.clone()), 1);
        assert_eq!(recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await, Ok(later));

        // Other authors are outside the filter
        let foreign = ListEventBuilder::new(pubkey(9), "x").build();
        assert_eq!(relays.publish(&relay("a"), foreign), 0);
    }

    #[tokio::test]
    async fn test_no_delivery_after_close() {
        let relays = MemoryRelayPool::new();
        relays.add_relay(&relay("a"));
        let (pool, _) = pool_over(&relays);

        let (handler, mut rx) = collector();
        let request = MultiRelayRequest::open(
            &pool,
            &[relay("a")],
            Filter::people_lists(pubkey(1)),
            handler,
        )
        .unwrap();
        request.wait_drained().await;

        request.close();
        request.close();
        assert!(request.is_closed());
        assert_eq!(request.status().get(), RequestStatus::Closed);

        relays.publish(&relay("a"), ListEventBuilder::new(pubkey(1), "late").build());
        assert!(recv_timeout(&mut rx, SHORT_TEST_TIMEOUT).await.is_err());
    }

    #[tokio::test]
    async fn test_handler_may_close_its_own_request() {
        let relays = MemoryRelayPool::new();
        relays.set_latency(&relay("a"), Duration::from_millis(30));
        relays.insert(&relay("a"), ListEventBuilder::new(pubkey(1), "one").build());
        relays.insert(&relay("a"), ListEventBuilder::new(pubkey(1), "two").build());
        let (pool, _) = pool_over(&relays);

        let slot: Arc<Mutex<Option<Arc<MultiRelayRequest>>>> = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler_slot = slot.clone();
        let request = MultiRelayRequest::open(
            &pool,
            &[relay("a")],
            Filter::people_lists(pubkey(1)),
            move |event| {
                let _ = tx.send(event);
                if let Some(request) = handler_slot.lock().as_ref() {
                    request.close();
                }
            },
        )
        .unwrap();
        let request = Arc::new(request);
        *slot.lock() = Some(request.clone());

        assert!(recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await.is_ok());
        assert_eq!(
            assert_completes_within(DEFAULT_TEST_TIMEOUT, request.wait_drained()).await,
            RequestStatus::Closed
        );
        assert!(try_drain(&mut rx).is_empty());
        slot.lock().take();
    }

    #[tokio::test]
    async fn test_empty_relay_set_is_drained_immediately() {
        let relays = MemoryRelayPool::new();
        let (pool, _) = pool_over(&relays);
        let (handler, _rx) = collector();

        let request =
            MultiRelayRequest::open(&pool, &[], Filter::people_lists(pubkey(1)), handler).unwrap();
        assert_eq!(request.status().get(), RequestStatus::Drained);
        assert!(request.relays().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_relays_are_queried_once() {
        let relays = MemoryRelayPool::new();
        relays.add_relay(&relay("a"));
        let (pool, _) = pool_over(&relays);
        let (handler, _rx) = collector();

        let request = MultiRelayRequest::open(
            &pool,
            &[relay("a"), relay("a")],
            Filter::people_lists(pubkey(1)),
            handler,
        )
        .unwrap();
        request.wait_drained().await;

        assert_eq!(request.relays(), &[relay("a")]);
        assert_eq!(relays.subscription_count(&relay("a")), 1);
    }

    #[test]
    fn test_open_outside_runtime_fails() {
        let relays = MemoryRelayPool::new();
        let (pool, _) = pool_over(&relays);
        let (handler, _rx) = collector();

        let result = MultiRelayRequest::open(&pool, &[relay("a")], Filter::new(), handler);
        assert!(matches!(result, Err(SyncError::NoRuntime)));
    }
}
