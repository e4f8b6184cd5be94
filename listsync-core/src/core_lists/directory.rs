/*
    directory.rs - Lists directory service

    Per owner the directory keeps one StateCell<ListMap>: the owner's lists
    keyed by name, published as copy-on-write snapshots.

    fetch(owner, relays):
    1. parse the owner key (InvalidIdentity before anything else happens)
    2. request already in flight -> hand back the existing cell
    3. otherwise reuse or create the cell, open one MultiRelayRequest for the
       owner's people lists, and route every event it delivers (a new cell is
       only registered once the request opened):
       - offer it to the EventCache
       - drop it unless it is a people list with a name (d tag)
       - known name: apply_event, and republish the same snapshot if applied
       - new name: insert into a copy of the map and publish the copy

    The in-flight mark is cleared when the owner's request drains or closes.
    After that a forced refetch replaces (and closes) the previous request, so
    an owner never has more than one open request. While both are briefly
    open their routers share one per-owner lock, so an owner's map is still
    updated one event at a time.

    Lock order: in_flight before owners. No lock is held while a request is
    closed or while observers run.
*/

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::address::ListAddress;
use super::cache::EventCache;
use super::errors::{ListsError, ListsResult};
use super::list::{ApplyOutcome, PeopleList};
use crate::core_event::{Event, Filter, Kind, PublicKey, RelayUrl};
use crate::core_relay::{
    PoolOptions, RelayConnector, RelayPool, RelayRanking, RelayScoreboard, SeenOnRelays,
};
use crate::core_state::{StateCell, Subscription};
use crate::core_sync::{MultiRelayRequest, RequestStatus};
use crate::metrics;

/// An owner's lists by name; replaced wholesale when a list is added
pub type ListMap = Arc<BTreeMap<String, Arc<PeopleList>>>;

/// Where an owner stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerStatus {
    NotRequested,
    /// A request is open and has not drained; lists may already be present
    Fetching,
    /// The last request drained or was closed
    Populated,
}

struct OwnerRequest {
    request: MultiRelayRequest,
    // Shared with the router of the request that replaces this one
    route_lock: Arc<Mutex<()>>,
    _drain_watch: Subscription,
}

struct DirectoryInner {
    pool: RelayPool,
    ranking: Arc<dyn RelayRanking>,
    cache: Arc<dyn EventCache>,
    owners: Mutex<HashMap<PublicKey, StateCell<ListMap>>>,
    // owner -> id of the request still loading for it
    in_flight: Mutex<HashMap<PublicKey, u64>>,
    requests: Mutex<HashMap<PublicKey, OwnerRequest>>,
}

/// People lists per owner, fetched from relays and kept convergent
#[derive(Clone)]
pub struct ListsDirectory {
    inner: Arc<DirectoryInner>,
}

impl ListsDirectory {
    pub fn new(pool: RelayPool, ranking: Arc<dyn RelayRanking>, cache: Arc<dyn EventCache>) -> Self {
        ListsDirectory {
            inner: Arc::new(DirectoryInner {
                pool,
                ranking,
                cache,
                owners: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Directory whose pool reports into, and ranks with, a fresh scoreboard
    pub fn with_scoreboard(
        connector: Arc<dyn RelayConnector>,
        options: PoolOptions,
        cache: Arc<dyn EventCache>,
    ) -> Self {
        let scoreboard = Arc::new(RelayScoreboard::new());
        let pool = RelayPool::with_scoreboard(connector, scoreboard.clone(), options);
        Self::new(pool, scoreboard, cache)
    }

    pub fn pool(&self) -> &RelayPool {
        &self.inner.pool
    }

    /// Start (or join) a fetch of `owner`'s lists from `relays`
    pub fn fetch(&self, owner: &str, relays: &[RelayUrl]) -> ListsResult<StateCell<ListMap>> {
        let owner = parse_owner(owner)?;

        let mut in_flight = self.inner.in_flight.lock();
        if let Some(request) = in_flight.get(&owner) {
            debug!(owner = %owner, request, "joining list fetch already in flight");
            metrics::fetch_coalesced();
            if let Some(cell) = self.inner.owners.lock().get(&owner) {
                return Ok(cell.clone());
            }
        }

        let existing = self.inner.owners.lock().get(&owner).cloned();
        let registered = existing.is_some();
        let cell = existing.unwrap_or_else(|| StateCell::new(ListMap::default()));
        let route_lock = self
            .inner
            .requests
            .lock()
            .get(&owner)
            .map(|previous| previous.route_lock.clone())
            .unwrap_or_default();
        let router = ListRouter {
            owner,
            cell: cell.clone(),
            cache: self.inner.cache.clone(),
            seen: self.inner.pool.seen.clone(),
            serial: route_lock.clone(),
        };
        let request = MultiRelayRequest::open(
            &self.inner.pool,
            relays,
            Filter::people_lists(owner),
            move |event| router.route(event),
        )?;
        if !registered {
            self.register_owner(owner, cell.clone());
        }

        info!(owner = %owner, request = request.id(), relays = request.relays().len(), "fetching people lists");
        let id = request.id();
        in_flight.insert(owner, id);
        drop(in_flight);

        let drain_watch = request.status().subscribe(clear_in_flight(
            Arc::downgrade(&self.inner),
            owner,
            id,
        ));
        let previous = self.inner.requests.lock().insert(
            owner,
            OwnerRequest {
                request,
                route_lock,
                _drain_watch: drain_watch,
            },
        );
        drop(previous);

        Ok(cell)
    }

    /// The owner's cell if one exists and no refetch is forced, else [`fetch`](Self::fetch)
    ///
    /// A forced refetch still joins a request that is in flight.
    pub fn get_or_fetch(
        &self,
        owner: &str,
        relays: &[RelayUrl],
        force_refetch: bool,
    ) -> ListsResult<StateCell<ListMap>> {
        if !force_refetch {
            if let Some(cell) = self.lookup(owner)? {
                return Ok(cell);
            }
        }
        self.fetch(owner, relays)
    }

    /// Cell for `owner` without fetching; `None` until the first fetch
    pub fn lookup(&self, owner: &str) -> ListsResult<Option<StateCell<ListMap>>> {
        let owner = parse_owner(owner)?;
        Ok(self.inner.owners.lock().get(&owner).cloned())
    }

    pub fn status(&self, owner: &str) -> ListsResult<OwnerStatus> {
        let owner = parse_owner(owner)?;
        if self.inner.in_flight.lock().contains_key(&owner) {
            return Ok(OwnerStatus::Fetching);
        }
        if self.inner.owners.lock().contains_key(&owner) {
            return Ok(OwnerStatus::Populated);
        }
        Ok(OwnerStatus::NotRequested)
    }

    /// Status of the owner's current request, if one was opened
    pub fn request_status(&self, owner: &str) -> ListsResult<Option<StateCell<RequestStatus>>> {
        let owner = parse_owner(owner)?;
        Ok(self
            .inner
            .requests
            .lock()
            .get(&owner)
            .map(|entry| entry.request.status()))
    }

    /// Close the owner's request; its lists stay available
    ///
    /// Returns false if the owner had no request.
    pub fn close_owner(&self, owner: &str) -> ListsResult<bool> {
        let owner = parse_owner(owner)?;
        let entry = self.inner.requests.lock().remove(&owner);
        match entry {
            Some(entry) => {
                entry.request.close();
                info!(owner = %owner, "closed list request");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every open request
    pub fn shutdown(&self) {
        let entries: Vec<(PublicKey, OwnerRequest)> = self.inner.requests.lock().drain().collect();
        let count = entries.len();
        for (_, entry) in entries {
            entry.request.close();
        }
        info!(requests = count, "lists directory shut down");
    }

    /// Shareable address of `list`, pointing at the best relay that served it
    pub fn address(&self, list: &PeopleList) -> ListAddress {
        list.address(self.inner.ranking.as_ref(), &self.inner.pool.seen)
    }

    /// Owners with a cell
    pub fn owners(&self) -> Vec<PublicKey> {
        let mut owners: Vec<PublicKey> = self.inner.owners.lock().keys().copied().collect();
        owners.sort();
        owners
    }

    fn register_owner(&self, owner: PublicKey, cell: StateCell<ListMap>) {
        let mut owners = self.inner.owners.lock();
        owners.insert(owner, cell);
        metrics::set_tracked_owners(owners.len());
    }
}

impl std::fmt::Debug for ListsDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListsDirectory")
            .field("owners", &self.inner.owners.lock().len())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .field("requests", &self.inner.requests.lock().len())
            .finish()
    }
}

fn parse_owner(owner: &str) -> ListsResult<PublicKey> {
    PublicKey::parse(owner).map_err(ListsError::InvalidIdentity)
}

fn clear_in_flight(
    inner: Weak<DirectoryInner>,
    owner: PublicKey,
    request: u64,
) -> impl Fn(&RequestStatus) + Send + Sync + 'static {
    move |status| {
        if status.is_loading() {
            return;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut in_flight = inner.in_flight.lock();
        if in_flight.get(&owner) == Some(&request) {
            in_flight.remove(&owner);
            debug!(owner = %owner, request, status = ?status, "list fetch settled");
        }
    }
}

/// Routes one owner's events into that owner's map
///
/// Runs on the dispatcher of the owner's request. `serial` is shared with
/// any earlier request of the same owner still delivering, so updates for an
/// owner are applied one at a time.
struct ListRouter {
    owner: PublicKey,
    cell: StateCell<ListMap>,
    cache: Arc<dyn EventCache>,
    seen: Arc<SeenOnRelays>,
    serial: Arc<Mutex<()>>,
}

impl ListRouter {
    fn route(&self, event: Event) {
        self.cache.handle_event(&event);
        let _serial = self.serial.lock();

        if event.kind != Kind::PEOPLE_LIST {
            debug!(owner = %self.owner, event = %event.id, kind = %event.kind, "ignoring event of another kind");
            metrics::list_event_malformed();
            return;
        }
        let Some(name) = event.list_name().map(str::to_owned) else {
            debug!(owner = %self.owner, event = %event.id, "dropping list event without a name");
            metrics::list_event_malformed();
            return;
        };

        let snapshot = self.cell.get();
        if let Some(list) = snapshot.get(&name) {
            let (id, created_at) = (event.id, event.created_at);
            let current_id = list.event().id;
            match list.apply_event(event) {
                ApplyOutcome::Applied => {
                    debug!(owner = %self.owner, list = %name, event = %id, created_at = %created_at, "list updated");
                    self.seen.forget(&current_id);
                    metrics::list_updated();
                    // Same map, new list contents
                    self.cell.notify();
                }
                ApplyOutcome::Stale => {
                    debug!(owner = %self.owner, list = %name, event = %id, created_at = %created_at, "ignoring stale list event");
                    if id != current_id {
                        self.seen.forget(&id);
                    }
                    metrics::list_event_stale();
                }
                ApplyOutcome::Foreign => {
                    debug!(owner = %self.owner, list = %name, event = %id, "ignoring event for another coordinate");
                    metrics::list_event_malformed();
                }
            }
            return;
        }

        match PeopleList::new(event) {
            Ok(list) => {
                debug!(owner = %self.owner, list = %name, "list discovered");
                let mut next = BTreeMap::clone(&snapshot);
                next.insert(name, Arc::new(list));
                self.cell.set(Arc::new(next));
                metrics::list_created();
            }
            Err(err) => {
                debug!(owner = %self.owner, list = %name, error = %err, "dropping list event");
                metrics::list_event_malformed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_lists::NoopEventCache;
    use crate::core_relay::MemoryRelayPool;
    use crate::test_utils::*;
    use std::thread;

    fn router(cell: &StateCell<ListMap>, serial: &Arc<Mutex<()>>) -> ListRouter {
        ListRouter {
            owner: pubkey(1),
            cell: cell.clone(),
            cache: Arc::new(NoopEventCache),
            seen: Arc::new(SeenOnRelays::new()),
            serial: serial.clone(),
        }
    }

    #[test]
    fn test_routers_sharing_a_lock_keep_every_insert() {
        let cell = StateCell::new(ListMap::default());
        let serial = Arc::new(Mutex::new(()));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let router = router(&cell, &serial);
                thread::spawn(move || {
                    for i in 0..50 {
                        let name = format!("list-{}-{}", worker, i);
                        router.route(ListEventBuilder::new(pubkey(1), &name).build());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(cell.get().len(), 200);
    }

    #[tokio::test]
    async fn test_forced_refetch_shares_route_lock_with_previous_request() {
        let relays = MemoryRelayPool::new();
        let s1 = relay("s1");
        relays.add_relay(&s1);
        let directory = ListsDirectory::with_scoreboard(
            Arc::new(relays.clone()),
            PoolOptions::default(),
            Arc::new(NoopEventCache),
        );
        let owner = pubkey(1).to_hex();
        let route_lock = |directory: &ListsDirectory| {
            directory.inner.requests.lock()[&pubkey(1)].route_lock.clone()
        };

        directory.fetch(&owner, &[s1.clone()]).unwrap();
        let status = directory.request_status(&owner).unwrap().unwrap();
        wait_for_state(&status, DEFAULT_TEST_TIMEOUT, |s| !s.is_loading()).await;
        let first = route_lock(&directory);

        directory.get_or_fetch(&owner, &[s1.clone()], true).unwrap();
        assert!(Arc::ptr_eq(&first, &route_lock(&directory)));

        directory.close_owner(&owner).unwrap();
        directory.fetch(&owner, &[s1]).unwrap();
        assert!(!Arc::ptr_eq(&first, &route_lock(&directory)));
    }
}
