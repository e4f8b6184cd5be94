/*
    cell.rs - Replay-latest observable value

    A StateCell holds exactly one value. New observers get the current value
    immediately on subscribe; every `set` is pushed synchronously to all
    observers registered at that moment. Nothing is buffered: an observer only
    ever sees the latest value.

    Clones of a StateCell share the same value and observers. Async consumers
    can use `watch()` instead of callbacks; a watcher is woken only after the
    synchronous observers of that `set` have returned.

    Observers run outside the value and registry locks, so an observer may call
    `get`, `subscribe`, or drop its own Subscription. An observer may also call
    `set` on the same cell: the nested value is delivered to every observer and
    the outer delivery stops there, so no observer ends on the older value.
*/

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: RwLock<T>,
    observers: Mutex<Vec<(u64, Observer<T>)>>,
    next_id: AtomicU64,
    // Bumped by every set(); a delivery stops once it is no longer current
    generation: AtomicU64,
    // Serializes set() so observers see values in the order they were set
    publish: ReentrantMutex<()>,
    watch_tx: watch::Sender<T>,
}

/// Shared, observable single value
pub struct StateCell<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> {
    pub fn new(value: T) -> Self {
        let (watch_tx, _) = watch::channel(value.clone());
        StateCell {
            inner: Arc::new(Inner {
                value: RwLock::new(value),
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                publish: ReentrantMutex::new(()),
                watch_tx,
            }),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Replace the value and notify every current observer before returning
    pub fn set(&self, value: T) {
        let _publishing = self.inner.publish.lock();

        *self.inner.value.write() = value.clone();
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let observers: Vec<Observer<T>> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            if self.inner.generation.load(Ordering::Acquire) != generation {
                // A nested set() already delivered a newer value to everyone
                return;
            }
            observer(&value);
        }

        // Watchers wake after synchronous observers ran. An observer may have
        // set a newer value, so publish whatever is current now.
        self.inner.watch_tx.send_replace(self.get());
    }

    /// Re-deliver the current value to every observer
    ///
    /// Used when the value is a shared reference whose contents changed in
    /// place.
    pub fn notify(&self) {
        self.set(self.get());
    }

    /// Register `observer`; it is called immediately with the current value
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let observer: Observer<T> = Arc::new(observer);

        // Hold the publish lock so a concurrent set() cannot slip between the
        // replay and the registration.
        let _publishing = self.inner.publish.lock();
        self.inner.observers.lock().push((id, observer.clone()));

        let current = self.get();
        observer(&current);

        let weak: Weak<dyn Unsubscribe> = Arc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Subscription {
            id,
            cell: Some(weak),
        }
    }

    /// Receiver that always holds the latest value
    pub fn watch(&self) -> watch::Receiver<T> {
        self.inner.watch_tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Whether two handles refer to the same cell
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        StateCell {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for StateCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for StateCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("value", &*self.inner.value.read())
            .field("observers", &self.inner.observers.lock().len())
            .finish()
    }
}

trait Unsubscribe: Send + Sync {
    fn remove(&self, id: u64);
}

impl<T: Send + Sync> Unsubscribe for Inner<T> {
    fn remove(&self, id: u64) {
        self.observers.lock().retain(|(observer_id, _)| *observer_id != id);
    }
}

/// Keeps an observer registered; dropping it unsubscribes
#[must_use = "dropping a Subscription immediately unsubscribes the observer"]
pub struct Subscription {
    id: u64,
    cell: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(inner) = self.cell.take().and_then(|weak| weak.upgrade()) {
            inner.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.cell.is_some())
            .finish()
    }
}
