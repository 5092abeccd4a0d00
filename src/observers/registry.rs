//! Thread-safe set of active observers.

use super::observer::Observer;
use crate::signal::{Signal, Wait};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

struct Entry<T> {
    id: ObserverId,
    observer: Arc<dyn Observer<T>>,
}

/// Ordered set of distinct observers.
///
/// The registry owns the manual-reset "has observers" signal: adding the first
/// observer sets it, removing the last one resets it. Both happen under the
/// registry's write lock so the signal always matches the set.
pub struct ObserverRegistry<T> {
    entries: RwLock<Vec<Entry<T>>>,
    next_id: AtomicU64,
    any_observer: Signal,
}

impl<T> ObserverRegistry<T> {
    pub fn new(any_observer: Signal) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            any_observer,
        }
    }

    /// Register an observer. Registering the same observer twice returns the
    /// existing id.
    pub fn add(&self, observer: Arc<dyn Observer<T>>) -> ObserverId {
        let mut entries = self.entries.write();
        let ptr = Arc::as_ptr(&observer) as *const ();
        if let Some(existing) = entries
            .iter()
            .find(|e| Arc::as_ptr(&e.observer) as *const () == ptr)
        {
            return existing.id;
        }

        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        entries.push(Entry { id, observer });
        if entries.len() == 1 {
            self.any_observer.set();
        }
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.any_observer.reset();
        }
        removed
    }

    /// Remove every observer, returning them in registration order.
    pub fn clear(&self) -> Vec<Arc<dyn Observer<T>>> {
        let mut entries = self.entries.write();
        self.any_observer.reset();
        entries.drain(..).map(|e| e.observer).collect()
    }

    /// Observers in registration order, detached from the lock.
    pub fn snapshot(&self) -> Vec<Arc<dyn Observer<T>>> {
        self.entries
            .read()
            .iter()
            .map(|e| Arc::clone(&e.observer))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Block until at least one observer is registered.
    pub fn wait_for_any(&self) -> Wait {
        self.any_observer.wait()
    }
}

/// Handle returned by `subscribe`; removes the observer when asked to.
pub struct Unsubscriber<T> {
    registry: Weak<ObserverRegistry<T>>,
    id: ObserverId,
}

impl<T> Unsubscriber<T> {
    pub(crate) fn new(registry: &Arc<ObserverRegistry<T>>, id: ObserverId) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            id,
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Remove the observer. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}
