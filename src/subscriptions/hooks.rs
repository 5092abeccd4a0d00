//! Registrable callbacks around the pull cycle.
//!
//! ```text
//! first document ─► before_batch
//! ack sent        ─► before_acknowledgment ─► [acknowledge] ─► after_acknowledgment(etag)
//!                 ─► after_batch(count)
//! ```
//!
//! Hooks run on the worker thread. Each invocation iterates a snapshot, so
//! hooks may be added or removed concurrently (even from inside a hook).
//! A panicking hook stops the remaining hooks of that list and is reported
//! to the caller as a [`HookPanic`].

use crate::error::panic_message;
use crate::types::Etag;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a registered hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

type Notify = dyn Fn() + Send + Sync;
type BatchDone = dyn Fn(usize) + Send + Sync;
type Acknowledged = dyn Fn(Etag) + Send + Sync;

struct HookList<F: ?Sized> {
    entries: RwLock<Vec<(HookId, Arc<F>)>>,
}

impl<F: ?Sized> HookList<F> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, id: HookId, hook: Arc<F>) -> HookId {
        self.entries.write().push((id, hook));
        id
    }

    fn remove(&self, id: HookId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries.read().iter().map(|(_, h)| Arc::clone(h)).collect()
    }
}

/// A hook panicked while running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HookPanic {
    pub(crate) hook: &'static str,
    pub(crate) message: String,
}

fn run_all<F: ?Sized>(
    hook: &'static str,
    list: &HookList<F>,
    call: impl Fn(&F),
) -> Result<(), HookPanic> {
    for entry in list.snapshot() {
        catch_unwind(AssertUnwindSafe(|| call(&*entry))).map_err(|panic| HookPanic {
            hook,
            message: panic_message(&*panic),
        })?;
    }
    Ok(())
}

/// The four hook lists of a connection.
pub struct EventHooks {
    next_id: AtomicU64,
    before_batch: HookList<Notify>,
    after_batch: HookList<BatchDone>,
    before_acknowledgment: HookList<Notify>,
    after_acknowledgment: HookList<Acknowledged>,
}

impl EventHooks {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            before_batch: HookList::new(),
            after_batch: HookList::new(),
            before_acknowledgment: HookList::new(),
            after_acknowledgment: HookList::new(),
        }
    }

    fn next_id(&self) -> HookId {
        HookId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Called once per batch, just before its first document is delivered.
    pub fn add_before_batch(&self, hook: impl Fn() + Send + Sync + 'static) -> HookId {
        self.before_batch.add(self.next_id(), Arc::new(hook))
    }

    pub fn remove_before_batch(&self, id: HookId) -> bool {
        self.before_batch.remove(id)
    }

    /// Called after a batch was acknowledged, with the number of documents delivered.
    pub fn add_after_batch(&self, hook: impl Fn(usize) + Send + Sync + 'static) -> HookId {
        self.after_batch.add(self.next_id(), Arc::new(hook))
    }

    pub fn remove_after_batch(&self, id: HookId) -> bool {
        self.after_batch.remove(id)
    }

    pub fn add_before_acknowledgment(&self, hook: impl Fn() + Send + Sync + 'static) -> HookId {
        self.before_acknowledgment.add(self.next_id(), Arc::new(hook))
    }

    pub fn remove_before_acknowledgment(&self, id: HookId) -> bool {
        self.before_acknowledgment.remove(id)
    }

    /// Called with the etag the server accepted.
    pub fn add_after_acknowledgment(
        &self,
        hook: impl Fn(Etag) + Send + Sync + 'static,
    ) -> HookId {
        self.after_acknowledgment.add(self.next_id(), Arc::new(hook))
    }

    pub fn remove_after_acknowledgment(&self, id: HookId) -> bool {
        self.after_acknowledgment.remove(id)
    }

    pub(crate) fn fire_before_batch(&self) -> Result<(), HookPanic> {
        run_all("before_batch", &self.before_batch, |hook| hook())
    }

    pub(crate) fn fire_after_batch(&self, delivered: usize) -> Result<(), HookPanic> {
        run_all("after_batch", &self.after_batch, |hook| hook(delivered))
    }

    pub(crate) fn fire_before_acknowledgment(&self) -> Result<(), HookPanic> {
        run_all("before_acknowledgment", &self.before_acknowledgment, |hook| {
            hook()
        })
    }

    pub(crate) fn fire_after_acknowledgment(&self, etag: Etag) -> Result<(), HookPanic> {
        run_all("after_acknowledgment", &self.after_acknowledgment, |hook| {
            hook(etag)
        })
    }
}

impl Default for EventHooks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let hooks = EventHooks::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            hooks.add_after_batch(move |n| seen.lock().push(format!("{label}:{n}")));
        }

        hooks.fire_after_batch(3).unwrap();
        assert_eq!(*seen.lock(), vec!["first:3", "second:3"]);
    }

    #[test]
    fn test_removed_hook_is_not_called() {
        let hooks = EventHooks::new();
        let calls = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&calls);
        let id = hooks.add_before_batch(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        hooks.fire_before_batch().unwrap();
        assert!(hooks.remove_before_batch(id));
        assert!(!hooks.remove_before_batch(id));
        hooks.fire_before_batch().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ids_are_not_shared_across_lists() {
        let hooks = EventHooks::new();
        let a = hooks.add_before_acknowledgment(|| {});
        let b = hooks.add_after_acknowledgment(|_| {});
        assert_ne!(a, b);
        assert!(!hooks.remove_before_acknowledgment(b));
        assert!(hooks.remove_after_acknowledgment(b));
    }

    #[test]
    fn test_hook_may_register_another_hook() {
        let hooks = Arc::new(EventHooks::new());
        let inner = Arc::clone(&hooks);
        hooks.add_before_batch(move || {
            inner.add_before_batch(|| {});
        });

        hooks.fire_before_batch().unwrap();
        assert_eq!(hooks.before_batch.snapshot().len(), 2);
    }

    #[test]
    fn test_panicking_hook_is_reported() {
        let hooks = EventHooks::new();
        let after = Arc::new(AtomicU64::new(0));

        hooks.add_before_batch(|| panic!("hook exploded"));
        let c = Arc::clone(&after);
        hooks.add_before_batch(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let failure = hooks.fire_before_batch().unwrap_err();
        assert_eq!(failure.hook, "before_batch");
        assert_eq!(failure.message, "hook exploded");
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }
}
