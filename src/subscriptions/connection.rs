//! Subscription connection lifecycle.
//!
//! ```text
//! Opening ──open ok──────────────────────────────► Pulling ◄──┐
//!    │                                               │   │    │ transient failure:
//!    └─in use + WaitForFree─► WaitingForRelease ─────┘   │    │ sleep, reopen, new PullLoop
//!                              (released + reopened)     ├────┘
//!                                                        ├─ observer failure ─► ErroredBySubscriber ─► close
//!                                                        └─ taken over / deleted / released ─► Closed
//! ```
//!
//! One dedicated worker thread runs successive [`PullLoop`] generations.
//! Restarts happen inside that thread, so `close()` only ever has a single
//! handle to join.

use super::hooks::EventHooks;
use super::materialize::{Materialize, RawDocuments, Typed};
use super::options::{OpeningStrategy, SubscriptionOptions};
use super::pull::{LoopError, LoopExit, PullLoop};
use super::stats::{StatsSnapshot, SubscriptionStats};
use crate::changes::{ChangesFeed, SubscriptionChange, Watch};
use crate::error::{RemoteError, Result, SharedObserverError, SubscriptionError};
use crate::observers::{Observer, ObserverRegistry, Unsubscriber};
use crate::policy::{Disposition, ReconnectPolicy};
use crate::remote::RemoteSubscriptions;
use crate::signal::{Cancellation, Signal};
use crate::types::{ConnectionId, SubscriptionId};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Lifecycle of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    WaitingForRelease,
    Pulling,
    ErroredBySubscriber,
    Closed,
}

struct Status {
    state: ConnectionState,
    errored_by_subscriber: bool,
    last_subscriber_error: Option<SharedObserverError>,
    last_connection_error: Option<RemoteError>,
    /// Whether the server-side slot is (possibly) held by this connection.
    holds_slot: bool,
}

/// State shared between the owning handle and the worker thread.
pub(crate) struct Shared<M: Materialize> {
    pub(crate) id: SubscriptionId,
    pub(crate) options: SubscriptionOptions,
    pub(crate) remote: Arc<dyn RemoteSubscriptions>,
    changes: Arc<dyn ChangesFeed>,
    pub(crate) materializer: M,
    pub(crate) observers: Arc<ObserverRegistry<M::Item>>,
    pub(crate) new_documents: Signal,
    pub(crate) cancel: Cancellation,
    pub(crate) hooks: EventHooks,
    pub(crate) stats: SubscriptionStats,
    policy: ReconnectPolicy,
    status: Mutex<Status>,
    disposed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    store_watch: Mutex<Option<Watch>>,
    release_watch: Mutex<Option<Watch>>,
}

impl<M: Materialize> Shared<M> {
    pub(crate) fn connection_id(&self) -> &ConnectionId {
        &self.options.connection_id
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.lock().state = state;
    }

    /// Claim the slot. A claim that lands after shutdown is handed back at once.
    fn ensure_open(&self) -> std::result::Result<(), RemoteError> {
        self.remote.open(
            self.id,
            self.connection_id(),
            self.options.strategy,
            &self.options.batch,
        )?;
        let disposed = {
            let mut status = self.status.lock();
            status.holds_slot = true;
            self.disposed.load(Ordering::SeqCst)
        };
        if disposed {
            debug!(subscription = %self.id, "slot claimed after close, releasing it");
            self.release_slot();
        }
        Ok(())
    }

    /// Send the close request if this connection holds the slot. Sent at most once per claim.
    fn release_slot(&self) {
        let held = std::mem::replace(&mut self.status.lock().holds_slot, false);
        if !held {
            return;
        }
        if let Err(error) = self.remote.close(self.id, self.connection_id()) {
            warn!(subscription = %self.id, error = %error, "failed to close subscription on server");
        }
    }

    pub(crate) fn record_subscriber_error(&self, error: SharedObserverError) {
        let mut status = self.status.lock();
        status.errored_by_subscriber = true;
        status.last_subscriber_error = Some(error);
    }

    /// Start watching for new documents and spawn the worker.
    fn start(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock();
        if self.disposed.load(Ordering::SeqCst) || worker.is_some() {
            return Ok(());
        }

        let new_documents = self.new_documents.clone();
        let prefix = self.options.system_key_prefix.clone();
        let watch = self.changes.watch_store(Box::new(move |change| {
            if change.signals_new_documents(&prefix) {
                new_documents.set();
            }
        }))?;
        *self.store_watch.lock() = Some(watch);

        self.set_state(ConnectionState::Pulling);
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("subscription-{}", self.id))
            .spawn(move || shared.run_worker())?;
        *worker = Some(handle);

        info!(subscription = %self.id, connection = %self.connection_id(), "subscription pulling");
        Ok(())
    }

    /// Park until the current holder releases the subscription.
    fn wait_for_release(self: &Arc<Self>) -> Result<()> {
        self.set_state(ConnectionState::WaitingForRelease);
        info!(subscription = %self.id, "subscription in use, waiting for release");

        let weak = Arc::downgrade(self);
        let watch = self.changes.watch_subscription(
            self.id,
            Box::new(move |change| {
                if *change != SubscriptionChange::Released {
                    return;
                }
                if let Some(shared) = weak.upgrade() {
                    shared.on_released();
                }
            }),
        )?;

        // The release may already have been handled while registering.
        let mut slot = self.release_watch.lock();
        if self.status.lock().state == ConnectionState::WaitingForRelease
            && !self.disposed.load(Ordering::SeqCst)
        {
            *slot = Some(watch);
        }
        Ok(())
    }

    fn on_released(self: &Arc<Self>) {
        {
            let mut status = self.status.lock();
            if status.state != ConnectionState::WaitingForRelease
                || self.disposed.load(Ordering::SeqCst)
            {
                return;
            }
            status.state = ConnectionState::Opening;
        }

        if let Err(error) = self.ensure_open() {
            debug!(subscription = %self.id, error = %error, "subscription still held elsewhere");
            let mut status = self.status.lock();
            if !self.disposed.load(Ordering::SeqCst) {
                status.state = ConnectionState::WaitingForRelease;
            }
            return;
        }

        if let Some(watch) = self.release_watch.lock().take() {
            watch.release();
        }
        if let Err(error) = self.start() {
            warn!(subscription = %self.id, error = %error, "failed to start pulling after release");
            self.shutdown();
        }
    }

    fn run_worker(self: Arc<Self>) {
        let mut generation = 0u64;
        loop {
            generation += 1;
            self.status.lock().last_connection_error = None;
            debug!(subscription = %self.id, generation, "pull loop starting");

            match PullLoop::new(&self).run() {
                Ok(LoopExit::Cancelled) => return,
                Ok(LoopExit::ErroredBySubscriber) => {
                    warn!(subscription = %self.id, "closing subscription after subscriber error");
                    self.set_state(ConnectionState::ErroredBySubscriber);
                    self.shutdown();
                    return;
                }
                Err(failure) => {
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    match failure {
                        LoopError::Remote(error) => {
                            if self.handle_rejection(&error) {
                                return;
                            }
                            warn!(subscription = %self.id, error = %error, "pull loop failed, reconnecting");
                        }
                        LoopError::Hook(panic) => {
                            warn!(
                                subscription = %self.id,
                                hook = panic.hook,
                                error = %panic.message,
                                "event hook panicked, reconnecting"
                            );
                        }
                    }
                    if !self.reconnect() {
                        return;
                    }
                    self.stats.record_reconnect();
                }
            }
        }
    }

    /// Record `error` and close if it is terminal. Returns true when closed.
    fn handle_rejection(&self, error: &RemoteError) -> bool {
        self.status.lock().last_connection_error = Some(error.clone());
        match self.policy.classify(error) {
            Disposition::Transient => false,
            Disposition::Terminal => {
                warn!(subscription = %self.id, error = %error, "subscription rejected by server");
                self.status.lock().holds_slot = false;
                self.shutdown();
                true
            }
        }
    }

    /// Retry opening until it succeeds. Returns false if cancelled or rejected.
    fn reconnect(&self) -> bool {
        loop {
            if !self.cancel.sleep(self.policy.retry_delay) {
                return false;
            }
            match self.ensure_open() {
                Ok(()) => {
                    info!(subscription = %self.id, "subscription reopened");
                    return true;
                }
                Err(error) => {
                    if self.handle_rejection(&error) {
                        return false;
                    }
                    debug!(subscription = %self.id, error = %error, "reopen failed, will retry");
                }
            }
        }
    }

    /// Wait for the worker to exit, unless called from the worker itself.
    fn join_worker(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            match worker.as_ref() {
                Some(h) if h.thread().id() == thread::current().id() => return,
                _ => worker.take(),
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(subscription = %self.id, "pull worker panicked");
            }
        }
    }

    /// Close sequence. Runs once; later calls only wait for the worker.
    fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            self.join_worker();
            return;
        }
        info!(subscription = %self.id, connection = %self.connection_id(), "closing subscription");

        self.cancel.cancel();
        if let Some(watch) = self.store_watch.lock().take() {
            watch.release();
        }
        if let Some(watch) = self.release_watch.lock().take() {
            watch.release();
        }
        self.join_worker();

        for observer in self.observers.clear() {
            if catch_unwind(AssertUnwindSafe(|| observer.on_completed())).is_err() {
                warn!(subscription = %self.id, "observer panicked in on_completed");
            }
        }

        self.release_slot();

        let mut status = self.status.lock();
        if status.state != ConnectionState::ErroredBySubscriber {
            status.state = ConnectionState::Closed;
        }
    }
}

/// A client connection to one server-side subscription.
///
/// Delivers `M::Item`s to registered observers from a dedicated worker
/// thread. Dropping the connection closes it.
pub struct SubscriptionConnection<M: Materialize = RawDocuments> {
    shared: Arc<Shared<M>>,
}

impl SubscriptionConnection<RawDocuments> {
    /// Open a connection delivering raw documents.
    pub fn open(
        id: SubscriptionId,
        options: SubscriptionOptions,
        remote: Arc<dyn RemoteSubscriptions>,
        changes: Arc<dyn ChangesFeed>,
    ) -> Result<Self> {
        Self::open_with(id, options, remote, changes, RawDocuments)
    }
}

impl<T> SubscriptionConnection<Typed<T>>
where
    Typed<T>: Materialize,
{
    /// Open a connection delivering documents deserialized into `T`.
    pub fn open_typed(
        id: SubscriptionId,
        options: SubscriptionOptions,
        remote: Arc<dyn RemoteSubscriptions>,
        changes: Arc<dyn ChangesFeed>,
    ) -> Result<Self> {
        Self::open_with(id, options, remote, changes, Typed::new())
    }
}

impl<M: Materialize> SubscriptionConnection<M> {
    /// Open a connection with an explicit materialization strategy.
    ///
    /// Claims the subscription on the server and starts pulling. With
    /// [`OpeningStrategy::WaitForFree`], a subscription held elsewhere puts
    /// the connection in [`ConnectionState::WaitingForRelease`] instead of
    /// failing.
    pub fn open_with(
        id: SubscriptionId,
        options: SubscriptionOptions,
        remote: Arc<dyn RemoteSubscriptions>,
        changes: Arc<dyn ChangesFeed>,
        materializer: M,
    ) -> Result<Self> {
        options.validate()?;

        let cancel = Cancellation::new();
        let policy = ReconnectPolicy::new(options.retry_delay);
        let shared = Arc::new(Shared {
            id,
            remote,
            changes,
            materializer,
            observers: Arc::new(ObserverRegistry::new(Signal::manual_reset(&cancel))),
            new_documents: Signal::auto_reset(&cancel),
            cancel,
            hooks: EventHooks::new(),
            stats: SubscriptionStats::default(),
            policy,
            status: Mutex::new(Status {
                state: ConnectionState::Opening,
                errored_by_subscriber: false,
                last_subscriber_error: None,
                last_connection_error: None,
                holds_slot: false,
            }),
            disposed: AtomicBool::new(false),
            worker: Mutex::new(None),
            store_watch: Mutex::new(None),
            release_watch: Mutex::new(None),
            options,
        });
        debug!(subscription = %id, connection = %shared.connection_id(), "opening subscription");

        let started = match shared.ensure_open() {
            Ok(()) => shared.start(),
            Err(error @ RemoteError::InUse(_))
                if shared.options.strategy == OpeningStrategy::WaitForFree =>
            {
                shared.status.lock().last_connection_error = Some(error);
                shared.wait_for_release()
            }
            Err(error) => {
                shared.set_state(ConnectionState::Closed);
                shared.disposed.store(true, Ordering::SeqCst);
                return Err(error.into());
            }
        };

        if let Err(error) = started {
            shared.shutdown();
            return Err(error);
        }
        Ok(Self { shared })
    }

    /// Register an observer. The first observer lets the worker start pulling.
    pub fn subscribe(&self, observer: Arc<dyn Observer<M::Item>>) -> Result<Unsubscriber<M::Item>> {
        if self.is_errored_by_subscriber() {
            return Err(SubscriptionError::InvalidState(
                "subscription stopped after a subscriber error; cannot add subscribers".into(),
            ));
        }
        if self.is_closed() {
            return Err(SubscriptionError::InvalidState(
                "subscription is closed".into(),
            ));
        }
        let id = self.shared.observers.add(observer);
        // A close that raced the add may have cleared the set before it.
        // If the observer is still registered it never saw on_completed.
        if self.shared.disposed.load(Ordering::SeqCst) && self.shared.observers.remove(id) {
            return Err(SubscriptionError::InvalidState(
                "subscription is closed".into(),
            ));
        }
        Ok(Unsubscriber::new(&self.shared.observers, id))
    }

    /// Close the connection. Idempotent; blocks until the worker has exited.
    ///
    /// Observers receive `on_completed` once. Unless the server already took
    /// the subscription away, a close request releases the slot.
    pub fn close(&self) {
        self.shared.shutdown();
    }

    pub fn hooks(&self) -> &EventHooks {
        &self.shared.hooks
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.shared.id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.shared.connection_id()
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.shared.options
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    pub fn is_errored_by_subscriber(&self) -> bool {
        self.shared.status.lock().errored_by_subscriber
    }

    /// The last failure raised by an observer.
    pub fn last_subscriber_error(&self) -> Option<SharedObserverError> {
        self.shared.status.lock().last_subscriber_error.clone()
    }

    /// The last remote failure of the current (or final) pull generation.
    pub fn last_connection_error(&self) -> Option<RemoteError> {
        self.shared.status.lock().last_connection_error.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<M: Materialize> Drop for SubscriptionConnection<M> {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}
