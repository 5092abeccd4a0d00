//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use changefeed::remote::tokenize;
use changefeed::{
    BatchOptions, ChangesFeed, ConnectionId, Etag, ObserverError, Observer, OpeningStrategy,
    RemoteError, RemoteSubscriptions, StoreChange, SubscriptionChange, SubscriptionId,
    SubscriptionOptions, Token, TokenStream, Watch,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Options tuned for tests: short heartbeat and retry delay.
pub fn fast_options() -> SubscriptionOptions {
    SubscriptionOptions {
        connection_id: ConnectionId("test-connection".into()),
        heartbeat_interval: Duration::from_millis(200),
        retry_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

pub const WAIT: Duration = Duration::from_secs(5);

pub fn doc(id: &str, name: &str) -> Value {
    json!({ "Name": name, "@metadata": { "@id": id } })
}

// --- Remote ---

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Open(OpeningStrategy),
    Pull,
    Acknowledge(Etag),
    ClientAlive,
    Close,
}

pub enum PullReply {
    Batch { docs: Vec<Value>, etag: Option<Etag> },
    Fail(RemoteError),
    Tokens(Vec<Result<Token, RemoteError>>),
}

impl PullReply {
    pub fn batch(docs: Vec<Value>, etag: Etag) -> Self {
        PullReply::Batch {
            docs,
            etag: Some(etag),
        }
    }

    pub fn empty(etag: Option<Etag>) -> Self {
        PullReply::Batch {
            docs: Vec::new(),
            etag,
        }
    }
}

/// Remote that answers from per-operation scripts. When a script runs out,
/// opens/acks/pings succeed and pulls return an empty batch carrying the
/// last scripted etag.
#[derive(Default)]
pub struct ScriptedRemote {
    calls: Mutex<Vec<Call>>,
    opens: Mutex<VecDeque<Result<(), RemoteError>>>,
    pulls: Mutex<VecDeque<PullReply>>,
    acks: Mutex<VecDeque<Result<(), RemoteError>>>,
    alive: Mutex<VecDeque<Result<(), RemoteError>>>,
    current_etag: Mutex<Option<Etag>>,
    open_gate: Mutex<Option<crossbeam_channel::Receiver<()>>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_open(&self, reply: Result<(), RemoteError>) {
        self.opens.lock().push_back(reply);
    }

    pub fn script_pull(&self, reply: PullReply) {
        self.pulls.lock().push_back(reply);
    }

    pub fn script_ack(&self, reply: Result<(), RemoteError>) {
        self.acks.lock().push_back(reply);
    }

    pub fn script_client_alive(&self, reply: Result<(), RemoteError>) {
        self.alive.lock().push_back(reply);
    }

    /// Make the next `open` block until the returned sender fires or is dropped.
    pub fn gate_next_open(&self) -> crossbeam_channel::Sender<()> {
        let (release, gate) = crossbeam_channel::bounded(1);
        *self.open_gate.lock() = Some(gate);
        release
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    pub fn opens(&self) -> usize {
        self.count(|c| matches!(c, Call::Open(_)))
    }

    pub fn pulls(&self) -> usize {
        self.count(|c| *c == Call::Pull)
    }

    pub fn acks(&self) -> Vec<Etag> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Acknowledge(etag) => Some(*etag),
                _ => None,
            })
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.count(|c| *c == Call::ClientAlive)
    }

    pub fn closes(&self) -> usize {
        self.count(|c| *c == Call::Close)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl RemoteSubscriptions for ScriptedRemote {
    fn open(
        &self,
        _id: SubscriptionId,
        _connection: &ConnectionId,
        strategy: OpeningStrategy,
        _batch: &BatchOptions,
    ) -> Result<(), RemoteError> {
        self.record(Call::Open(strategy));
        let gate = self.open_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.opens.lock().pop_front().unwrap_or(Ok(()))
    }

    fn pull(
        &self,
        _id: SubscriptionId,
        _connection: &ConnectionId,
    ) -> Result<TokenStream, RemoteError> {
        self.record(Call::Pull);
        let reply = self.pulls.lock().pop_front();
        let (docs, etag) = match reply {
            Some(PullReply::Fail(error)) => return Err(error),
            Some(PullReply::Tokens(tokens)) => return Ok(Box::new(tokens.into_iter())),
            Some(PullReply::Batch { docs, etag }) => {
                if etag.is_some() {
                    *self.current_etag.lock() = etag;
                }
                (docs, etag)
            }
            None => (Vec::new(), *self.current_etag.lock()),
        };

        let body = json!({
            "Results": docs,
            "LastProcessedEtag": etag.map(|e| e.to_string()),
        });
        Ok(Box::new(tokenize(&body).into_iter().map(Ok)))
    }

    fn acknowledge(
        &self,
        _id: SubscriptionId,
        _connection: &ConnectionId,
        etag: Etag,
    ) -> Result<(), RemoteError> {
        self.record(Call::Acknowledge(etag));
        self.acks.lock().pop_front().unwrap_or(Ok(()))
    }

    fn client_alive(
        &self,
        _id: SubscriptionId,
        _connection: &ConnectionId,
    ) -> Result<(), RemoteError> {
        self.record(Call::ClientAlive);
        self.alive.lock().pop_front().unwrap_or(Ok(()))
    }

    fn close(&self, _id: SubscriptionId, _connection: &ConnectionId) -> Result<(), RemoteError> {
        self.record(Call::Close);
        Ok(())
    }
}

// --- Changes ---

type StoreFn = Arc<dyn Fn(&StoreChange) + Send + Sync>;
type SubscriptionFn = Arc<dyn Fn(&SubscriptionChange) + Send + Sync>;

#[derive(Default)]
struct ChangesInner {
    next_id: AtomicU64,
    store: Mutex<Vec<(u64, StoreFn)>>,
    subscriptions: Mutex<Vec<(u64, SubscriptionId, SubscriptionFn)>>,
}

/// Change feed driven by the test. Listeners are invoked outside the lock,
/// so they may release their own watch.
#[derive(Clone, Default)]
pub struct FakeChanges {
    inner: Arc<ChangesInner>,
}

impl FakeChanges {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, change: StoreChange) {
        let listeners: Vec<StoreFn> = self
            .inner
            .store
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }

    pub fn emit_subscription(&self, id: SubscriptionId, change: SubscriptionChange) {
        let listeners: Vec<SubscriptionFn> = self
            .inner
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, sid, _)| *sid == id)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }

    pub fn store_watchers(&self) -> usize {
        self.inner.store.lock().len()
    }

    pub fn subscription_watchers(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl ChangesFeed for FakeChanges {
    fn watch_store(
        &self,
        listener: Box<dyn Fn(&StoreChange) + Send + Sync>,
    ) -> Result<Watch, RemoteError> {
        let id = self.next_id();
        self.inner.store.lock().push((id, Arc::from(listener)));
        let weak: Weak<ChangesInner> = Arc::downgrade(&self.inner);
        Ok(Watch::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.store.lock().retain(|(existing, _)| *existing != id);
            }
        }))
    }

    fn watch_subscription(
        &self,
        subscription: SubscriptionId,
        listener: Box<dyn Fn(&SubscriptionChange) + Send + Sync>,
    ) -> Result<Watch, RemoteError> {
        let id = self.next_id();
        self.inner
            .subscriptions
            .lock()
            .push((id, subscription, Arc::from(listener)));
        let weak: Weak<ChangesInner> = Arc::downgrade(&self.inner);
        Ok(Watch::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .subscriptions
                    .lock()
                    .retain(|(existing, _, _)| *existing != id);
            }
        }))
    }
}

// --- Observers ---

/// Observer that records everything it sees and can be told to fail.
pub struct Recorder<T> {
    items: Mutex<Vec<T>>,
    errors: Mutex<Vec<String>>,
    completed: AtomicUsize,
    fail: bool,
}

impl<T: Clone + Send> Recorder<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            fail: false,
        })
    }

    /// A recorder whose `on_next` always fails after recording the item.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send> Observer<T> for Recorder<T> {
    fn on_next(&self, item: &T) -> Result<(), ObserverError> {
        self.items.lock().push(item.clone());
        if self.fail {
            return Err("observer refused the document".into());
        }
        Ok(())
    }

    fn on_error(&self, error: &(dyn StdError + Send + Sync + 'static)) {
        self.errors.lock().push(error.to_string());
    }

    fn on_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Open a raw-document connection on the scripted collaborators.
pub fn open(
    remote: &Arc<ScriptedRemote>,
    changes: &Arc<FakeChanges>,
    options: SubscriptionOptions,
) -> changefeed::Result<changefeed::SubscriptionConnection> {
    init_tracing();
    changefeed::SubscriptionConnection::open(
        SubscriptionId(7),
        options,
        remote.clone(),
        changes.clone(),
    )
}
