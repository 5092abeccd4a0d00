//! The pull worker loop.
//!
//! One iteration:
//! 1. wait until at least one observer is registered;
//! 2. pull a batch and deliver each document to every observer in order;
//! 3. acknowledge the batch etag (or silently acknowledge a skipped range);
//! 4. otherwise idle on the new-documents signal, sending a client-alive
//!    ping every time the heartbeat interval passes without one.
//!
//! A fresh `PullLoop` is built for every worker generation, so the
//! client-side etag starts out unknown after a reconnect.

use super::connection::Shared;
use super::hooks::HookPanic;
use super::materialize::Materialize;
use crate::error::{panic_message, ObserverError, RemoteError, SharedObserverError};
use crate::observers::Observer;
use crate::remote::BatchReader;
use crate::signal::Wait;
use crate::types::{Document, Etag};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Why a pull loop returned without a remote failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoopExit {
    Cancelled,
    ErroredBySubscriber,
}

/// Why a pull loop generation failed.
#[derive(Debug)]
pub(crate) enum LoopError {
    Remote(RemoteError),
    Hook(HookPanic),
}

impl From<RemoteError> for LoopError {
    fn from(error: RemoteError) -> Self {
        LoopError::Remote(error)
    }
}

impl From<HookPanic> for LoopError {
    fn from(panic: HookPanic) -> Self {
        LoopError::Hook(panic)
    }
}

enum BatchOutcome {
    Cancelled,
    ErroredBySubscriber,
    Complete {
        delivered: usize,
        etag: Option<Etag>,
    },
}

pub(crate) struct PullLoop<'a, M: Materialize> {
    shared: &'a Shared<M>,
    /// Last etag this loop acknowledged to the server.
    last_acknowledged: Option<Etag>,
}

impl<'a, M: Materialize> PullLoop<'a, M> {
    pub(crate) fn new(shared: &'a Shared<M>) -> Self {
        Self {
            shared,
            last_acknowledged: None,
        }
    }

    pub(crate) fn run(&mut self) -> Result<LoopExit, LoopError> {
        let shared = self.shared;
        loop {
            if shared.observers.wait_for_any() == Wait::Cancelled
                || shared.cancel.is_cancelled()
            {
                return Ok(LoopExit::Cancelled);
            }

            let (delivered, etag) = match self.pull_batch()? {
                BatchOutcome::Cancelled => return Ok(LoopExit::Cancelled),
                BatchOutcome::ErroredBySubscriber => return Ok(LoopExit::ErroredBySubscriber),
                BatchOutcome::Complete { delivered, etag } => (delivered, etag),
            };

            if let Some(etag) = etag {
                if delivered > 0 {
                    let hooks = &shared.hooks;
                    hooks.fire_before_acknowledgment()?;
                    self.acknowledge(etag)?;
                    hooks.fire_after_acknowledgment(etag)?;
                    hooks.fire_after_batch(delivered)?;
                    continue;
                }

                if self.last_acknowledged != Some(etag) {
                    // Nothing in range matched the criteria, but the server moved on.
                    debug!(subscription = %shared.id, etag = %etag, "silent acknowledgment");
                    self.acknowledge(etag)?;
                    continue;
                }
            }

            if self.idle()? == Wait::Cancelled {
                return Ok(LoopExit::Cancelled);
            }
        }
    }

    fn pull_batch(&mut self) -> Result<BatchOutcome, LoopError> {
        let shared = self.shared;
        let tokens = shared.remote.pull(shared.id, shared.connection_id())?;
        let mut batch = BatchReader::new(tokens);
        let mut delivered = 0usize;

        for document in batch.by_ref() {
            let document = document?;
            if delivered == 0 {
                shared.hooks.fire_before_batch()?;
            }
            if shared.cancel.is_cancelled() {
                return Ok(BatchOutcome::Cancelled);
            }

            delivered += 1;
            if !self.dispatch(document) {
                return Ok(BatchOutcome::ErroredBySubscriber);
            }
        }

        if shared.cancel.is_cancelled() {
            return Ok(BatchOutcome::Cancelled);
        }
        shared.stats.record_batch(delivered);
        trace!(subscription = %shared.id, delivered, "batch pulled");
        Ok(BatchOutcome::Complete {
            delivered,
            etag: batch.last_processed_etag(),
        })
    }

    /// Deliver one document. Returns false if the connection must stop.
    fn dispatch(&self, document: Document) -> bool {
        let shared = self.shared;
        let ignore_errors = shared.options.ignore_subscriber_errors;
        let doc_id = document.id().map(str::to_string);

        let item = match shared.materializer.materialize(document) {
            Ok(item) => item,
            Err(error) => {
                warn!(subscription = %shared.id, document = ?doc_id, error = %error, "failed to materialize document");
                if ignore_errors {
                    return true;
                }
                let error: SharedObserverError = Arc::new(error);
                shared.record_subscriber_error(Arc::clone(&error));
                for observer in shared.observers.snapshot() {
                    notify_error(&*observer, &error);
                }
                return false;
            }
        };

        for observer in shared.observers.snapshot() {
            // Closing mid-document: the remaining observers already completed.
            if shared.cancel.is_cancelled() {
                return true;
            }
            if let Err(error) = deliver(&*observer, &item) {
                warn!(subscription = %shared.id, document = ?doc_id, error = %error, "subscriber raised an error");
                if ignore_errors {
                    continue;
                }
                let error: SharedObserverError = Arc::from(error);
                shared.record_subscriber_error(Arc::clone(&error));
                notify_error(&*observer, &error);
                return false;
            }
        }
        true
    }

    fn acknowledge(&mut self, etag: Etag) -> Result<(), RemoteError> {
        let shared = self.shared;
        let result = shared
            .remote
            .acknowledge(shared.id, shared.connection_id(), etag);
        shared.options.ack_timeout.resolve(result)?;

        self.last_acknowledged = Some(etag);
        shared.stats.record_acknowledgment();
        trace!(subscription = %shared.id, etag = %etag, "batch acknowledged");
        Ok(())
    }

    /// Wait for new documents, pinging the server each heartbeat interval.
    fn idle(&self) -> Result<Wait, RemoteError> {
        let shared = self.shared;
        loop {
            match shared
                .new_documents
                .wait_timeout(shared.options.heartbeat_interval)
            {
                Wait::TimedOut => {
                    shared
                        .remote
                        .client_alive(shared.id, shared.connection_id())?;
                    shared.stats.record_heartbeat();
                    trace!(subscription = %shared.id, "client alive sent");
                }
                other => return Ok(other),
            }
        }
    }
}

/// Call `on_next`, turning a panic into an observer failure.
fn deliver<T>(observer: &dyn Observer<T>, item: &T) -> Result<(), ObserverError> {
    match catch_unwind(AssertUnwindSafe(|| observer.on_next(item))) {
        Ok(result) => result,
        Err(panic) => Err(format!("observer panicked: {}", panic_message(&*panic)).into()),
    }
}

/// Best-effort `on_error`; whatever it does is swallowed.
fn notify_error<T>(observer: &dyn Observer<T>, error: &SharedObserverError) {
    let _ = catch_unwind(AssertUnwindSafe(|| observer.on_error(&**error)));
}
