//! Wait primitives shared by the pull worker and the owning thread.
//!
//! A [`Signal`] is a binary event in one of two flavours:
//! - [`ResetMode::Auto`]: a successful wait consumes the signal ("new data may be available").
//! - [`ResetMode::Manual`]: the signal stays set until [`Signal::reset`] ("an observer exists").
//!
//! Every signal is linked to a [`Cancellation`]. Cancelling wakes all linked
//! waits and interruptible sleeps immediately, and they report [`Wait::Cancelled`].

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// How a signal behaves after a waiter is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetMode {
    Auto,
    Manual,
}

/// Outcome of waiting on a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    Signaled,
    TimedOut,
    Cancelled,
}

struct SignalState {
    mode: ResetMode,
    set: Mutex<bool>,
    cond: Condvar,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    sleeper: Mutex<()>,
    cond: Condvar,
    linked: Mutex<Vec<Weak<SignalState>>>,
}

/// Cooperative cancellation flag that also interrupts waits.
#[derive(Clone, Default)]
pub struct Cancellation {
    inner: Arc<CancelInner>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation and wake everything waiting on it. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let _guard = self.inner.sleeper.lock();
            self.inner.cond.notify_all();
        }

        let linked: Vec<_> = self.inner.linked.lock().drain(..).collect();
        for state in linked.iter().filter_map(Weak::upgrade) {
            let _guard = state.set.lock();
            state.cond.notify_all();
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.sleeper.lock();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_cancelled();
            }
        }
    }

    fn link(&self, state: &Arc<SignalState>) {
        let mut linked = self.inner.linked.lock();
        linked.retain(|w| w.strong_count() > 0);
        linked.push(Arc::downgrade(state));
    }
}

/// Binary event with auto or manual reset, interruptible by cancellation.
///
/// Clones share the same event.
#[derive(Clone)]
pub struct Signal {
    state: Arc<SignalState>,
    cancel: Cancellation,
}

impl Signal {
    pub fn new(mode: ResetMode, cancel: &Cancellation) -> Self {
        let state = Arc::new(SignalState {
            mode,
            set: Mutex::new(false),
            cond: Condvar::new(),
        });
        cancel.link(&state);
        Self {
            state,
            cancel: cancel.clone(),
        }
    }

    pub fn auto_reset(cancel: &Cancellation) -> Self {
        Self::new(ResetMode::Auto, cancel)
    }

    pub fn manual_reset(cancel: &Cancellation) -> Self {
        Self::new(ResetMode::Manual, cancel)
    }

    pub fn set(&self) {
        let mut set = self.state.set.lock();
        *set = true;
        match self.state.mode {
            ResetMode::Auto => {
                self.state.cond.notify_one();
            }
            ResetMode::Manual => {
                self.state.cond.notify_all();
            }
        }
    }

    pub fn reset(&self) {
        *self.state.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.state.set.lock()
    }

    /// Block until the signal is set or cancellation is requested.
    pub fn wait(&self) -> Wait {
        self.wait_until(None)
    }

    /// Block until the signal is set, `timeout` elapses, or cancellation is requested.
    pub fn wait_timeout(&self, timeout: Duration) -> Wait {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Wait {
        let mut set = self.state.set.lock();
        let mut timed_out = false;
        loop {
            if self.cancel.is_cancelled() {
                return Wait::Cancelled;
            }
            if *set {
                if self.state.mode == ResetMode::Auto {
                    *set = false;
                }
                return Wait::Signaled;
            }
            if timed_out {
                return Wait::TimedOut;
            }
            match deadline {
                None => self.state.cond.wait(&mut set),
                Some(deadline) => {
                    timed_out = self.state.cond.wait_until(&mut set, deadline).timed_out();
                }
            }
        }
    }
}
