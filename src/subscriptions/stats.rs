//! Delivery counters for a connection.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct SubscriptionStats {
    batches: AtomicU64,
    documents: AtomicU64,
    acknowledgments: AtomicU64,
    heartbeats: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of a connection's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Batches that delivered at least one document.
    pub batches: u64,
    pub documents: u64,
    pub acknowledgments: u64,
    pub heartbeats: u64,
    /// Successful reopen attempts after a transient failure.
    pub reconnects: u64,
}

impl SubscriptionStats {
    pub fn record_batch(&self, documents: usize) {
        if documents > 0 {
            self.batches.fetch_add(1, Ordering::Relaxed);
            self.documents.fetch_add(documents as u64, Ordering::Relaxed);
        }
    }

    pub fn record_acknowledgment(&self) {
        self.acknowledgments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            documents: self.documents.load(Ordering::Relaxed),
            acknowledgments: self.acknowledgments.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
