//! Failure classification for a subscription connection.
//!
//! [`ReconnectPolicy`] decides whether a remote failure ends the connection
//! or is retried after a fixed delay:
//!
//! ```text
//! InUse / DoesNotExist / Closed  → Terminal   (close, no retry)
//! anything else                  → Transient  (sleep retry_delay, reopen, resume)
//! ```
//!
//! [`AckTimeoutPolicy`] decides what a timed-out acknowledgment means.

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do after a remote failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The subscription no longer belongs to this connection.
    Terminal,
    /// Retry after the configured delay.
    Transient,
}

/// Fixed-delay reconnect policy.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub retry_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn classify(&self, error: &RemoteError) -> Disposition {
        match error {
            // Another client took the slot over.
            RemoteError::InUse(_)
            // Deleted while we were connected.
            | RemoteError::DoesNotExist(_)
            // Forcibly released by an administrator.
            | RemoteError::Closed(_) => Disposition::Terminal,
            _ => Disposition::Transient,
        }
    }
}

/// Meaning of an acknowledgment request that timed out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckTimeoutPolicy {
    /// The server most likely applied it; carry on.
    #[default]
    TreatAsApplied,
    /// Handle it like any other acknowledgment failure.
    Propagate,
}

impl AckTimeoutPolicy {
    pub fn resolve(&self, result: Result<(), RemoteError>) -> Result<(), RemoteError> {
        match (self, result) {
            (AckTimeoutPolicy::TreatAsApplied, Err(e)) if e.is_request_timeout() => {
                tracing::debug!(error = %e, "acknowledgment timed out, treating as applied");
                Ok(())
            }
            (_, result) => result,
        }
    }
}
