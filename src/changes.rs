//! Store-wide change notifications consumed by a subscription connection.
//!
//! The notification channel is an external collaborator. A connection only
//! uses it to learn that new documents may exist (which wakes an idle pull
//! worker) and that a held subscription was released by another client.

use crate::error::RemoteError;
use crate::types::SubscriptionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of keys reserved for internal system documents.
pub const DEFAULT_SYSTEM_PREFIX: &str = "Raven/";

/// Events pushed for the whole store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreChange {
    DocumentPut { key: String },
    DocumentDeleted { key: String },
    BulkInsertStarted,
    BulkInsertEnded,
    BulkInsertError,
    /// The notification transport (re)connected; changes may have been missed.
    Connected,
    Disconnected,
}

impl StoreChange {
    /// Whether this change may have produced documents for a subscription.
    pub fn signals_new_documents(&self, system_prefix: &str) -> bool {
        match self {
            StoreChange::DocumentPut { key } => !key.starts_with(system_prefix),
            StoreChange::BulkInsertEnded | StoreChange::Connected => true,
            _ => false,
        }
    }
}

/// Events pushed for one subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionChange {
    Opened,
    /// The connection holding the subscription let it go.
    Released,
}

pub type StoreListener = Box<dyn Fn(&StoreChange) + Send + Sync>;
pub type SubscriptionListener = Box<dyn Fn(&SubscriptionChange) + Send + Sync>;

/// Source of change notifications.
pub trait ChangesFeed: Send + Sync {
    fn watch_store(&self, listener: StoreListener) -> Result<Watch, RemoteError>;

    fn watch_subscription(
        &self,
        id: SubscriptionId,
        listener: SubscriptionListener,
    ) -> Result<Watch, RemoteError>;
}

/// Registration with a [`ChangesFeed`]. Released explicitly or on drop.
pub struct Watch {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Watch {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A watch with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("active", &self.release.is_some())
            .finish()
    }
}
