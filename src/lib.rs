//! # Changefeed
//!
//! Client engine for durable, server-acknowledged document subscriptions.
//!
//! ## Core Concepts
//!
//! - **Subscription**: a server-side registration tracking which matching
//!   documents a client has processed, read through one connection at a time
//! - **Etag**: the server's ordered progress marker, acknowledged after each batch
//! - **Observers**: local consumers that receive every pulled document in order
//! - **Hooks**: callbacks around each batch and acknowledgment
//!
//! The transport ([`remote::RemoteSubscriptions`]) and the change notification
//! channel ([`changes::ChangesFeed`]) are supplied by the caller.
//!
//! ## Example
//!
//! ```ignore
//! use changefeed::{observers, SubscriptionConnection, SubscriptionId, SubscriptionOptions};
//!
//! let connection = SubscriptionConnection::open(
//!     SubscriptionId(1),
//!     SubscriptionOptions::default(),
//!     remote,
//!     changes,
//! )?;
//!
//! let (observer, feed) = observers::channel::<Document>(256);
//! let _handle = connection.subscribe(Arc::new(observer))?;
//!
//! while let Ok(event) = feed.recv() {
//!     // ...
//! }
//! ```

pub mod changes;
pub mod error;
pub mod observers;
pub mod policy;
pub mod remote;
pub mod signal;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use changes::{ChangesFeed, StoreChange, SubscriptionChange, Watch};
pub use error::{ObserverError, RemoteError, Result, SharedObserverError, SubscriptionError};
pub use observers::{observer_fn, FeedEvent, Observer, ObserverId, Unsubscriber};
pub use policy::{AckTimeoutPolicy, Disposition, ReconnectPolicy};
pub use remote::{BatchReader, RemoteSubscriptions, Token, TokenStream};
pub use signal::{Cancellation, ResetMode, Signal, Wait};
pub use subscriptions::{
    BatchOptions, ConnectionState, EventHooks, HookId, Identity, Materialize, OpeningStrategy,
    RawDocuments, StatsSnapshot, SubscriptionConnection, SubscriptionOptions, Typed,
};
pub use types::{ConnectionId, Document, Etag, SubscriptionId};
