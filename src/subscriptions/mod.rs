//! Continuous subscription connections.
//!
//! A [`SubscriptionConnection`] holds one server-side subscription and feeds
//! its documents to local observers:
//! - pulls batches on a dedicated worker thread, only while observers exist
//! - acknowledges progress after each delivered batch
//! - idles with client-alive heartbeats when nothing is new
//! - reconnects after transient failures, closes on takeover or deletion
//!
//! # Example
//!
//! ```ignore
//! let connection = SubscriptionConnection::open(
//!     SubscriptionId(7),
//!     SubscriptionOptions {
//!         strategy: OpeningStrategy::WaitForFree,
//!         ..Default::default()
//!     },
//!     remote,
//!     changes,
//! )?;
//!
//! connection.hooks().add_after_batch(|count| println!("processed {count} documents"));
//! let handle = connection.subscribe(Arc::new(observer_fn(|doc: &Document| {
//!     println!("{:?}", doc.id());
//!     Ok(())
//! })))?;
//!
//! // ...
//! handle.unsubscribe();
//! connection.close();
//! ```

mod connection;
mod hooks;
mod materialize;
mod options;
mod pull;
mod stats;

pub use connection::{ConnectionState, SubscriptionConnection};
pub use hooks::{EventHooks, HookId};
pub use materialize::{Identity, Materialize, RawDocuments, Typed};
pub use options::{BatchOptions, OpeningStrategy, SubscriptionOptions};
pub use stats::StatsSnapshot;
