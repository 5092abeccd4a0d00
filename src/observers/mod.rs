//! Observer fan-out for subscription items.
//!
//! Observers are registered on a connection and receive every delivered item
//! in registration order, always from the connection's worker thread and never
//! concurrently with each other.
//!
//! # Example
//!
//! ```ignore
//! let (observer, feed) = changefeed::observers::channel::<Document>(128);
//! let handle = connection.subscribe(Arc::new(observer))?;
//!
//! while let Ok(event) = feed.recv() {
//!     match event {
//!         FeedEvent::Item(doc) => println!("got {:?}", doc.id()),
//!         FeedEvent::Error(message) => eprintln!("failed: {message}"),
//!         FeedEvent::Completed => break,
//!     }
//! }
//! handle.unsubscribe();
//! ```

mod channel;
mod observer;
mod registry;

pub use channel::{channel, ChannelObserver, FeedEvent, FeedReceiver};
pub use observer::{observer_fn, FnObserver, Observer};
pub use registry::{ObserverId, ObserverRegistry, Unsubscriber};
