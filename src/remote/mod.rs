//! Remote subscription operations.
//!
//! The transport is an external collaborator: it turns each operation into a
//! single request/response exchange. `pull` hands back the response body as a
//! stream of parsed [`Token`]s, which [`BatchReader`] scans lazily into
//! documents plus the trailing progress etag.

mod batch;
mod token;

pub use batch::{BatchReader, LAST_PROCESSED_ETAG_PROPERTY, RESULTS_PROPERTY};
pub use token::{tokenize, Token, MAX_DEPTH};

use crate::error::RemoteError;
use crate::subscriptions::{BatchOptions, OpeningStrategy};
use crate::types::{ConnectionId, Etag, SubscriptionId};

/// Lazily produced tokens of a pull response body.
pub type TokenStream = Box<dyn Iterator<Item = Result<Token, RemoteError>> + Send>;

/// The server-side subscription endpoints used by a connection.
///
/// Every call blocks until the exchange completes.
pub trait RemoteSubscriptions: Send + Sync {
    /// Claim the subscription slot for `connection`.
    fn open(
        &self,
        id: SubscriptionId,
        connection: &ConnectionId,
        strategy: OpeningStrategy,
        batch: &BatchOptions,
    ) -> Result<(), RemoteError>;

    /// Fetch the next batch as a token stream.
    fn pull(&self, id: SubscriptionId, connection: &ConnectionId)
        -> Result<TokenStream, RemoteError>;

    /// Commit the read position up to `etag`.
    fn acknowledge(
        &self,
        id: SubscriptionId,
        connection: &ConnectionId,
        etag: Etag,
    ) -> Result<(), RemoteError>;

    /// Liveness ping sent while idle.
    fn client_alive(&self, id: SubscriptionId, connection: &ConnectionId)
        -> Result<(), RemoteError>;

    /// Release the slot held by `connection`.
    fn close(&self, id: SubscriptionId, connection: &ConnectionId) -> Result<(), RemoteError>;
}
