//! Error types for the subscription client.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by an observer while handling an item.
pub type ObserverError = Box<dyn StdError + Send + Sync>;

/// Shared form of an observer failure, kept for status accessors.
pub type SharedObserverError = Arc<dyn StdError + Send + Sync>;

/// Outcome of a remote subscription operation.
///
/// The three rejection variants (`InUse`, `DoesNotExist`, `Closed`) mean the
/// subscription no longer belongs to this connection. Everything else is a
/// transport problem.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Subscription is in use by another connection: {0}")]
    InUse(String),

    #[error("Subscription does not exist: {0}")]
    DoesNotExist(String),

    #[error("Subscription was closed by the server: {0}")]
    Closed(String),

    #[error("Request failed with status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Protocol(String),
}

/// HTTP status used by servers to report a request timeout.
pub const REQUEST_TIMEOUT_STATUS: u16 = 408;

impl RemoteError {
    /// True when the request timed out rather than being rejected.
    pub fn is_request_timeout(&self) -> bool {
        match self {
            RemoteError::Timeout => true,
            RemoteError::Status { code, .. } => *code == REQUEST_TIMEOUT_STATUS,
            _ => false,
        }
    }
}

/// Main error type for subscription operations.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Failed to materialize document {id:?}: {message}")]
    Materialize { id: Option<String>, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SubscriptionError {
    fn from(e: serde_json::Error) -> Self {
        SubscriptionError::Config(e.to_string())
    }
}

/// Result type for subscription operations.
pub type Result<T> = std::result::Result<T, SubscriptionError>;

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
