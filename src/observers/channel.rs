//! Channel-backed observer for consumers that prefer pulling events.

use super::observer::Observer;
use crate::error::ObserverError;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::error::Error as StdError;
use std::time::Duration;

/// Event forwarded through a [`ChannelObserver`].
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent<T> {
    Item(T),
    /// An error raised while delivering to this observer.
    Error(String),
    /// The connection closed; no more events follow.
    Completed,
}

/// Observer that forwards items into a bounded channel.
///
/// A full buffer is reported as a subscriber failure so a slow consumer
/// cannot silently lose items.
pub struct ChannelObserver<T> {
    sender: Sender<FeedEvent<T>>,
}

/// Receiving side of a [`ChannelObserver`].
pub struct FeedReceiver<T> {
    receiver: Receiver<FeedEvent<T>>,
}

/// Create a channel observer with room for `capacity` buffered events.
pub fn channel<T>(capacity: usize) -> (ChannelObserver<T>, FeedReceiver<T>) {
    let (sender, receiver) = bounded(capacity);
    (ChannelObserver { sender }, FeedReceiver { receiver })
}

impl<T: Clone + Send> Observer<T> for ChannelObserver<T> {
    fn on_next(&self, item: &T) -> Result<(), ObserverError> {
        match self.sender.try_send(FeedEvent::Item(item.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err("feed buffer is full".into()),
            Err(TrySendError::Disconnected(_)) => Err("feed receiver was dropped".into()),
        }
    }

    fn on_error(&self, error: &(dyn StdError + Send + Sync + 'static)) {
        // Best effort: the buffer may be the reason we failed.
        let _ = self.sender.try_send(FeedEvent::Error(error.to_string()));
    }

    fn on_completed(&self) {
        let _ = self.sender.try_send(FeedEvent::Completed);
    }
}

impl<T> FeedReceiver<T> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent<T>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent<T>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<FeedEvent<T>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
