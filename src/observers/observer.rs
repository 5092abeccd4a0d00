//! The observer trait and a closure adaptor.

use crate::error::ObserverError;
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;

/// Receiver of subscription items.
///
/// Returning an error from [`Observer::on_next`] marks a subscriber failure.
/// Unless the connection ignores subscriber errors, the failing observer gets
/// the error back through [`Observer::on_error`] and the connection stops.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, item: &T) -> Result<(), ObserverError>;

    fn on_error(&self, _error: &(dyn StdError + Send + Sync + 'static)) {}

    /// Called once when the connection closes.
    fn on_completed(&self) {}
}

/// Observer backed by a closure. Created with [`observer_fn`].
pub struct FnObserver<T, F> {
    f: F,
    _item: PhantomData<fn(&T)>,
}

/// Wrap a closure as an observer that only handles items.
pub fn observer_fn<T, F>(f: F) -> FnObserver<T, F>
where
    F: Fn(&T) -> Result<(), ObserverError> + Send + Sync,
{
    FnObserver {
        f,
        _item: PhantomData,
    }
}

impl<T, F> Observer<T> for FnObserver<T, F>
where
    F: Fn(&T) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_next(&self, item: &T) -> Result<(), ObserverError> {
        (self.f)(item)
    }
}

impl<T, F> fmt::Debug for FnObserver<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnObserver")
    }
}
