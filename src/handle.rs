//! Uniform retrieval contract shared by every kind of handle.

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// The pending or completed outcome of a unit of work.
pub trait Handle<T>: Send + Sync {
    /// Block until the outcome is available.
    fn get(&self) -> Result<T>;

    /// Block for at most `timeout`; fails with `Error::Timeout` when it expires.
    fn get_timeout(&self, timeout: Duration) -> Result<T>;

    fn is_done(&self) -> bool;

    /// Attempt to cancel. Handles without a cancellation surface return false.
    fn cancel(&self, _may_interrupt: bool) -> bool {
        false
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<T, H> Handle<T> for Arc<H>
where
    H: Handle<T> + ?Sized,
{
    fn get(&self) -> Result<T> {
        (**self).get()
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T> {
        (**self).get_timeout(timeout)
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        (**self).cancel(may_interrupt)
    }

    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}
