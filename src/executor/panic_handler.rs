//! Panic capture for units run on pool workers and service threads.

use crate::error::Cause;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// What to do after a unit of work panics. The panic is always counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    /// Log at `error` and abort the process.
    Abort,
    /// Turn the panic into a [`Cause`] silently.
    Isolate,
    /// Turn the panic into a [`Cause`] and log it at `warn`.
    #[default]
    LogAndContinue,
}

#[derive(Debug)]
pub struct PanicHandler {
    strategy: PanicStrategy,
    caught: AtomicUsize,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        Self {
            strategy,
            caught: AtomicUsize::new(0),
        }
    }

    /// Run `f`, converting a panic into [`Cause::Panic`].
    pub fn catch<F, R>(&self, f: F) -> Result<R, Cause>
    where
        F: FnOnce() -> R,
    {
        let payload = match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => return Ok(value),
            Err(payload) => payload,
        };

        self.caught.fetch_add(1, Ordering::Relaxed);
        let message = panic_message(payload.as_ref());

        match self.strategy {
            PanicStrategy::Abort => {
                tracing::error!(message = %message, "unit of work panicked, aborting");
                std::process::abort();
            }
            PanicStrategy::Isolate => {}
            PanicStrategy::LogAndContinue => {
                let current = thread::current();
                tracing::warn!(
                    thread = current.name().unwrap_or("<unnamed>"),
                    message = %message,
                    "unit of work panicked"
                );
            }
        }

        Err(Cause::Panic(message))
    }

    /// Panics caught so far.
    pub fn caught(&self) -> usize {
        self.caught.load(Ordering::Relaxed)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_passes_through() {
        let handler = PanicHandler::new(PanicStrategy::Isolate);
        assert_eq!(handler.catch(|| 42).unwrap(), 42);
        assert_eq!(handler.caught(), 0);
    }

    #[test]
    fn test_panic_becomes_cause() {
        let handler = PanicHandler::new(PanicStrategy::Isolate);
        let id = 7;
        match handler.catch(|| -> u8 { panic!("unit {} failed", id) }) {
            Err(Cause::Panic(msg)) => assert_eq!(msg, "unit 7 failed"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(handler.caught(), 1);
    }

    #[test]
    fn test_logged_panics_are_counted() {
        let handler = PanicHandler::new(PanicStrategy::LogAndContinue);
        for _ in 0..5 {
            assert!(handler.catch(|| panic!("again")).is_err());
        }
        assert_eq!(handler.caught(), 5);
    }

    #[test]
    fn test_non_string_payload() {
        let handler = PanicHandler::new(PanicStrategy::Isolate);
        let cause = handler
            .catch(|| std::panic::panic_any(17u32))
            .unwrap_err();
        assert_eq!(cause.to_string(), "panicked: Unknown panic");
    }
}
