//! Cooperative thread interruption.
//!
//! Every thread owns one [`ThreadSignal`]: an interrupted flag plus the thread handle used to
//! wake it. Interrupting a thread raises the flag and unparks it, so a thread blocked in
//! [`sleep`], [`park_timeout`] or a completion-cell `get` notices promptly. Code that never
//! blocks has to poll [`is_interrupted`] or [`check`] itself.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

pub struct ThreadSignal {
    interrupted: AtomicBool,
    thread: Thread,
}

impl ThreadSignal {
    fn new(thread: Thread) -> Self {
        Self {
            interrupted: AtomicBool::new(false),
            thread,
        }
    }

    /// Raise the flag and wake the owning thread.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.thread.unpark();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Test-and-clear.
    pub fn take(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

impl fmt::Debug for ThreadSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSignal")
            .field("thread", &self.thread.name().unwrap_or("<unnamed>"))
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

thread_local! {
    static CURRENT: Arc<ThreadSignal> = Arc::new(ThreadSignal::new(thread::current()));
}

/// Signal of the calling thread.
pub fn current() -> Arc<ThreadSignal> {
    CURRENT.with(Arc::clone)
}

/// Peek at the calling thread's flag without clearing it.
pub fn is_interrupted() -> bool {
    CURRENT.with(|signal| signal.is_interrupted())
}

/// Clear the calling thread's flag, returning whether it was set.
pub fn interrupted() -> bool {
    CURRENT.with(|signal| signal.take())
}

/// Consume a pending interrupt as an error.
pub fn check() -> Result<()> {
    if interrupted() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

/// Park for at most `timeout`, failing early if the thread is interrupted.
///
/// Spurious wakeups are possible; callers re-check their own condition.
pub fn park_timeout(timeout: Duration) -> Result<()> {
    check()?;
    thread::park_timeout(timeout);
    check()
}

/// Sleep for `duration` unless interrupted first.
pub fn sleep(duration: Duration) -> Result<()> {
    let deadline = Instant::now() + duration;
    loop {
        check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::park_timeout(deadline - now);
    }
}
