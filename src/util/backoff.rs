//! Backoff for short busy-wait windows.

use std::hint::spin_loop;
use std::thread;
use std::time::Duration;

/// Spin with exponential growth, then yield, then park briefly.
///
/// Used for the bounded waits inside the completion protocol (a cell mid-completion, a
/// canceller about to deliver its interrupt) and for idle pool workers.
#[derive(Debug)]
pub struct SimpleBackoff {
    step: u32,
}

impl SimpleBackoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;

    pub fn new() -> Self {
        Self { step: 0 }
    }

    /// Spin or yield. Never sleeps.
    pub fn spin(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1 << self.step) {
                spin_loop();
            }
        } else {
            thread::yield_now();
        }
        if self.step <= Self::YIELD_LIMIT {
            self.step += 1;
        }
    }

    /// Like `spin`, but parks for up to `park` once spinning and yielding are exhausted.
    pub fn snooze(&mut self, park: Duration) {
        if self.step <= Self::YIELD_LIMIT {
            self.spin();
        } else {
            thread::park_timeout(park);
        }
    }

    /// Whether the next `snooze` will park.
    pub fn is_completed(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for SimpleBackoff {
    fn default() -> Self {
        Self::new()
    }
}
