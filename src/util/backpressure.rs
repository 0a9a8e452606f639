//! Admission control for bounded executors.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counts admitted units and refuses new ones past a fixed capacity.
#[derive(Debug)]
pub struct Admission {
    capacity: usize,
    in_flight: AtomicUsize,
    rejected: AtomicU64,
}

impl Admission {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_flight: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Reserve a slot. Returns false (and counts a rejection) when full.
    pub fn on_enqueue(&self) -> bool {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel);

        if current >= self.capacity {
            // Over capacity, reject
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Release a slot once its unit has finished running.
    pub fn on_complete(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
