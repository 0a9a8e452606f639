//! Monitor-based single-assignment cell.
//!
//! No cancellation and no runner tracking: the producer owns the thread that will call
//! [`BlockingCompletionCell::finish`]. Failures must be folded into `T` by the producer.

use crate::error::{Error, Result};
use crate::handle::Handle;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};

struct Slot<T> {
    result: Option<T>,
    done: bool,
}

pub struct BlockingCompletionCell<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> BlockingCompletionCell<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                result: None,
                done: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store the value and wake every waiter. Later calls are ignored and return false.
    pub fn finish(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.done {
            return false;
        }
        slot.result = Some(value);
        slot.done = true;
        drop(slot);
        self.ready.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().done
    }

    /// Wait until finished and return a copy of the value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        let mut slot = self.slot.lock();
        while !slot.done {
            self.ready.wait(&mut slot);
        }
        Self::read(&slot)
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        while !slot.done {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() && !slot.done {
                        return Err(Error::Timeout);
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
        Ok(Self::read(&slot))
    }

    fn read(slot: &Slot<T>) -> T
    where
        T: Clone,
    {
        match &slot.result {
            Some(value) => value.clone(),
            None => unreachable!("finished cell without a value"),
        }
    }
}

impl<T> Default for BlockingCompletionCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BlockingCompletionCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingCompletionCell")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> Handle<T> for BlockingCompletionCell<T>
where
    T: Clone + Send,
{
    fn get(&self) -> Result<T> {
        Ok(BlockingCompletionCell::get(self))
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T> {
        BlockingCompletionCell::get_timeout(self, timeout)
    }

    fn is_done(&self) -> bool {
        BlockingCompletionCell::is_done(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_finish_once() {
        let cell = BlockingCompletionCell::new();
        assert!(!cell.is_done());
        assert!(cell.finish(1));
        assert!(!cell.finish(2));
        assert!(cell.is_done());
        assert_eq!(cell.get(), 1);
        assert_eq!(cell.get(), 1);
    }

    #[test]
    fn test_get_waits_for_finish() {
        let cell = Arc::new(BlockingCompletionCell::<String>::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || BlockingCompletionCell::get(&cell))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        cell.finish("hello".to_string());

        for reader in readers {
            assert_eq!(reader.join().unwrap(), "hello");
        }
    }

    #[test]
    fn test_get_timeout() {
        let cell: BlockingCompletionCell<u8> = BlockingCompletionCell::new();
        let start = Instant::now();
        assert!(matches!(
            cell.get_timeout(Duration::from_millis(30)),
            Err(Error::Timeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(30));

        cell.finish(4);
        assert_eq!(cell.get_timeout(Duration::from_millis(30)).unwrap(), 4);
    }

    #[test]
    fn test_unit_value() {
        let cell = BlockingCompletionCell::new();
        cell.finish(());
        cell.get();
        assert!(Handle::is_done(&cell));
    }
}
