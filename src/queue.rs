//! Completion-ordered retrieval on top of an [`Executor`].
//!
//! Cells submitted through a [`CompletionQueue`] are delivered by [`take`](CompletionQueue::take)
//! and the `poll` variants in the order they settle, not the order they were submitted.

use crate::cell::CompletionCell;
use crate::error::Result;
use crate::executor::{Executor, Task};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct CompletionQueue<T, E> {
    executor: E,
    tx: Sender<Arc<CompletionCell<T>>>,
    rx: Receiver<Arc<CompletionCell<T>>>,
}

impl<T, E> CompletionQueue<T, E>
where
    T: Send + Sync + 'static,
    E: Executor,
{
    pub fn new(executor: E) -> Self {
        let (tx, rx) = unbounded();
        Self { executor, tx, rx }
    }

    pub fn submit<F>(&self, f: F) -> Result<Arc<CompletionCell<T>>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(Arc::new(CompletionCell::new(f)))
    }

    pub fn submit_fallible<F, Er>(&self, f: F) -> Result<Arc<CompletionCell<T>>>
    where
        F: FnOnce() -> std::result::Result<T, Er> + Send + 'static,
        Er: std::error::Error + Send + Sync + 'static,
    {
        self.enqueue(Arc::new(CompletionCell::fallible(f)))
    }

    fn enqueue(&self, cell: Arc<CompletionCell<T>>) -> Result<Arc<CompletionCell<T>>> {
        // Weak, so a rejected cell is simply dropped instead of keeping itself alive.
        let weak: Weak<CompletionCell<T>> = Arc::downgrade(&cell);
        let tx = self.tx.clone();
        cell.on_complete(move || {
            if let Some(cell) = weak.upgrade() {
                let _ = tx.send(cell);
            }
        });

        self.executor.execute(Task::for_cell(cell.clone()))?;
        Ok(cell)
    }

    /// Block until some submitted cell settles.
    pub fn take(&self) -> Arc<CompletionCell<T>> {
        match self.rx.recv() {
            Ok(cell) => cell,
            // `self.tx` keeps the channel open.
            Err(_) => unreachable!("completion channel closed while the queue is alive"),
        }
    }

    /// A settled cell, if one is ready.
    pub fn poll(&self) -> Option<Arc<CompletionCell<T>>> {
        self.rx.try_recv().ok()
    }

    pub fn poll_timeout(&self, timeout: Duration) -> Option<Arc<CompletionCell<T>>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Settled cells not yet taken.
    pub fn ready(&self) -> usize {
        self.rx.len()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

impl<T, E: fmt::Debug> fmt::Debug for CompletionQueue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("executor", &self.executor)
            .field("ready", &self.rx.len())
            .finish()
    }
}
