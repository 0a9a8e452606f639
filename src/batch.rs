//! Batch execution that survives a saturated pool.
//!
//! Every unit is offered to the pool. Units the pool rejects are wrapped in a
//! [`FallbackHandle`] and run on the calling thread, so a batch always makes progress even
//! when the pool never frees up. Results come back in submission order; the first failure
//! cancels every sibling and is returned as the batch's error.

use crate::cell::CompletionCell;
use crate::error::{Error, Result};
use crate::executor::{Executor, Task};
use crate::handle::Handle;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Handle for a unit the pool refused. The unit runs synchronously on the first thread that
/// retrieves it (or calls [`run`](Self::run)).
pub struct FallbackHandle<T> {
    cell: Arc<CompletionCell<T>>,
}

impl<T> FallbackHandle<T> {
    pub fn new(cell: Arc<CompletionCell<T>>) -> Self {
        Self { cell }
    }

    /// Run the unit on the calling thread if nobody has yet.
    pub fn run(&self) {
        self.cell.run();
    }
}

impl<T> Clone for FallbackHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for FallbackHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackHandle")
            .field("state", &self.cell.state())
            .finish()
    }
}

impl<T> Handle<T> for FallbackHandle<T>
where
    T: Clone + Send + Sync,
{
    fn get(&self) -> Result<T> {
        self.run();
        self.cell.get()
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T> {
        self.run();
        self.cell.get_timeout(timeout)
    }

    fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        self.cell.cancel(may_interrupt)
    }

    fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }
}

/// Run `units` on `pool`, falling back to the calling thread for rejected ones.
pub fn execute_batch<T, E, I, F>(pool: &E, units: I) -> Result<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    E: Executor + ?Sized,
    I: IntoIterator<Item = F>,
    F: FnOnce() -> T + Send + 'static,
{
    let cells = units
        .into_iter()
        .map(|unit| Arc::new(CompletionCell::new(unit)))
        .collect();
    execute_cells(pool, cells)
}

/// [`execute_batch`] for units that report failure through `Err`.
pub fn execute_fallible_batch<T, Er, E, I, F>(pool: &E, units: I) -> Result<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    Er: std::error::Error + Send + Sync + 'static,
    E: Executor + ?Sized,
    I: IntoIterator<Item = F>,
    F: FnOnce() -> std::result::Result<T, Er> + Send + 'static,
{
    let cells = units
        .into_iter()
        .map(|unit| Arc::new(CompletionCell::fallible(unit)))
        .collect();
    execute_cells(pool, cells)
}

/// Run already-built cells as one batch. The caller keeps its own `Arc`s and can inspect each
/// unit's state once the batch returns.
pub fn execute_cells<T, E>(pool: &E, cells: Vec<Arc<CompletionCell<T>>>) -> Result<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    E: Executor + ?Sized,
{
    if cells.is_empty() {
        return Ok(Vec::new());
    }

    let mut handles: Vec<Box<dyn Handle<T>>> = Vec::with_capacity(cells.len());
    let mut fallbacks = Vec::new();

    for cell in cells {
        match pool.execute(Task::for_cell(cell.clone())) {
            Ok(()) => handles.push(Box::new(cell)),
            Err(Error::Rejected) => {
                let fallback = FallbackHandle::new(cell);
                fallbacks.push(fallback.clone());
                handles.push(Box::new(fallback));
            }
            Err(err) => {
                cancel_all(&handles);
                return Err(err);
            }
        }
    }

    if !fallbacks.is_empty() {
        let current = thread::current();
        tracing::debug!(
            rejected = fallbacks.len(),
            thread = current.name().unwrap_or("<unnamed>"),
            "running rejected units on the calling thread"
        );
        for fallback in &fallbacks {
            fallback.run();
        }
    }

    let mut results = Vec::with_capacity(handles.len());
    for (index, handle) in handles.iter().enumerate() {
        match handle.get() {
            Ok(value) => results.push(value),
            Err(err) => {
                tracing::warn!(index, error = %err, "batch unit failed, cancelling siblings");
                cancel_all(&handles);
                return Err(err);
            }
        }
    }

    Ok(results)
}

fn cancel_all<T>(handles: &[Box<dyn Handle<T>>]) {
    for handle in handles {
        handle.cancel(true);
    }
}

/// Owns (or borrows, via `&E` / `Arc<E>`) a pool and runs batches against it.
pub struct ResilientBatchExecutor<E> {
    pool: E,
}

impl<E: Executor> ResilientBatchExecutor<E> {
    pub fn new(pool: E) -> Self {
        Self { pool }
    }

    pub fn execute<T, I, F>(&self, units: I) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = F>,
        F: FnOnce() -> T + Send + 'static,
    {
        execute_batch(&self.pool, units)
    }

    pub fn execute_fallible<T, Er, I, F>(&self, units: I) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        Er: std::error::Error + Send + Sync + 'static,
        I: IntoIterator<Item = F>,
        F: FnOnce() -> std::result::Result<T, Er> + Send + 'static,
    {
        execute_fallible_batch(&self.pool, units)
    }

    pub fn execute_cells<T>(&self, cells: Vec<Arc<CompletionCell<T>>>) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        execute_cells(&self.pool, cells)
    }

    pub fn pool(&self) -> &E {
        &self.pool
    }

    pub fn into_inner(self) -> E {
        self.pool
    }
}

impl<E: fmt::Debug> fmt::Debug for ResilientBatchExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientBatchExecutor")
            .field("pool", &self.pool)
            .finish()
    }
}
