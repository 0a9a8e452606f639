//! Executors that accept units of work.
//!
//! [`Executor`] is the seam the batch executor and completion queue are written against;
//! [`BoundedPool`] is the bundled fixed-size implementation.

pub mod panic_handler;
pub mod pool;
pub mod task;
pub(crate) mod worker;

pub use panic_handler::{PanicHandler, PanicStrategy};
pub use pool::{BoundedPool, PoolStats};
pub use task::{Task, TaskId};

use crate::cell::CompletionCell;
use crate::error::Result;
use std::sync::Arc;

pub trait Executor: Send + Sync {
    /// Hand `task` to the executor. Fails with `Error::Rejected` when saturated or shut down.
    fn execute(&self, task: Task) -> Result<()>;

    /// Stop accepting work. Already admitted work still runs.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;

    /// Wrap `f` in a [`CompletionCell`] and execute it.
    fn submit<T, F>(&self, f: F) -> Result<Arc<CompletionCell<T>>>
    where
        Self: Sized,
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let cell = Arc::new(CompletionCell::new(f));
        self.execute(Task::for_cell(cell.clone()))?;
        Ok(cell)
    }

    /// Like [`submit`](Self::submit) for units that report failure through `Err`.
    fn submit_fallible<T, E, F>(&self, f: F) -> Result<Arc<CompletionCell<T>>>
    where
        Self: Sized,
        T: Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        let cell = Arc::new(CompletionCell::fallible(f));
        self.execute(Task::for_cell(cell.clone()))?;
        Ok(cell)
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) -> Result<()> {
        (**self).execute(task)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn is_shutdown(&self) -> bool {
        (**self).is_shutdown()
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, task: Task) -> Result<()> {
        (**self).execute(task)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn is_shutdown(&self) -> bool {
        (**self).is_shutdown()
    }
}
