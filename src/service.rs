//! Thread-per-task completion service.
//!
//! Every submission spawns one named OS thread. Handles are backed by a
//! [`BlockingCompletionCell`]; the worker catches panics so a failing unit resolves its
//! handle with [`Error::Execution`] instead of leaving retrievers blocked forever.

use crate::blocking::BlockingCompletionCell;
use crate::config::ServiceConfig;
use crate::error::{Cause, Error, Result};
use crate::executor::PanicHandler;
use crate::handle::Handle;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct TaskService {
    config: ServiceConfig,
    next_id: AtomicU64,
    panic_handler: Arc<PanicHandler>,
}

impl TaskService {
    pub fn new() -> Self {
        Self::from_valid(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: ServiceConfig) -> Self {
        Self {
            panic_handler: Arc::new(PanicHandler::new(config.panic_strategy)),
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `action` on a fresh thread; the handle yields `()` once it returns.
    pub fn submit_void<F>(&self, action: F) -> Result<TaskHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.launch(action, |_| {})
    }

    /// Run `task(input)` on a fresh thread; the handle yields its return value.
    pub fn submit_value<I, O, F>(&self, task: F, input: I) -> Result<TaskHandle<O>>
    where
        I: Send + 'static,
        O: Clone + Send + 'static,
        F: FnOnce(I) -> O + Send + 'static,
    {
        self.launch(move || task(input), |_| {})
    }

    /// Like [`submit_value`](Self::submit_value), then hand the value to `callback` on the
    /// worker thread after the handle has been resolved.
    ///
    /// The callback only runs when the task succeeds.
    pub fn submit_with_callback<I, O, F, C>(
        &self,
        task: F,
        input: I,
        callback: C,
    ) -> Result<TaskHandle<O>>
    where
        I: Send + 'static,
        O: Clone + Send + 'static,
        F: FnOnce(I) -> O + Send + 'static,
        C: FnOnce(O) + Send + 'static,
    {
        self.launch(move || task(input), callback)
    }

    /// Panics caught in submitted units and callbacks so far.
    pub fn panic_count(&self) -> usize {
        self.panic_handler.caught()
    }

    /// Number of worker threads spawned so far.
    pub fn spawned(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    fn next_name(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.config.thread_name_prefix, id)
    }

    fn launch<O, W, C>(&self, work: W, after: C) -> Result<TaskHandle<O>>
    where
        O: Clone + Send + 'static,
        W: FnOnce() -> O + Send + 'static,
        C: FnOnce(O) + Send + 'static,
    {
        let cell = Arc::new(BlockingCompletionCell::new());
        let name = self.next_name();

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker_cell = cell.clone();
        let handler = self.panic_handler.clone();
        builder
            .spawn(move || {
                let outcome = handler.catch(work);
                worker_cell.finish(outcome.clone());
                if let Ok(value) = outcome {
                    let _ = handler.catch(move || after(value));
                }
            })
            .map_err(|e| Error::executor(format!("spawn failed: {}", e)))?;

        tracing::debug!(thread = %name, "spawned task thread");

        Ok(TaskHandle {
            cell,
            thread_name: name,
        })
    }
}

impl Default for TaskService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskService")
            .field("prefix", &self.config.thread_name_prefix)
            .field("spawned", &self.spawned())
            .finish()
    }
}

/// Handle to a unit of work running on its own thread.
pub struct TaskHandle<T> {
    cell: Arc<BlockingCompletionCell<std::result::Result<T, Cause>>>,
    thread_name: String,
}

impl<T: Clone> TaskHandle<T> {
    pub fn get(&self) -> Result<T> {
        BlockingCompletionCell::get(&self.cell).map_err(Error::Execution)
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        BlockingCompletionCell::get_timeout(&self.cell, timeout)?.map_err(Error::Execution)
    }
}

impl<T> TaskHandle<T> {
    pub fn is_done(&self) -> bool {
        BlockingCompletionCell::is_done(&self.cell)
    }

    /// Name of the worker thread running this unit.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            thread_name: self.thread_name.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("thread", &self.thread_name)
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> Handle<T> for TaskHandle<T>
where
    T: Clone + Send,
{
    fn get(&self) -> Result<T> {
        TaskHandle::get(self)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T> {
        TaskHandle::get_timeout(self, timeout)
    }

    fn is_done(&self) -> bool {
        TaskHandle::is_done(self)
    }
}
