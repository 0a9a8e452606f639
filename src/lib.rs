//! Single-assignment completion cells and the executors built on them.
//!
//! # Quick Start
//!
//! ```no_run
//! use veda_completion::prelude::*;
//!
//! let pool = BoundedPool::with_capacity(2, 2).unwrap();
//! let batch = ResilientBatchExecutor::new(&pool);
//!
//! // Five units against a pool that admits two: the rest run on this thread.
//! let squares = batch
//!     .execute((0u64..5).map(|i| move || i * i))
//!     .unwrap();
//! assert_eq!(squares, vec![0, 1, 4, 9, 16]);
//! ```
//!
//! # Components
//!
//! - **CompletionCell**: lock-free cancellable cell with a waiter stack and timed retrieval
//! - **BlockingCompletionCell**: monitor-based single-assignment cell
//! - **TaskService**: thread-per-task submission with optional completion callbacks
//! - **ResilientBatchExecutor**: ordered batches that fall back to the caller on rejection
//! - **CompletionQueue**: results in the order they settle
//! - **Interruption**: cooperative per-thread interrupt flags used by `cancel(true)`

#![warn(missing_debug_implementations)]

pub mod batch;
pub mod blocking;
pub mod cell;
pub mod config;
pub mod error;
pub mod executor;
pub mod handle;
pub mod interrupt;
pub mod prelude;
pub mod queue;
pub mod service;
pub mod util;

// Re-export key types at crate root
pub use batch::{
    execute_batch, execute_cells, execute_fallible_batch, FallbackHandle, ResilientBatchExecutor,
};
pub use blocking::BlockingCompletionCell;
pub use cell::{CompletionCell, State};
pub use config::{PoolConfig, PoolConfigBuilder, ServiceConfig, ServiceConfigBuilder};
pub use error::{Cause, Error, Result};
pub use executor::{BoundedPool, Executor, Task};
pub use handle::Handle;
pub use queue::CompletionQueue;
pub use service::{TaskHandle, TaskService};
