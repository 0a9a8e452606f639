pub use crate::batch::{FallbackHandle, ResilientBatchExecutor};
pub use crate::blocking::BlockingCompletionCell;
pub use crate::cell::{CompletionCell, State};
pub use crate::config::{PoolConfig, ServiceConfig};
pub use crate::error::{Cause, Error, Result};
pub use crate::executor::{BoundedPool, Executor, Task};
pub use crate::handle::Handle;
pub use crate::interrupt;
pub use crate::queue::CompletionQueue;
pub use crate::service::{TaskHandle, TaskService};
