// pool worker thread
use super::panic_handler::PanicHandler;
use super::task::Task;
use crate::interrupt;
use crate::util::{Admission, SimpleBackoff};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as WorkerQueue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type WorkerId = usize;

// stats for each worker
#[derive(Debug)]
pub struct WorkerState {
    pub tasks_executed: AtomicU64,
    pub tasks_stolen: AtomicU64,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            tasks_executed: AtomicU64::new(0),
            tasks_stolen: AtomicU64::new(0),
        }
    }
}

/// Everything a worker shares with its pool.
pub(crate) struct Shared {
    pub injector: Injector<Task>,
    pub shutdown: AtomicBool,
    pub admission: Admission,
    pub panic_handler: PanicHandler,
    pub idle_park: Duration,
}

pub(crate) struct Worker {
    pub id: WorkerId,
    pub local_queue: WorkerQueue<Task>,
    pub state: Arc<WorkerState>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            local_queue: WorkerQueue::new_fifo(),
            state: Arc::new(WorkerState::new()),
        }
    }

    // main loop; exits once shutdown is flagged and no work is left
    pub fn run(&self, stealers: Vec<Stealer<Task>>, shared: Arc<Shared>) {
        let mut backoff = SimpleBackoff::new();

        loop {
            if let Some(task) = self.find_task(&stealers, &shared.injector) {
                backoff.reset();
                self.execute_task(task, &shared);
                continue;
            }

            if shared.shutdown.load(Ordering::Acquire) {
                // Submissions are fenced before the flag flips, so a final look is enough.
                match self.find_task(&stealers, &shared.injector) {
                    Some(task) => self.execute_task(task, &shared),
                    None => break,
                }
                continue;
            }

            backoff.snooze(shared.idle_park);
        }

        tracing::debug!(worker = self.id, "pool worker exiting");
    }

    fn find_task(&self, stealers: &[Stealer<Task>], injector: &Injector<Task>) -> Option<Task> {
        // 1. Check local queue first (best cache locality)
        if let Some(task) = self.local_queue.pop() {
            return Some(task);
        }

        // 2. Check global injector queue
        loop {
            match injector.steal_batch_and_pop(&self.local_queue) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        // 3. Steal from other workers
        self.try_steal_from_workers(stealers)
    }

    fn try_steal_from_workers(&self, stealers: &[Stealer<Task>]) -> Option<Task> {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        if stealers.len() < 2 {
            return None;
        }

        let mut indices: Vec<usize> = (0..stealers.len()).collect();
        indices.shuffle(&mut thread_rng());

        for &idx in &indices {
            if idx == self.id {
                continue;
            }

            loop {
                match stealers[idx].steal_batch_and_pop(&self.local_queue) {
                    Steal::Success(task) => {
                        self.state.tasks_stolen.fetch_add(1, Ordering::Relaxed);
                        return Some(task);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn execute_task(&self, task: Task, shared: &Shared) {
        // An interrupt aimed at the previous unit must not reach this one.
        interrupt::interrupted();

        let tid = task.id();
        tracing::trace!(worker = self.id, task = tid.as_u64(), queued_for = ?task.age(), "running task");

        if shared.panic_handler.catch(|| task.execute()).is_err() {
            tracing::debug!(worker = self.id, task = tid.as_u64(), "task panicked");
        }

        shared.admission.on_complete();
        self.state.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }
}
