use super::panic_handler::PanicHandler;
use super::task::Task;
use super::worker::{Shared, Worker, WorkerId, WorkerState};
use super::Executor;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::util::Admission;
use crossbeam_deque::Injector;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Fixed-size worker pool with bounded admission.
///
/// At most `queue_capacity` units are admitted at once (queued plus running); anything
/// beyond that is refused with [`Error::Rejected`] instead of queueing without bound.
pub struct BoundedPool {
    workers: Mutex<Vec<WorkerHandle>>,
    states: Vec<Arc<WorkerState>>,
    unparkers: Vec<thread::Thread>,
    shared: Arc<Shared>,
    // Held shared by submitters, exclusively by `shutdown` while it flips the flag.
    gate: RwLock<()>,
    next_wake: AtomicUsize,
    num_threads: usize,
}

struct WorkerHandle {
    id: WorkerId,
    thread: Option<JoinHandle<()>>,
}

/// Point-in-time counters for a [`BoundedPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub executed: u64,
    pub stolen: u64,
    pub rejected: u64,
    pub panicked: u64,
    pub in_flight: usize,
}

impl BoundedPool {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let num_threads = config.worker_threads();
        if num_threads == 0 {
            return Err(Error::config("need at least 1 thread"));
        }

        let shared = Arc::new(Shared {
            injector: Injector::new(),
            shutdown: Default::default(),
            admission: Admission::new(config.queue_capacity),
            panic_handler: PanicHandler::new(config.panic_strategy),
            idle_park: config.idle_park,
        });

        let workers: Vec<Worker> = (0..num_threads).map(Worker::new).collect();
        let stealers: Vec<_> = workers.iter().map(|w| w.local_queue.stealer()).collect();
        let states: Vec<_> = workers.iter().map(|w| w.state.clone()).collect();

        let mut handles = Vec::with_capacity(num_threads);
        let mut unparkers = Vec::with_capacity(num_threads);

        for worker in workers {
            let id = worker.id;
            let stealers_clone = stealers.clone();
            let shared_clone = shared.clone();
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || {
                worker.run(stealers_clone, shared_clone);
            });

            let thread = match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    // Release the workers that did start before reporting.
                    shared.shutdown.store(true, Ordering::Release);
                    for handle in handles.iter_mut() {
                        let WorkerHandle { thread, .. } = handle;
                        if let Some(thread) = thread.take() {
                            thread.thread().unpark();
                            let _ = thread.join();
                        }
                    }
                    return Err(Error::executor(format!("spawn failed: {}", e)));
                }
            };

            unparkers.push(thread.thread().clone());
            handles.push(WorkerHandle {
                id,
                thread: Some(thread),
            });
        }

        tracing::debug!(
            threads = num_threads,
            capacity = config.queue_capacity,
            "bounded pool started"
        );

        Ok(Self {
            workers: Mutex::new(handles),
            states,
            unparkers,
            shared,
            gate: RwLock::new(()),
            next_wake: AtomicUsize::new(0),
            num_threads,
        })
    }

    /// Pool with `num_threads` workers admitting at most `capacity` units.
    pub fn with_capacity(num_threads: usize, capacity: usize) -> Result<Self> {
        let config = PoolConfig::builder()
            .num_threads(num_threads)
            .queue_capacity(capacity)
            .build()?;
        Self::new(&config)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn capacity(&self) -> usize {
        self.shared.admission.capacity()
    }

    /// Units admitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.shared.admission.in_flight()
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            rejected: self.shared.admission.rejected(),
            panicked: self.shared.panic_handler.caught() as u64,
            in_flight: self.in_flight(),
            ..PoolStats::default()
        };
        for state in &self.states {
            stats.executed += state.tasks_executed.load(Ordering::Relaxed);
            stats.stolen += state.tasks_stolen.load(Ordering::Relaxed);
        }
        stats
    }

    fn wake_one(&self) {
        let idx = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.unparkers.len();
        self.unparkers[idx].unpark();
    }
}

impl Executor for BoundedPool {
    fn execute(&self, task: Task) -> Result<()> {
        let _gate = self.gate.read();

        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::Rejected);
        }

        if !self.shared.admission.on_enqueue() {
            tracing::debug!(
                task = task.id().as_u64(),
                capacity = self.capacity(),
                "task rejected: pool saturated"
            );
            return Err(Error::Rejected);
        }

        self.shared.injector.push(task);
        self.wake_one();
        Ok(())
    }

    fn shutdown(&self) {
        {
            let _gate = self.gate.write();
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
        }

        // wake everyone up to check shutdown flag
        for unparker in &self.unparkers {
            unparker.unpark();
        }

        let current = thread::current().id();
        let mut workers = self.workers.lock();
        for worker in workers.iter_mut() {
            let joinable = matches!(&worker.thread, Some(t) if t.thread().id() != current);
            if !joinable {
                continue;
            }
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::warn!(worker = worker.id, "pool worker panicked during shutdown");
                }
            }
        }

        tracing::debug!("bounded pool shut down");
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for BoundedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedPool")
            .field("num_threads", &self.num_threads)
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for BoundedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
