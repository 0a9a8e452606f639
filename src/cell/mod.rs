//! Lock-free, single-assignment, cancellable result cell.
//!
//! A [`CompletionCell`] holds a unit of work until some thread calls [`CompletionCell::run`].
//! The outcome is published exactly once through a CAS on the state word; retrievers that
//! arrive early park on a Treiber stack and are all woken on the terminal transition.
//! Completing a cell nobody waits on costs one load and one CAS.

mod state;
mod waiters;

pub use state::State;

use crate::error::{Cause, Error, Result};
use crate::executor::panic_handler::panic_message;
use crate::handle::Handle;
use crate::interrupt::{self, ThreadSignal};
use crate::util::SimpleBackoff;
use parking_lot::Mutex;
use state::AtomicState;
use std::cell::UnsafeCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use waiters::{WaitNode, WaitStack};

type Work<T> = Box<dyn FnOnce() -> std::result::Result<T, Cause> + Send>;
type Outcome<T> = std::result::Result<T, Cause>;

enum Hooks {
    Pending(Vec<Box<dyn FnOnce() + Send>>),
    Fired,
}

pub struct CompletionCell<T> {
    state: AtomicState,
    work: Mutex<Option<Work<T>>>,
    // Written once by the thread that wins New -> Completing, read only after a settled
    // state has been observed with Acquire.
    outcome: UnsafeCell<Option<Outcome<T>>>,
    // Non-null only while a thread is inside `run`, which keeps the signal alive.
    runner: AtomicPtr<ThreadSignal>,
    waiters: WaitStack,
    hooks: Mutex<Hooks>,
}

// SAFETY: `outcome` is written by exactly one thread before the Release store of a settled
// state and only read after an Acquire load observes that state. `runner` is dereferenced
// only under the protocol described in `cancel`.
unsafe impl<T: Send> Send for CompletionCell<T> {}
unsafe impl<T: Send + Sync> Sync for CompletionCell<T> {}

impl<T: Send + 'static> CompletionCell<T> {
    /// Cell for an infallible unit of work. A panic becomes [`Cause::Panic`].
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::with_work(Some(Box::new(move || Ok(f()))))
    }

    /// Cell for a unit of work that reports failure through `Err`.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::with_work(Some(Box::new(move || f().map_err(Cause::error))))
    }
}

impl<T> CompletionCell<T> {
    /// Cell without a unit of work, completed through [`set`](Self::set) or
    /// [`set_failure`](Self::set_failure).
    pub fn pending() -> Self {
        Self::with_work(None)
    }

    /// Cell that is already `Normal`.
    pub fn completed(value: T) -> Self {
        let mut cell = Self::with_work(None);
        // SAFETY: not shared yet.
        unsafe { *cell.outcome.get() = Some(Ok(value)) };
        cell.state.store(State::Normal, Ordering::Release);
        *cell.hooks.get_mut() = Hooks::Fired;
        cell
    }

    fn with_work(work: Option<Work<T>>) -> Self {
        Self {
            state: AtomicState::new(State::New),
            work: Mutex::new(work),
            outcome: UnsafeCell::new(None),
            runner: AtomicPtr::new(ptr::null_mut()),
            waiters: WaitStack::new(),
            hooks: Mutex::new(Hooks::Pending(Vec::new())),
        }
    }

    pub fn state(&self) -> State {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.state() != State::New
    }

    pub fn is_cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    /// Execute the unit of work on the calling thread.
    ///
    /// A no-op unless the cell is `New` and no other thread is already running it. If a
    /// racing `cancel(true)` targeted this thread, `run` does not return until the interrupt
    /// has been delivered, so it can never land on code that runs afterwards.
    pub fn run(&self) {
        if self.state() != State::New {
            return;
        }

        let signal = interrupt::current();
        let me = Arc::as_ptr(&signal) as *mut ThreadSignal;
        if self
            .runner
            .compare_exchange(ptr::null_mut(), me, Ordering::SeqCst, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let work = if self.state() == State::New {
            self.work.lock().take()
        } else {
            None
        };

        if let Some(work) = work {
            match catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(value)) => {
                    self.set(value);
                }
                Ok(Err(cause)) => {
                    self.set_failure(cause);
                }
                Err(payload) => {
                    self.set_failure(Cause::Panic(panic_message(payload.as_ref())));
                }
            }
        }

        // The runner must stay set until the state has settled so a second `run` cannot start.
        self.runner.store(ptr::null_mut(), Ordering::SeqCst);

        // Re-read after clearing the runner: a canceller may be between its CAS and the
        // interrupt.
        if self.state.load(Ordering::SeqCst) == State::Interrupting {
            let mut backoff = SimpleBackoff::new();
            while self.state.load(Ordering::Acquire) == State::Interrupting {
                backoff.spin();
            }
        }

        drop(signal);
    }

    /// Publish a value. Returns false if the cell had already left `New`.
    pub fn set(&self, value: T) -> bool {
        self.publish(Ok(value), State::Normal)
    }

    /// Publish a failure. Returns false if the cell had already left `New`.
    pub fn set_failure(&self, cause: Cause) -> bool {
        self.publish(Err(cause), State::Exceptional)
    }

    fn publish(&self, outcome: Outcome<T>, terminal: State) -> bool {
        if !self
            .state
            .transition(State::New, State::Completing, Ordering::SeqCst)
        {
            return false;
        }
        // SAFETY: winning New -> Completing grants exclusive write access to `outcome`.
        unsafe { *self.outcome.get() = Some(outcome) };
        self.state.store(terminal, Ordering::Release);
        self.finish_completion();
        true
    }

    /// Cancel the cell if it is still `New`.
    ///
    /// With `may_interrupt`, the thread currently running the unit of work (if any) is
    /// interrupted. Returns false when the unit already completed, is completing, or the
    /// cell was already cancelled.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let target = if may_interrupt {
            State::Interrupting
        } else {
            State::Cancelled
        };

        if self.state() != State::New || !self.state.transition(State::New, target, Ordering::SeqCst)
        {
            return false;
        }

        if may_interrupt {
            let runner = self.runner.load(Ordering::SeqCst);
            if !runner.is_null() {
                // SAFETY: the runner clears `runner` and then, seeing `Interrupting`, waits in
                // `run` until we store `Interrupted`, holding its `Arc<ThreadSignal>` alive
                // for the whole window in which we can observe the pointer.
                unsafe { (*runner).interrupt() };
            }
            self.state.store(State::Interrupted, Ordering::Release);
        }

        self.finish_completion();
        true
    }

    /// Block until the cell settles.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        let mut state = self.state();
        if !state.is_settled() {
            state = self.await_done(None)?;
        }
        self.report(state)
    }

    /// Block for at most `timeout`. The unit of work keeps running on timeout.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        let mut state = self.state();
        if !state.is_settled() {
            // An unrepresentable deadline waits like `get`.
            let deadline = Instant::now().checked_add(timeout);
            state = self.await_done(deadline)?;
            if !state.is_settled() {
                return Err(Error::Timeout);
            }
        }
        self.report(state)
    }

    /// Run `hook` once the cell reaches a terminal state (immediately if it already has).
    ///
    /// Any number of hooks may be registered; each runs exactly once, in registration order.
    pub fn on_complete<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.hooks.lock();
        match &mut *hooks {
            Hooks::Pending(pending) => pending.push(Box::new(hook)),
            Hooks::Fired => {
                drop(hooks);
                hook();
            }
        }
    }

    /// Number of retrievers currently parked on this cell.
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    fn report(&self, state: State) -> Result<T>
    where
        T: Clone,
    {
        match state {
            State::Normal | State::Exceptional => {
                // SAFETY: `state` was observed settled with Acquire, so the write is visible
                // and will never happen again.
                match unsafe { &*self.outcome.get() } {
                    Some(Ok(value)) => Ok(value.clone()),
                    Some(Err(cause)) => Err(Error::Execution(cause.clone())),
                    None => unreachable!("settled cell without outcome"),
                }
            }
            State::Cancelled | State::Interrupting | State::Interrupted => Err(Error::Cancelled),
            State::New | State::Completing => unreachable!("report on unsettled cell"),
        }
    }

    /// Park until settled, interrupted, or past `deadline`. Returns the last state seen.
    fn await_done(&self, deadline: Option<Instant>) -> Result<State> {
        let mut node: Option<&WaitNode> = None;
        let mut queued = false;

        loop {
            if interrupt::interrupted() {
                if let Some(node) = node {
                    self.give_up(node, queued);
                }
                return Err(Error::Interrupted);
            }

            let state = self.state();
            if state.is_settled() {
                match node {
                    Some(node) if queued => node.retire(),
                    Some(node) => self.waiters.release(node),
                    None => {}
                }
                return Ok(state);
            }

            if state == State::Completing {
                // The outcome is mid-write; this resolves without blocking.
                thread::yield_now();
                continue;
            }

            match node {
                None => {
                    if matches!(deadline, Some(d) if Instant::now() >= d) {
                        return Ok(state);
                    }
                    node = Some(self.waiters.alloc());
                }
                Some(current) if !queued => {
                    queued = self.waiters.try_push(current);
                }
                Some(current) => match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            self.waiters.remove(current);
                            return Ok(self.state());
                        }
                        thread::park_timeout(deadline - now);
                    }
                    None => thread::park(),
                },
            }
        }
    }

    fn give_up(&self, node: &WaitNode, queued: bool) {
        if queued {
            self.waiters.remove(node);
        } else {
            self.waiters.release(node);
        }
    }

    fn finish_completion(&self) {
        let woken = self.waiters.drain();
        if woken > 0 {
            tracing::trace!(woken, state = ?self.state(), "completion cell settled");
        }

        let work = self.work.lock().take();
        drop(work);

        let hooks = std::mem::replace(&mut *self.hooks.lock(), Hooks::Fired);
        if let Hooks::Pending(pending) = hooks {
            for hook in pending {
                hook();
            }
        }
    }
}

impl<T> fmt::Debug for CompletionCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCell")
            .field("state", &self.state())
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl<T> Handle<T> for CompletionCell<T>
where
    T: Clone + Send + Sync,
{
    fn get(&self) -> Result<T> {
        CompletionCell::get(self)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T> {
        CompletionCell::get_timeout(self, timeout)
    }

    fn is_done(&self) -> bool {
        CompletionCell::is_done(self)
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        CompletionCell::cancel(self, may_interrupt)
    }

    fn is_cancelled(&self) -> bool {
        CompletionCell::is_cancelled(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Debug, thiserror::Error)]
    #[error("bad record {0}")]
    struct BadRecord(u32);

    #[test]
    fn test_run_then_get() {
        let cell = CompletionCell::new(|| 6 * 7);
        assert_eq!(cell.state(), State::New);
        assert!(!cell.is_done());

        cell.run();

        assert_eq!(cell.state(), State::Normal);
        assert_eq!(cell.get().unwrap(), 42);
        assert_eq!(cell.get().unwrap(), 42);
    }

    #[test]
    fn test_run_is_idempotent() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let cell = CompletionCell::new(move || counter.fetch_add(1, Ordering::SeqCst));

        cell.run();
        cell.run();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cell.get().unwrap(), 0);
    }

    #[test]
    fn test_fallible_error_is_exceptional() {
        let cell: CompletionCell<u32> = CompletionCell::fallible(|| Err(BadRecord(3)));
        cell.run();

        assert_eq!(cell.state(), State::Exceptional);
        let err = cell.get().unwrap_err();
        let cause = err.cause().unwrap();
        assert_eq!(cause.downcast_ref::<BadRecord>().unwrap().0, 3);
    }

    #[test]
    fn test_panic_is_exceptional() {
        let cell: CompletionCell<u32> = CompletionCell::new(|| panic!("exploded"));
        cell.run();

        match cell.get() {
            Err(Error::Execution(Cause::Panic(msg))) => assert_eq!(msg, "exploded"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cancel_before_run_prevents_start() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let cell = CompletionCell::new(move || flag.store(true, Ordering::SeqCst));

        assert!(cell.cancel(false));
        assert_eq!(cell.state(), State::Cancelled);
        assert!(cell.is_cancelled());
        assert!(cell.is_done());

        cell.run();
        assert!(!ran.load(Ordering::SeqCst));
        assert!(matches!(cell.get(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let cell = CompletionCell::new(|| "done");
        cell.run();

        assert!(!cell.cancel(true));
        assert!(!cell.cancel(false));
        assert_eq!(cell.state(), State::Normal);
        assert_eq!(cell.get().unwrap(), "done");
    }

    #[test]
    fn test_cancel_twice() {
        let cell: CompletionCell<()> = CompletionCell::pending();
        assert!(cell.cancel(true));
        assert!(!cell.cancel(true));
        assert_eq!(cell.state(), State::Interrupted);
    }

    #[test]
    fn test_set_wins_once() {
        let cell = CompletionCell::pending();
        assert!(cell.set(1));
        assert!(!cell.set(2));
        assert!(!cell.set_failure(Cause::panic("late")));
        assert_eq!(cell.get().unwrap(), 1);
    }

    #[test]
    fn test_completed_cell() {
        let cell = CompletionCell::completed(String::from("ready"));
        assert!(cell.is_done());
        assert_eq!(cell.get_timeout(Duration::ZERO).unwrap(), "ready");

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        cell.on_complete(move || flag.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_get_blocks_until_run() {
        let cell = Arc::new(CompletionCell::new(|| 5));
        let runner = cell.clone();

        let waiter = thread::spawn({
            let cell = cell.clone();
            move || cell.get()
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        thread::spawn(move || runner.run()).join().unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), 5);
    }

    #[test]
    fn test_get_timeout_expires_then_recovers() {
        let cell: Arc<CompletionCell<u8>> = Arc::new(CompletionCell::pending());

        let start = Instant::now();
        let result = cell.get_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(cell.waiting(), 0);

        cell.set(9);
        assert_eq!(cell.get_timeout(Duration::from_millis(50)).unwrap(), 9);
    }

    #[test]
    fn test_zero_timeout_on_pending_cell() {
        let cell: CompletionCell<u8> = CompletionCell::pending();
        assert!(matches!(cell.get_timeout(Duration::ZERO), Err(Error::Timeout)));
    }

    #[test]
    fn test_interrupted_retriever() {
        let cell: Arc<CompletionCell<u8>> = Arc::new(CompletionCell::pending());
        let (tx, rx) = crossbeam_channel::bounded(1);

        let waiter = thread::spawn({
            let cell = cell.clone();
            move || {
                tx.send(interrupt::current()).unwrap();
                cell.get()
            }
        });

        let signal = rx.recv().unwrap();
        while cell.waiting() == 0 {
            thread::yield_now();
        }
        signal.interrupt();

        assert!(matches!(waiter.join().unwrap(), Err(Error::Interrupted)));
        assert_eq!(cell.waiting(), 0);
        assert_eq!(cell.state(), State::New);

        cell.set(1);
        assert_eq!(cell.get().unwrap(), 1);
    }

    #[test]
    fn test_cancel_with_interrupt_reaches_runner() {
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let observed = Arc::new(AtomicBool::new(false));
        let seen = observed.clone();

        let cell = Arc::new(CompletionCell::new(move || {
            started_tx.send(()).unwrap();
            if interrupt::sleep(Duration::from_secs(10)).is_err() {
                seen.store(true, Ordering::SeqCst);
            }
        }));

        let runner = thread::spawn({
            let cell = cell.clone();
            move || {
                cell.run();
                cell.state()
            }
        });

        started_rx.recv().unwrap();
        assert!(cell.cancel(true));

        assert_eq!(runner.join().unwrap(), State::Interrupted);
        assert!(observed.load(Ordering::SeqCst));
        assert!(matches!(cell.get(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancel_without_interrupt_leaves_runner_alone() {
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        let cell = Arc::new(CompletionCell::new(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            interrupt::is_interrupted()
        }));

        let runner = thread::spawn({
            let cell = cell.clone();
            move || cell.run()
        });

        started_rx.recv().unwrap();
        assert!(cell.cancel(false));
        release_tx.send(()).unwrap();
        runner.join().unwrap();

        assert_eq!(cell.state(), State::Cancelled);
        assert!(matches!(cell.get(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_work_released_on_completion() {
        let token = Arc::new(());
        let held = token.clone();
        let cell = CompletionCell::new(move || drop(held));
        assert_eq!(Arc::strong_count(&token), 2);

        cell.cancel(false);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_on_complete_runs_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cell = CompletionCell::new(|| 1);

        let counter = fired.clone();
        cell.on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        cell.run();
        cell.cancel(true);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let counter = fired.clone();
        cell.on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_every_registered_hook_fires() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let cell = CompletionCell::pending();

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            cell.on_complete(move || order.lock().push(tag));
        }
        assert!(order.lock().is_empty());

        assert!(cell.set(1u8));
        assert!(!cell.cancel(false));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_repeated_timed_gets_reuse_one_node() {
        let cell: CompletionCell<u32> = CompletionCell::pending();
        for _ in 0..2_000 {
            assert!(matches!(
                cell.get_timeout(Duration::from_micros(20)),
                Err(Error::Timeout)
            ));
        }
        assert_eq!(cell.waiting(), 0);
        assert_eq!(cell.waiters.allocated(), 1);

        // Interrupted retrievers give their node back as well.
        interrupt::current().interrupt();
        assert!(matches!(cell.get(), Err(Error::Interrupted)));
        assert_eq!(cell.waiters.allocated(), 1);

        assert!(cell.set(5));
        assert_eq!(cell.get_timeout(Duration::from_micros(20)).unwrap(), 5);
    }

    #[test]
    fn test_many_waiters_all_wake() {
        let cell: Arc<CompletionCell<usize>> = Arc::new(CompletionCell::pending());
        let waiters: Vec<_> = (0..16)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || cell.get())
            })
            .collect();

        while cell.waiting() < 4 {
            thread::yield_now();
        }
        cell.set(77);

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap(), 77);
        }
    }
}
