//! Lock-free stack of parked retrievers.
//!
//! Nodes are pushed with a CAS on `head` and detached in one swap when the cell settles.
//! A retriever that gives up (timeout or interrupt) retires its node and sweeps retired nodes
//! out of the stack. Sweeps are serialized, so a node they unlink is unreachable from `head`
//! from then on. Unlinked nodes are recycled for later retrievers once no traversal that
//! could still be standing on them is in flight; the memory itself is owned by a push-only
//! `arena` list and released when the stack is dropped.

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::thread::{self, Thread};

pub(crate) struct WaitNode {
    // Rewritten only while the node is spare, i.e. unreachable and unowned.
    thread: UnsafeCell<Thread>,
    // Cleared by the owning retriever alone, as its last access to the node.
    live: AtomicBool,
    next: AtomicPtr<WaitNode>,
    arena_next: AtomicPtr<WaitNode>,
}

impl WaitNode {
    /// The owner no longer needs waking and will not touch the node again.
    pub(crate) fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }

    fn as_ptr(&self) -> *mut WaitNode {
        self as *const WaitNode as *mut WaitNode
    }

    fn unpark(&self) {
        // SAFETY: `thread` is only written while the node is spare, and a spare node is not
        // reachable by any traversal.
        unsafe { (*self.thread.get()).unpark() };
    }
}

#[derive(Default)]
struct Spare {
    // Unlinked, but a traversal that started earlier may still read them.
    limbo: Vec<*mut WaitNode>,
    // Ready for reuse.
    free: Vec<*mut WaitNode>,
}

pub(crate) struct WaitStack {
    head: AtomicPtr<WaitNode>,
    arena: AtomicPtr<WaitNode>,
    allocated: AtomicUsize,
    // Traversals (`drain`, `len`) in flight.
    readers: AtomicUsize,
    // Also serializes sweeps.
    spare: Mutex<Spare>,
}

// SAFETY: the raw pointers all refer to arena nodes owned by the stack; see the protocol above.
unsafe impl Send for WaitStack {}
unsafe impl Sync for WaitStack {}

impl WaitStack {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            arena: AtomicPtr::new(ptr::null_mut()),
            allocated: AtomicUsize::new(0),
            readers: AtomicUsize::new(0),
            spare: Mutex::new(Spare::default()),
        }
    }

    /// A node for the calling thread, recycled when one is spare.
    pub(crate) fn alloc(&self) -> &WaitNode {
        let recycled = {
            let mut spare = self.spare.lock();
            self.recycle(&mut spare);
            spare.free.pop()
        };

        if let Some(node) = recycled {
            // SAFETY: free nodes are unreachable from `head`, no traversal predating their
            // unlinking is still running, and their previous owner retired them. Arena
            // memory lives until Drop, which needs `&mut self`.
            let node = unsafe { &*node };
            unsafe { *node.thread.get() = thread::current() };
            node.next.store(ptr::null_mut(), Ordering::Relaxed);
            node.live.store(true, Ordering::Release);
            return node;
        }

        let node = Box::into_raw(Box::new(WaitNode {
            thread: UnsafeCell::new(thread::current()),
            live: AtomicBool::new(true),
            next: AtomicPtr::new(ptr::null_mut()),
            arena_next: AtomicPtr::new(ptr::null_mut()),
        }));

        let mut top = self.arena.load(Ordering::Acquire);
        loop {
            // SAFETY: `node` came from Box::into_raw above and is not yet shared.
            unsafe { (*node).arena_next.store(top, Ordering::Relaxed) };
            match self
                .arena
                .compare_exchange_weak(top, node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => top = actual,
            }
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);

        // SAFETY: arena nodes are only freed in Drop.
        unsafe { &*node }
    }

    /// One push attempt. Callers re-check the cell state between attempts.
    pub(crate) fn try_push(&self, node: &WaitNode) -> bool {
        let top = self.head.load(Ordering::Acquire);
        node.next.store(top, Ordering::Relaxed);
        self.head
            .compare_exchange(top, node.as_ptr(), Ordering::SeqCst, Ordering::Acquire)
            .is_ok()
    }

    /// Give back a node that never made it onto the stack.
    pub(crate) fn release(&self, node: &WaitNode) {
        node.retire();
        self.spare.lock().free.push(node.as_ptr());
    }

    /// Detach the whole stack and unpark every live waiter. Returns how many were woken.
    pub(crate) fn drain(&self) -> usize {
        self.reading(|| {
            let top = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
            let mut woken = 0;
            let mut q = top;
            while !q.is_null() {
                // SAFETY: reachable nodes are not recycled while `readers` is raised.
                let node = unsafe { &*q };
                let next = node.next.load(Ordering::SeqCst);
                if node.live.load(Ordering::Acquire) {
                    node.unpark();
                    woken += 1;
                }
                q = next;
            }
            woken
        })
    }

    /// Retire `node` and unlink every retired node reachable from `head`.
    pub(crate) fn remove(&self, node: &WaitNode) {
        node.retire();

        let mut spare = self.spare.lock();
        'retry: loop {
            let mut pred: *mut WaitNode = ptr::null_mut();
            let mut q = self.head.load(Ordering::SeqCst);
            while !q.is_null() {
                // SAFETY: only this sweep (holding `spare`) recycles nodes, and it has not
                // yet released anything it unlinks.
                let current = unsafe { &*q };
                let succ = current.next.load(Ordering::SeqCst);
                if current.live.load(Ordering::Acquire) {
                    pred = q;
                } else if !pred.is_null() {
                    // SAFETY: as above. Only sweeps write `next` of a linked node.
                    unsafe { (*pred).next.store(succ, Ordering::SeqCst) };
                    spare.limbo.push(q);
                } else if self
                    .head
                    .compare_exchange(q, succ, Ordering::SeqCst, Ordering::Acquire)
                    .is_ok()
                {
                    spare.limbo.push(q);
                } else {
                    // A push or a drain moved `head`.
                    continue 'retry;
                }
                q = succ;
            }
            break;
        }
        self.recycle(&mut spare);
    }

    /// Number of live nodes currently linked.
    pub(crate) fn len(&self) -> usize {
        self.reading(|| {
            let mut count = 0;
            let mut q = self.head.load(Ordering::SeqCst);
            while !q.is_null() {
                // SAFETY: reachable nodes are not recycled while `readers` is raised.
                let node = unsafe { &*q };
                if node.live.load(Ordering::Acquire) {
                    count += 1;
                }
                q = node.next.load(Ordering::SeqCst);
            }
            count
        })
    }

    /// Nodes ever allocated by this stack.
    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    fn reading<R>(&self, f: impl FnOnce() -> R) -> R {
        self.readers.fetch_add(1, Ordering::SeqCst);
        let result = f();
        self.readers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    // Limbo nodes become reusable once no traversal is in flight: any traversal starting
    // later loads `head` after they were unlinked and cannot reach them.
    fn recycle(&self, spare: &mut Spare) {
        if !spare.limbo.is_empty() && self.readers.load(Ordering::SeqCst) == 0 {
            let limbo = mem::take(&mut spare.limbo);
            spare.free.extend(limbo);
        }
    }
}

impl Drop for WaitStack {
    fn drop(&mut self) {
        let mut q = *self.arena.get_mut();
        while !q.is_null() {
            // SAFETY: every arena node came from Box::into_raw in `alloc` and appears once.
            let node = unsafe { Box::from_raw(q) };
            q = node.arena_next.load(Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_and_drain() {
        let stack = WaitStack::new();
        for _ in 0..3 {
            let node = stack.alloc();
            assert!(stack.try_push(node));
        }
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.drain(), 3);
        assert_eq!(stack.len(), 0);
        assert_eq!(stack.drain(), 0);
    }

    #[test]
    fn test_remove_middle_node() {
        let stack = WaitStack::new();
        let a = stack.alloc();
        let b = stack.alloc();
        let c = stack.alloc();
        assert!(stack.try_push(a));
        assert!(stack.try_push(b));
        assert!(stack.try_push(c));

        stack.remove(b);
        assert_eq!(stack.len(), 2);
        stack.remove(c);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.drain(), 1);
    }

    #[test]
    fn test_retired_nodes_are_not_woken() {
        let stack = WaitStack::new();
        let a = stack.alloc();
        assert!(stack.try_push(a));
        a.retire();
        assert_eq!(stack.drain(), 0);
    }

    #[test]
    fn test_concurrent_remove() {
        let stack = Arc::new(WaitStack::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stack = stack.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let node = stack.alloc();
                    while !stack.try_push(node) {}
                    std::thread::sleep(Duration::from_micros(10));
                    stack.remove(node);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stack.len(), 0);
        assert_eq!(stack.drain(), 0);
        // Each thread holds at most one node at a time and removed nodes are reused.
        assert!(stack.allocated() <= 8);
    }

    #[test]
    fn test_removed_nodes_are_reused() {
        let stack = WaitStack::new();
        let keeper = stack.alloc();
        assert!(stack.try_push(keeper));

        for _ in 0..1_000 {
            let node = stack.alloc();
            assert!(stack.try_push(node));
            stack.remove(node);
        }

        assert_eq!(stack.allocated(), 2);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.drain(), 1);
    }

    #[test]
    fn test_released_node_is_reused() {
        let stack = WaitStack::new();
        let node = stack.alloc();
        stack.release(node);
        let again = stack.alloc();
        assert!(stack.try_push(again));
        assert_eq!(stack.allocated(), 1);
        assert_eq!(stack.len(), 1);
    }
}
