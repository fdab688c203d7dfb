//! Work queue and termination detection for the traversal workers.
//!
//! Every pushed item increments an outstanding-work counter and every finished
//! task decrements it. The traversal is complete when the counter is back to
//! zero: the queue is empty and no worker is in the middle of an expansion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// How a wait on the barrier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// All pushed work was processed.
    Drained,
    /// The traversal was shut down before draining.
    Cancelled,
}

/// Counting completion group: outstanding work plus a notification for the
/// waiters interested in it reaching zero.
#[derive(Debug, Default)]
pub struct TerminationBarrier {
    outstanding: AtomicUsize,
    cancelled: AtomicBool,
    lock: Mutex<()>,
    settled: Condvar,
}

impl TerminationBarrier {
    /// Create a barrier with no outstanding work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of work.
    pub fn add(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark one unit of work as finished.
    pub fn done(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "termination barrier underflow");
        if previous == 1 {
            // notify under the lock so a waiter between its check and its
            // wait cannot miss the wakeup
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.settled.notify_all();
        }
    }

    /// Release every waiter without waiting for the work to drain.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.settled.notify_all();
    }

    /// Outstanding work units.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn settled_state(&self) -> Option<Completion> {
        if self.is_cancelled() {
            Some(Completion::Cancelled)
        } else if self.outstanding() == 0 {
            Some(Completion::Drained)
        } else {
            None
        }
    }

    /// Block until the work drains or the barrier is cancelled.
    pub fn wait(&self) -> Completion {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(completion) = self.settled_state() {
                return completion;
            }
            guard = self.settled.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait at most `timeout`; `None` when still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(completion) = self.settled_state() {
            return Some(completion);
        }
        let (_guard, _) = self
            .settled
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        self.settled_state()
    }
}

struct Pending<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Concurrent FIFO of pending work, tied to a [`TerminationBarrier`].
pub struct WorkQueue<T> {
    pending: Mutex<Pending<T>>,
    available: Condvar,
    barrier: TerminationBarrier,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    /// Create an open, empty queue.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            barrier: TerminationBarrier::new(),
        }
    }

    /// Enqueue an item, registering it as outstanding work and waking one
    /// waiting worker. Returns false (and drops the item) once closed.
    pub fn push(&self, item: T) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.closed {
            return false;
        }
        self.barrier.add();
        pending.items.push_back(item);
        self.available.notify_one();
        true
    }

    /// Dequeue the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed. The caller owes a
    /// [`task_done`](Self::task_done) for every item it receives.
    pub fn pop(&self) -> Option<T> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if pending.closed {
                return None;
            }
            if let Some(item) = pending.items.pop_front() {
                return Some(item);
            }
            pending = self
                .available
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Report that a dequeued item has been fully processed.
    pub fn task_done(&self) {
        self.barrier.done();
    }

    /// Guard that calls [`task_done`](Self::task_done) when dropped, even
    /// if processing panics.
    pub fn task_guard(&self) -> TaskGuard<'_, T> {
        TaskGuard { queue: self }
    }

    /// Close the queue: pending items are discarded and every blocked
    /// worker returns from [`pop`](Self::pop).
    pub fn close(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.closed = true;
        pending.items.clear();
        self.available.notify_all();
    }

    /// Close the queue and release anyone waiting for completion.
    pub fn cancel(&self) {
        self.close();
        self.barrier.cancel();
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    /// Items waiting to be picked up.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).items.len()
    }

    /// True when no item is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The completion barrier.
    pub fn barrier(&self) -> &TerminationBarrier {
        &self.barrier
    }
}

/// Decrements the outstanding-work counter on drop.
pub struct TaskGuard<'a, T> {
    queue: &'a WorkQueue<T>,
}

impl<T> Drop for TaskGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.task_done();
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
}

impl<T: Send> Cancel for WorkQueue<T> {
    fn cancel(&self) {
        WorkQueue::cancel(self)
    }

    fn is_cancelled(&self) -> bool {
        self.barrier.is_cancelled()
    }
}

/// Cloneable handle that stops a running traversal from any thread.
///
/// Nodes still queued are discarded. Expansions already in flight run to
/// completion and their results are kept.
#[derive(Clone)]
pub struct ShutdownHandle {
    target: Arc<dyn Cancel>,
}

impl ShutdownHandle {
    /// Create a handle for `queue`.
    pub fn new<T: Send + 'static>(queue: Arc<WorkQueue<T>>) -> Self {
        Self { target: queue }
    }

    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        self.target.cancel();
    }

    /// Whether shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        self.target.is_cancelled()
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
