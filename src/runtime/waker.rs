//! Waker plumbing between tasks and the dispatcher.
//!
//! `std::task::Waker` must be `Send + Sync`, so the only thread-safe pieces
//! of the runtime live here: a mutex-guarded queue of woken task ids shared
//! between the dispatcher and every waker it hands out. Waking pushes the
//! task id and interrupts a blocking readiness wait; the dispatcher drains
//! the queue into its ready FIFO on each step.

use parking_lot::Mutex;
use polling::Poller;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Wake;

/// Queue of task ids woken since the dispatcher last drained it.
pub(crate) struct WokenQueue {
    woken: Mutex<Vec<u64>>,
    poller: Arc<Poller>,
}

impl WokenQueue {
    pub(crate) fn new(poller: Arc<Poller>) -> Self {
        Self {
            woken: Mutex::new(Vec::new()),
            poller,
        }
    }

    /// Record a woken task and interrupt a blocking wait.
    pub(crate) fn push(&self, id: u64) {
        self.woken.lock().push(id);
        let _ = self.poller.notify();
    }

    /// Take every id recorded since the last drain, in wake order.
    pub(crate) fn drain(&self) -> Vec<u64> {
        std::mem::take(&mut *self.woken.lock())
    }
}

/// Waker for a spawned task: re-queues the task by id.
pub(crate) struct TaskWaker {
    pub(crate) id: u64,
    pub(crate) queue: Arc<WokenQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.queue.push(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(self.id);
    }
}

/// Waker for the root future driven by `block_on`: sets a flag checked on
/// every loop turn and interrupts a blocking wait.
pub(crate) struct RootWaker {
    flag: AtomicBool,
    poller: Arc<Poller>,
}

impl RootWaker {
    pub(crate) fn new(poller: Arc<Poller>) -> Self {
        Self {
            // Start woken so the root future is polled at least once.
            flag: AtomicBool::new(true),
            poller,
        }
    }

    /// Clears the flag, returning whether a wake happened since last check.
    pub(crate) fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

impl Wake for RootWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.flag.store(true, Ordering::Release);
        let _ = self.poller.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    #[test]
    fn woken_queue_preserves_order() {
        let poller = Arc::new(Poller::new().expect("poller"));
        let queue = Arc::new(WokenQueue::new(poller));
        for id in [3u64, 1, 2] {
            let waker = Waker::from(Arc::new(TaskWaker {
                id,
                queue: Arc::clone(&queue),
            }));
            waker.wake();
        }
        assert_eq!(queue.drain(), vec![3, 1, 2]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn root_waker_flag() {
        let poller = Arc::new(Poller::new().expect("poller"));
        let root = Arc::new(RootWaker::new(poller));
        assert!(root.take());
        assert!(!root.take());
        Waker::from(Arc::clone(&root)).wake_by_ref();
        assert!(root.take());
    }
}
