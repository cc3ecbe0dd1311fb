//! Timer heap for the dispatcher.
//!
//! Timers live in a binary heap keyed by `(deadline, insertion sequence)`,
//! so equal deadlines fire in insertion order. Cancellation is
//! generation-based: a cancelled id goes into a set consulted lazily when
//! the entry surfaces at the top of the heap, which keeps cancel O(1) and
//! amortizes the removal into subsequent pops.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::task::Waker;
use std::time::Instant;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: u64,
}

/// Heap of pending timers, owned by the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    /// Live timer ids mapped to the waker to fire, if one was parked.
    live: HashMap<u64, Option<Waker>>,
    cancelled: HashSet<u64>,
    next_id: u64,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a timer, returning its id.
    pub(crate) fn insert(&mut self, deadline: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TimerEntry { deadline, seq, id }));
        self.live.insert(id, None);
        id
    }

    /// Parks the waker to fire when the timer elapses.
    pub(crate) fn set_waker(&mut self, id: u64, waker: Waker) {
        if let Some(slot) = self.live.get_mut(&id) {
            *slot = Some(waker);
        }
    }

    /// Cancels a timer. A cancelled timer never fires its waker.
    pub(crate) fn cancel(&mut self, id: u64) {
        if self.live.remove(&id).is_some() {
            self.cancelled.insert(id);
        }
    }

    /// Pops every timer with `deadline <= now`, in heap order, returning
    /// the wakers to fire.
    pub(crate) fn fire_due(&mut self, now: Instant) -> Vec<Waker> {
        let mut due = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry");
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            if let Some(waker) = self.live.remove(&entry.id).flatten() {
                due.push(waker);
            }
        }
        due
    }

    /// Earliest pending deadline, skipping cancelled entries.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.cancelled.contains(&top.id) {
                let Reverse(entry) = self.heap.pop().expect("peeked entry");
                self.cancelled.remove(&entry.id);
                continue;
            }
            return Some(top.deadline);
        }
        None
    }

    /// Number of live (not cancelled, not fired) timers.
    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::Wake;
    use std::time::Duration;

    struct CountingWake(Arc<AtomicUsize>);

    impl Wake for CountingWake {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Waker, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let waker = Waker::from(Arc::new(CountingWake(Arc::clone(&count))));
        (waker, count)
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let a = heap.insert(now);
        let b = heap.insert(now);
        assert!(a < b);

        // Distinguish wakers by a side effect counter: fire order is the
        // returned Vec order.
        let (wa, ca) = counting_waker();
        let (wb, cb) = counting_waker();
        heap.set_waker(a, wa);
        heap.set_waker(b, wb);

        let due = heap.fire_due(now);
        assert_eq!(due.len(), 2);
        due[0].wake_by_ref();
        assert_eq!((ca.load(Ordering::SeqCst), cb.load(Ordering::SeqCst)), (1, 0));
        due[1].wake_by_ref();
        assert_eq!(cb.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let id = heap.insert(now);
        let (waker, count) = counting_waker();
        heap.set_waker(id, waker);
        heap.cancel(id);
        assert!(heap.fire_due(now).is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn next_deadline_skips_cancelled() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let soon = heap.insert(now + Duration::from_millis(1));
        let _later = heap.insert(now + Duration::from_millis(50));
        heap.cancel(soon);
        let next = heap.next_deadline().expect("one live timer");
        assert_eq!(next, now + Duration::from_millis(50));
    }

    #[test]
    fn fire_due_leaves_future_timers() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        heap.insert(now);
        heap.insert(now + Duration::from_secs(60));
        let fired = heap.fire_due(now);
        // No waker parked on the due timer, so nothing to fire, but the
        // future timer must remain.
        assert!(fired.is_empty());
        assert!(heap.next_deadline().is_some());
    }
}
