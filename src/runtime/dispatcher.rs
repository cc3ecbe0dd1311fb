//! The single-threaded cooperative dispatcher.
//!
//! One dispatcher drives everything on its thread: a timer heap, an fd
//! readiness source, and a FIFO of ready work. Ready work is either a
//! spawned task (re-queued by its waker) or a scheduled callback (queued by
//! a promise transition). A `poll` step fires due timers, waits for
//! readiness no longer than the next deadline, then drains the ready FIFO
//! completely; no runnable executes while another is on the loop's stack.
//!
//! The dispatcher is installed as the thread-local current dispatcher on
//! creation. Library code reaches it through [`Dispatcher::current`], which
//! lazily creates one on first use; tests construct a fresh dispatcher for
//! isolation.

use super::reactor::Reactor;
use super::timer::TimerHeap;
use super::waker::{RootWaker, TaskWaker, WokenQueue};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT: RefCell<Option<Dispatcher>> = const { RefCell::new(None) };
}

enum Runnable {
    Task(u64),
    Callback(Box<dyn FnOnce()>),
}

struct Task {
    /// Taken out while the task is being polled so the slab can be
    /// re-borrowed from inside the poll.
    future: Option<Pin<Box<dyn Future<Output = ()>>>>,
}

pub(crate) struct Inner {
    ready: RefCell<VecDeque<Runnable>>,
    tasks: RefCell<HashMap<u64, Task>>,
    next_task_id: Cell<u64>,
    timers: RefCell<TimerHeap>,
    reactor: Reactor,
    woken: Arc<WokenQueue>,
    in_poll: Cell<bool>,
}

/// Handle to the thread's dispatcher. Cloning is cheap.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<Inner>,
}

impl Dispatcher {
    /// Creates a dispatcher and installs it as the thread-local current one.
    pub fn new() -> io::Result<Self> {
        let reactor = Reactor::new()?;
        let woken = Arc::new(WokenQueue::new(reactor.poller()));
        let dispatcher = Self {
            inner: Rc::new(Inner {
                ready: RefCell::new(VecDeque::new()),
                tasks: RefCell::new(HashMap::new()),
                next_task_id: Cell::new(0),
                timers: RefCell::new(TimerHeap::new()),
                reactor,
                woken,
                in_poll: Cell::new(false),
            }),
        };
        CURRENT.with(|c| *c.borrow_mut() = Some(dispatcher.clone()));
        Ok(dispatcher)
    }

    /// Returns the thread's current dispatcher, creating one on first use.
    #[must_use]
    pub fn current() -> Self {
        if let Some(d) = Self::try_current() {
            return d;
        }
        Self::new().expect("failed to create dispatcher")
    }

    /// Returns the thread's current dispatcher, if one exists.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Spawns a task onto this dispatcher's ready FIFO.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.inner.next_task_id.get();
        self.inner.next_task_id.set(id + 1);
        self.inner.tasks.borrow_mut().insert(
            id,
            Task {
                future: Some(Box::pin(future)),
            },
        );
        self.inner.ready.borrow_mut().push_back(Runnable::Task(id));
    }

    /// Queues a callback behind everything already in the ready FIFO.
    pub(crate) fn schedule(&self, cb: Box<dyn FnOnce()>) {
        self.inner.ready.borrow_mut().push_back(Runnable::Callback(cb));
    }

    /// Advances the loop by one step.
    ///
    /// Fires every timer whose deadline has passed (heap order, insertion
    /// order on ties), waits for fd readiness no longer than the next timer
    /// deadline (not at all if ready work is pending), then drains the
    /// ready FIFO completely.
    pub fn poll(&self) -> io::Result<()> {
        assert!(!self.inner.in_poll.get(), "dispatcher re-entered");
        self.inner.in_poll.set(true);
        let result = self.poll_step();
        self.inner.in_poll.set(false);
        result
    }

    fn poll_step(&self) -> io::Result<()> {
        let now = Instant::now();
        let due = self.inner.timers.borrow_mut().fire_due(now);
        for waker in due {
            waker.wake();
        }
        self.drain_woken();

        let timeout = if self.inner.ready.borrow().is_empty() {
            self.inner
                .timers
                .borrow_mut()
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
        } else {
            Some(Duration::ZERO)
        };
        self.inner.reactor.wait(timeout)?;
        self.drain_woken();

        loop {
            let next = self.inner.ready.borrow_mut().pop_front();
            let Some(runnable) = next else { break };
            match runnable {
                Runnable::Task(id) => self.poll_task(id),
                Runnable::Callback(cb) => cb(),
            }
            self.drain_woken();
        }
        Ok(())
    }

    /// Loops [`poll`](Self::poll) until the readiness source fails.
    pub fn run_forever(&self) -> io::Result<()> {
        loop {
            self.poll()?;
        }
    }

    /// Drives the dispatcher until `future` resolves, then returns its
    /// output.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = Box::pin(future);
        let root = Arc::new(RootWaker::new(self.inner.reactor.poller()));
        let waker = Waker::from(Arc::clone(&root));
        let mut cx = Context::from_waker(&waker);
        loop {
            if root.take() {
                if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                    return value;
                }
            }
            self.poll().expect("dispatcher readiness source failed");
        }
    }

    fn drain_woken(&self) {
        let woken = self.inner.woken.drain();
        if woken.is_empty() {
            return;
        }
        let mut ready = self.inner.ready.borrow_mut();
        for id in woken {
            ready.push_back(Runnable::Task(id));
        }
    }

    fn poll_task(&self, id: u64) {
        let future = self
            .inner
            .tasks
            .borrow_mut()
            .get_mut(&id)
            .and_then(|t| t.future.take());
        let Some(mut future) = future else {
            // Already finished, or a spurious wake for a dead task.
            return;
        };
        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            queue: Arc::clone(&self.inner.woken),
        }));
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                self.inner.tasks.borrow_mut().remove(&id);
            }
            Poll::Pending => {
                if let Some(task) = self.inner.tasks.borrow_mut().get_mut(&id) {
                    task.future = Some(future);
                }
            }
        }
    }

    /// Number of live spawned tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    // === timer access (used by `time`) ===

    pub(crate) fn add_timer(&self, deadline: Instant) -> u64 {
        self.inner.timers.borrow_mut().insert(deadline)
    }

    pub(crate) fn set_timer_waker(&self, id: u64, waker: Waker) {
        self.inner.timers.borrow_mut().set_waker(id, waker);
    }

    pub(crate) fn cancel_timer(&self, id: u64) {
        self.inner.timers.borrow_mut().cancel(id);
    }

    // === reactor access (used by `net`) ===

    pub(crate) fn reactor_attach(&self, fd: RawFd) -> io::Result<()> {
        self.inner.reactor.attach(fd)
    }

    pub(crate) fn reactor_detach(&self, fd: RawFd) {
        self.inner.reactor.detach(fd);
    }

    pub(crate) fn park_reader(&self, fd: RawFd, waker: &Waker) -> io::Result<()> {
        self.inner.reactor.park_reader(fd, waker)
    }

    pub(crate) fn park_writer(&self, fd: RawFd, waker: &Waker) -> io::Result<()> {
        self.inner.reactor.park_writer(fd, waker)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tasks", &self.inner.tasks.borrow().len())
            .field("ready", &self.inner.ready.borrow().len())
            .finish_non_exhaustive()
    }
}
