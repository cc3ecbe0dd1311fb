//! Write-once result cells with ordered callback lists.
//!
//! A [`Promise`] holds one of {pending, completed, failed, cancelled}. It
//! transitions away from pending exactly once; completing or failing a
//! finished promise is a defect and panics. Callbacks registered while
//! pending are drained in insertion order through the dispatcher's ready
//! FIFO on any terminal transition, and each runs at most once.
//!
//! The producer side (a stream loop, a timer, an I/O source) owns write
//! access; any number of consumers may [`wait`](Promise::wait) or register
//! callbacks. Cancellation is a request, not an interrupt: a producer that
//! installed a cancel hook is given the first chance to finish the promise
//! from its own cleanup; if the hook leaves it pending, the promise
//! transitions to cancelled.

use crate::error::{Error, ErrorKind};
use crate::runtime::Dispatcher;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

enum State<T> {
    Pending,
    Completed(T),
    Failed(Error),
    Cancelled,
}

struct Inner<T> {
    state: State<T>,
    callbacks: Vec<(u64, Box<dyn FnOnce()>)>,
    next_callback_id: u64,
    cancel_hook: Option<Box<dyn FnOnce()>>,
    cancel_requested: bool,
    dispatcher: Dispatcher,
}

/// Identifier returned by [`Promise::add_callback`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

/// A write-once result cell. Cloning shares the cell.
pub struct Promise<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    /// Creates a pending promise bound to the current dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                callbacks: Vec::new(),
                next_callback_id: 0,
                cancel_hook: None,
                cancel_requested: false,
                dispatcher: Dispatcher::current(),
            })),
        }
    }

    /// Returns true while no terminal transition has happened.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending)
    }

    /// Returns true once the promise is completed, failed, or cancelled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Returns true if the promise ended in the cancelled state.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Cancelled)
    }

    /// Returns true once [`cancel`](Self::cancel) has been requested.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.inner.borrow().cancel_requested
    }

    /// Installs the producer's cancel hook, replacing any previous one.
    pub fn set_cancel_hook(&self, hook: impl FnOnce() + 'static) {
        self.inner.borrow_mut().cancel_hook = Some(Box::new(hook));
    }

    fn finish(&self, state: State<T>) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            assert!(
                matches!(inner.state, State::Pending),
                "promise already finished"
            );
            inner.state = state;
            std::mem::take(&mut inner.callbacks)
        };
        let dispatcher = self.inner.borrow().dispatcher.clone();
        for (_, cb) in callbacks {
            dispatcher.schedule(cb);
        }
    }

    /// Completes the promise with `value`.
    ///
    /// # Panics
    ///
    /// Panics if the promise is already finished (a defect).
    pub fn complete(&self, value: T) {
        self.finish(State::Completed(value));
    }

    /// Fails the promise with `error`.
    ///
    /// # Panics
    ///
    /// Panics if the promise is already finished (a defect).
    pub fn fail(&self, error: Error) {
        self.finish(State::Failed(error));
    }

    /// Requests cancellation.
    ///
    /// If a cancel hook is installed it is invoked exactly once and given
    /// the first chance to complete or fail the promise from the producer's
    /// cleanup; if the promise is still pending afterwards (or no hook was
    /// installed) it transitions to cancelled and callbacks are scheduled.
    pub fn cancel(&self) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.cancel_requested = true;
            inner.cancel_hook.take()
        };
        if let Some(hook) = hook {
            hook();
        }
        if self.is_pending() {
            self.finish(State::Cancelled);
        }
    }

    /// Registers a callback scheduled on any terminal transition; on an
    /// already-terminal promise it is scheduled immediately.
    pub fn add_callback(&self, cb: impl FnOnce() + 'static) -> CallbackId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_callback_id;
        inner.next_callback_id += 1;
        if matches!(inner.state, State::Pending) {
            inner.callbacks.push((id, Box::new(cb)));
        } else {
            inner.dispatcher.schedule(Box::new(cb));
        }
        CallbackId(id)
    }

    /// Removes a registered callback. Removing a callback that already ran
    /// or was never registered is a no-op.
    pub fn remove_callback(&self, id: CallbackId) {
        self.inner
            .borrow_mut()
            .callbacks
            .retain(|(cb_id, _)| *cb_id != id.0);
    }
}

impl<T: Clone> Promise<T> {
    /// Reads the terminal result: the value, the stored error, or a
    /// cancellation error. Returns `None` while pending.
    #[must_use]
    pub fn try_read(&self) -> Option<Result<T, Error>> {
        match &self.inner.borrow().state {
            State::Pending => None,
            State::Completed(v) => Some(Ok(v.clone())),
            State::Failed(e) => Some(Err(e.clone())),
            State::Cancelled => Some(Err(Error::new(ErrorKind::Cancelled))),
        }
    }

    /// Reads the terminal result.
    ///
    /// # Panics
    ///
    /// Panics if the promise is still pending (a defect).
    pub fn read(&self) -> Result<T, Error> {
        self.try_read().expect("promise still pending")
    }

    /// Returns a future that resolves with the terminal result.
    #[must_use]
    pub fn wait(&self) -> Wait<T> {
        Wait {
            promise: self.clone(),
            slot: Rc::new(Cell::new(None)),
            callback: None,
        }
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// Requests cancellation, then waits for the terminal state.
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let _ = self.wait().await;
    }

    /// Waits for the result, cancelling the promise if `timeout` elapses
    /// first. The losing side is reaped before this returns: on timeout the
    /// promise is cancelled and awaited to its terminal state; on
    /// completion the timer is dropped.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> Result<T, Error> {
        match crate::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel();
                let _ = self.wait().await;
                Err(Error::new(ErrorKind::TimedOut))
            }
        }
    }
}

/// Future returned by [`Promise::wait`].
pub struct Wait<T> {
    promise: Promise<T>,
    slot: Rc<Cell<Option<Waker>>>,
    callback: Option<CallbackId>,
}

impl<T: Clone + 'static> Future for Wait<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.promise.try_read() {
            return Poll::Ready(result);
        }
        self.slot.set(Some(cx.waker().clone()));
        if self.callback.is_none() {
            let slot = Rc::clone(&self.slot);
            let id = self.promise.add_callback(move || {
                if let Some(waker) = slot.take() {
                    waker.wake();
                }
            });
            self.callback = Some(id);
        }
        Poll::Pending
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        if let Some(id) = self.callback.take() {
            self.promise.remove_callback(id);
        }
    }
}

/// Resolves when every promise is terminal. Never fails: failed and
/// cancelled promises count as terminal.
pub async fn join_all<T: Clone + 'static>(promises: Vec<Promise<T>>) {
    for promise in promises {
        let _ = promise.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Dispatcher;

    #[test]
    fn callbacks_fire_in_registration_order() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        let promise: Promise<u32> = Promise::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = Rc::clone(&order);
            promise.add_callback(move || order.borrow_mut().push(i));
        }
        promise.complete(7);
        dispatcher.poll().expect("poll");
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn callback_on_terminal_promise_is_scheduled() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        let promise: Promise<()> = Promise::new();
        promise.complete(());
        let hit = Rc::new(Cell::new(false));
        {
            let hit = Rc::clone(&hit);
            promise.add_callback(move || hit.set(true));
        }
        assert!(!hit.get());
        dispatcher.poll().expect("poll");
        assert!(hit.get());
    }

    #[test]
    #[should_panic(expected = "promise already finished")]
    fn double_complete_is_a_defect() {
        let _dispatcher = Dispatcher::new().expect("dispatcher");
        let promise: Promise<u32> = Promise::new();
        promise.complete(1);
        promise.complete(2);
    }

    #[test]
    fn read_reports_each_terminal_state() {
        let _dispatcher = Dispatcher::new().expect("dispatcher");
        let done: Promise<u32> = Promise::new();
        done.complete(5);
        assert_eq!(done.read().expect("value"), 5);

        let failed: Promise<u32> = Promise::new();
        failed.fail(Error::new(ErrorKind::Protocol));
        assert_eq!(failed.read().unwrap_err().kind(), ErrorKind::Protocol);

        let cancelled: Promise<u32> = Promise::new();
        cancelled.cancel();
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.read().unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn cancel_hook_runs_once_and_may_finish_the_promise() {
        let _dispatcher = Dispatcher::new().expect("dispatcher");
        let promise: Promise<u32> = Promise::new();
        {
            let promise = promise.clone();
            let hook = promise.clone();
            hook.set_cancel_hook(move || promise.complete(99));
        }
        promise.cancel();
        assert_eq!(promise.read().expect("hook completed"), 99);
        // A second cancel on a terminal promise is a no-op.
        promise.cancel();
        assert_eq!(promise.read().expect("still completed"), 99);
    }

    #[test]
    fn cancel_without_hook_transitions_immediately() {
        let _dispatcher = Dispatcher::new().expect("dispatcher");
        let promise: Promise<u32> = Promise::new();
        promise.cancel();
        assert!(promise.is_cancelled());
        assert!(promise.cancel_requested());
    }

    #[test]
    fn removed_callback_never_fires() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        let promise: Promise<()> = Promise::new();
        let hit = Rc::new(Cell::new(false));
        let id = {
            let hit = Rc::clone(&hit);
            promise.add_callback(move || hit.set(true))
        };
        promise.remove_callback(id);
        promise.complete(());
        dispatcher.poll().expect("poll");
        assert!(!hit.get());
    }

    #[test]
    fn wait_resolves_through_block_on() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        let promise: Promise<&'static str> = Promise::new();
        {
            let promise = promise.clone();
            dispatcher.spawn(async move { promise.complete("done") });
        }
        let result = dispatcher.block_on(promise.wait());
        assert_eq!(result.expect("completed"), "done");
    }

    #[test]
    fn join_all_waits_for_every_terminal_state() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        let a: Promise<()> = Promise::new();
        let b: Promise<()> = Promise::new();
        let c: Promise<()> = Promise::new();
        {
            let (a, b, c) = (a.clone(), b.clone(), c.clone());
            dispatcher.spawn(async move {
                a.complete(());
                b.fail(Error::new(ErrorKind::Io));
                c.cancel();
            });
        }
        dispatcher.block_on(join_all(vec![a, b, c]));
    }
}
