//! The dispatcher, timer heap, and fd readiness source.
//!
//! Exactly one dispatcher runs per worker thread (there is exactly one
//! worker). See [`Dispatcher`] for the loop contract.

mod dispatcher;
mod reactor;
mod timer;
mod waker;

pub use dispatcher::Dispatcher;

use std::future::Future;

/// Spawns a task onto the thread's current dispatcher.
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    Dispatcher::current().spawn(future);
}

/// Drives the thread's current dispatcher until `future` resolves.
pub fn block_on<F: Future>(future: F) -> F::Output {
    Dispatcher::current().block_on(future)
}
