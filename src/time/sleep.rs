//! Sleep future for delaying execution.

use crate::runtime::Dispatcher;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// A future that completes once its deadline has passed.
///
/// The heap timer is registered lazily on first poll and removed again when
/// the future is dropped, so an abandoned sleep costs the heap nothing past
/// its next pop.
#[derive(Debug)]
pub struct Sleep {
    deadline: Instant,
    timer: Option<(Dispatcher, u64)>,
}

impl Sleep {
    /// Returns the absolute deadline.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Sleeps for `duration` from now.
#[must_use]
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Sleeps until `deadline`.
#[must_use]
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        timer: None,
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            if let Some((dispatcher, id)) = self.timer.take() {
                dispatcher.cancel_timer(id);
            }
            return Poll::Ready(());
        }
        if self.timer.is_none() {
            let dispatcher = Dispatcher::current();
            let id = dispatcher.add_timer(self.deadline);
            self.timer = Some((dispatcher, id));
        }
        let (dispatcher, id) = self.timer.as_ref().expect("timer registered");
        dispatcher.set_timer_waker(*id, cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some((dispatcher, id)) = self.timer.take() {
            dispatcher.cancel_timer(id);
        }
    }
}
