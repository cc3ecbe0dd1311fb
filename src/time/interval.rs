//! Repeating interval timers.

use super::sleep::{sleep_until, Sleep};
use crate::error::Error;
use crate::promise::{Promise, Wait};
use crate::runtime;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Invokes `handler` every `period` until the returned promise is
/// completed or the handler returns an error.
///
/// Each deadline is measured from the previous scheduled deadline, not from
/// the previous completion, so handler latency does not accumulate drift.
pub fn interval<F>(period: Duration, mut handler: F) -> Promise<()>
where
    F: FnMut() -> Result<(), Error> + 'static,
{
    let stop: Promise<()> = Promise::new();
    let observed = stop.clone();
    runtime::spawn(async move {
        let mut next = Instant::now() + period;
        loop {
            let stopped = Tick {
                sleep: sleep_until(next),
                stop: observed.wait(),
            }
            .await;
            if stopped || observed.is_terminal() {
                break;
            }
            if handler().is_err() {
                break;
            }
            next += period;
        }
    });
    stop
}

/// Resolves `true` if the stop promise finished first, `false` when the
/// tick deadline passed.
struct Tick {
    sleep: Sleep,
    stop: Wait<()>,
}

impl Future for Tick {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        if Pin::new(&mut self.stop).poll(cx).is_ready() {
            return Poll::Ready(true);
        }
        match Pin::new(&mut self.sleep).poll(cx) {
            Poll::Ready(()) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::Dispatcher;
    use crate::time::sleep;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn ticks_until_stopped() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        let ticks = Rc::new(Cell::new(0u32));
        dispatcher.block_on(async {
            let counter = Rc::clone(&ticks);
            let stop = interval(Duration::from_millis(5), move || {
                counter.set(counter.get() + 1);
                Ok(())
            });
            sleep(Duration::from_millis(40)).await;
            stop.complete(());
            sleep(Duration::from_millis(20)).await;
            let after_stop = ticks.get();
            sleep(Duration::from_millis(20)).await;
            assert_eq!(ticks.get(), after_stop);
        });
        assert!(ticks.get() >= 3, "expected several ticks, got {}", ticks.get());
    }

    #[test]
    fn handler_error_terminates_the_interval() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        let ticks = Rc::new(Cell::new(0u32));
        dispatcher.block_on(async {
            let counter = Rc::clone(&ticks);
            let _stop = interval(Duration::from_millis(5), move || {
                counter.set(counter.get() + 1);
                Err(Error::new(ErrorKind::Io))
            });
            sleep(Duration::from_millis(40)).await;
        });
        assert_eq!(ticks.get(), 1);
    }
}
