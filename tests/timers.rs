//! Timer behavior under a real dispatcher.

use sprocket::promise::{join_all, Promise};
use sprocket::runtime::Dispatcher;
use sprocket::time::{interval, sleep, timeout};
use sprocket::ErrorKind;
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn concurrent_sleeps_of_equal_duration_complete_promptly() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    let start = Instant::now();
    let duration = Duration::from_millis(25);

    let mut settled = Vec::new();
    for _ in 0..16 {
        let done: Promise<()> = Promise::new();
        settled.push(done.clone());
        dispatcher.spawn(async move {
            sleep(duration).await;
            done.complete(());
        });
    }
    dispatcher.block_on(join_all(settled));

    let elapsed = start.elapsed();
    assert!(elapsed >= duration, "finished early: {elapsed:?}");
    // Generous bound for a loaded host; the point is that the sleeps run
    // concurrently, not back to back (16 * 25ms = 400ms).
    assert!(elapsed < Duration::from_millis(400), "too slow: {elapsed:?}");
}

#[test]
fn staggered_sleeps_fire_in_deadline_order() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));
    for (label, ms) in [("slow", 30u64), ("fast", 5), ("mid", 15)] {
        let order = Rc::clone(&order);
        dispatcher.spawn(async move {
            sleep(Duration::from_millis(ms)).await;
            order.borrow_mut().push(label);
        });
    }
    dispatcher.block_on(sleep(Duration::from_millis(60)));
    assert_eq!(*order.borrow(), vec!["fast", "mid", "slow"]);
}

#[test]
fn wait_with_timeout_cancels_the_pending_promise() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let never: Promise<u32> = Promise::new();
        let start = Instant::now();
        let err = never
            .wait_with_timeout(Duration::from_millis(20))
            .await
            .expect_err("timed out");
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
        // The loser was reaped: the promise is terminal, as cancelled.
        assert!(never.is_terminal());
        assert!(never.is_cancelled());
    });
}

#[test]
fn wait_with_timeout_returns_the_value_when_in_time() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let prompt: Promise<u32> = Promise::new();
        {
            let prompt = prompt.clone();
            sprocket::runtime::spawn(async move {
                sleep(Duration::from_millis(5)).await;
                prompt.complete(11);
            });
        }
        let value = prompt
            .wait_with_timeout(Duration::from_secs(5))
            .await
            .expect("in time");
        assert_eq!(value, 11);
    });
}

#[test]
fn timeout_over_sleep_reaps_the_long_timer() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    dispatcher.block_on(async {
        let result = timeout(Duration::from_millis(10), sleep(Duration::from_secs(600))).await;
        assert!(result.is_err());
        // A follow-up sleep completes promptly, proving the 600s timer no
        // longer pins the loop's wait.
        let start = Instant::now();
        sleep(Duration::from_millis(10)).await;
        assert!(start.elapsed() < Duration::from_secs(5));
    });
}

#[test]
fn interval_measures_from_the_previous_schedule() {
    let dispatcher = Dispatcher::new().expect("dispatcher");
    let ticks = Rc::new(Cell::new(0u32));
    dispatcher.block_on(async {
        let counter = Rc::clone(&ticks);
        let stop = interval(Duration::from_millis(10), move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        sleep(Duration::from_millis(105)).await;
        stop.complete(());
    });
    // ~10 ticks in 105ms; allow slack for a loaded host.
    let count = ticks.get();
    assert!((6..=11).contains(&count), "tick count {count}");
}
