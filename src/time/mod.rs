//! Sleep, timeout, and interval primitives.
//!
//! All three ride the dispatcher's timer heap. [`sleep`] registers a heap
//! timer on first poll and removes it when dropped, so cancelling a sleep
//! is just dropping the future. [`timeout`] races a sleep against another
//! future and drops the loser. [`interval`] re-arms from the previous
//! scheduled deadline (not the previous completion), so a slow handler does
//! not drift the schedule.

mod interval;
mod sleep;
mod timeout;

pub use interval::interval;
pub use sleep::{sleep, sleep_until, Sleep};
pub use timeout::{timeout, Elapsed, Timeout};
