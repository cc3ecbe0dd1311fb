//! File-descriptor readiness source.
//!
//! Registrations are keyed by raw fd with separate reader and writer waker
//! slots. The underlying `polling::Poller` is oneshot: delivered events
//! clear the armed interest, so interest is re-armed whenever a waker is
//! parked and re-computed after each delivery for whichever slot is still
//! occupied.

use polling::{Event, Poller};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::task::Waker;
use std::time::Duration;

#[derive(Debug)]
struct FdEntry {
    fd: RawFd,
    reader: Option<Waker>,
    writer: Option<Waker>,
}

fn interest_event(key: usize, readable: bool, writable: bool) -> Event {
    match (readable, writable) {
        (true, true) => Event::all(key),
        (true, false) => Event::readable(key),
        (false, true) => Event::writable(key),
        (false, false) => Event::none(key),
    }
}

/// Readiness source owned by the dispatcher.
pub(crate) struct Reactor {
    poller: Arc<Poller>,
    entries: RefCell<HashMap<usize, FdEntry>>,
    events: RefCell<Vec<Event>>,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Arc::new(Poller::new()?),
            entries: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::with_capacity(64)),
        })
    }

    pub(crate) fn poller(&self) -> Arc<Poller> {
        Arc::clone(&self.poller)
    }

    /// Registers a descriptor with no armed interest.
    pub(crate) fn attach(&self, fd: RawFd) -> io::Result<()> {
        let key = fd as usize;
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "fd already registered",
            ));
        }
        self.poller.add(fd, Event::none(key))?;
        entries.insert(
            key,
            FdEntry {
                fd,
                reader: None,
                writer: None,
            },
        );
        Ok(())
    }

    /// Removes a descriptor. Parked wakers are dropped without firing.
    pub(crate) fn detach(&self, fd: RawFd) {
        let key = fd as usize;
        if self.entries.borrow_mut().remove(&key).is_some() {
            let _ = self.poller.delete(fd);
        }
    }

    /// Parks a waker to fire when the descriptor becomes readable.
    pub(crate) fn park_reader(&self, fd: RawFd, waker: &Waker) -> io::Result<()> {
        self.park(fd, waker, true)
    }

    /// Parks a waker to fire when the descriptor becomes writable.
    pub(crate) fn park_writer(&self, fd: RawFd, waker: &Waker) -> io::Result<()> {
        self.park(fd, waker, false)
    }

    fn park(&self, fd: RawFd, waker: &Waker, read: bool) -> io::Result<()> {
        let key = fd as usize;
        let mut entries = self.entries.borrow_mut();
        let entry = entries.get_mut(&key).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "fd not registered with reactor")
        })?;
        if read {
            entry.reader = Some(waker.clone());
        } else {
            entry.writer = Some(waker.clone());
        }
        let ev = interest_event(key, entry.reader.is_some(), entry.writer.is_some());
        self.poller.modify(entry.fd, ev)
    }

    /// Blocks until readiness or `timeout`, waking parked wakers for every
    /// delivered event. Returns the number of events delivered.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut events = self.events.borrow_mut();
        events.clear();
        match self.poller.wait(&mut events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let mut entries = self.entries.borrow_mut();
        for ev in events.iter() {
            let Some(entry) = entries.get_mut(&ev.key) else {
                continue;
            };
            if ev.readable {
                if let Some(waker) = entry.reader.take() {
                    waker.wake();
                }
            }
            if ev.writable {
                if let Some(waker) = entry.writer.take() {
                    waker.wake();
                }
            }
            // Oneshot delivery cleared the armed interest; re-arm for the
            // slot that is still parked.
            if entry.reader.is_some() || entry.writer.is_some() {
                let ev =
                    interest_event(ev.key, entry.reader.is_some(), entry.writer.is_some());
                let _ = self.poller.modify(entry.fd, ev);
            }
        }
        Ok(events.len())
    }

    #[cfg(test)]
    pub(crate) fn registration_count(&self) -> usize {
        self.entries.borrow().len()
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("registrations", &self.entries.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWake(Arc<AtomicUsize>);

    impl Wake for CountingWake {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn attach_detach_roundtrip() {
        let reactor = Reactor::new().expect("reactor");
        let (a, _b) = UnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).expect("nonblocking");
        reactor.attach(a.as_raw_fd()).expect("attach");
        assert_eq!(reactor.registration_count(), 1);
        assert!(reactor.attach(a.as_raw_fd()).is_err());
        reactor.detach(a.as_raw_fd());
        assert_eq!(reactor.registration_count(), 0);
    }

    #[test]
    fn readable_event_wakes_parked_reader() {
        let reactor = Reactor::new().expect("reactor");
        let (a, mut b) = UnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).expect("nonblocking");
        reactor.attach(a.as_raw_fd()).expect("attach");

        let count = Arc::new(AtomicUsize::new(0));
        let waker = Waker::from(Arc::new(CountingWake(Arc::clone(&count))));
        reactor.park_reader(a.as_raw_fd(), &waker).expect("park");

        b.write_all(b"x").expect("write");
        reactor
            .wait(Some(Duration::from_secs(1)))
            .expect("wait");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        reactor.detach(a.as_raw_fd());
    }

    #[test]
    fn wait_times_out_without_events() {
        let reactor = Reactor::new().expect("reactor");
        let n = reactor
            .wait(Some(Duration::from_millis(20)))
            .expect("wait");
        assert_eq!(n, 0);
    }
}
