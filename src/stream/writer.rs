//! Queued stream writer.
//!
//! Writes are serialized through a FIFO of write items, each carrying a
//! completion promise that resolves when and only when the item's bytes
//! have been fully accepted by the sink. Any future returned by
//! [`StreamWriter::write`] drives the queue head while it waits, so a
//! dropped (never-awaited) write still completes once a later write, flush,
//! or close is awaited.

use crate::error::{Error, ErrorKind};
use crate::io::AsyncWrite;
use crate::promise::{Promise, Wait};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Closing,
    Closed,
    Errored,
}

struct WriteItem {
    data: Vec<u8>,
    offset: usize,
    done: Promise<()>,
}

struct Shared<W> {
    sink: W,
    queue: VecDeque<WriteItem>,
    state: WriterState,
    close_promise: Promise<()>,
}

/// Cloneable handle to a queued writer over an [`AsyncWrite`] sink.
pub struct StreamWriter<W> {
    shared: Rc<RefCell<Shared<W>>>,
}

impl<W> Clone for StreamWriter<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<W: AsyncWrite + Unpin + 'static> StreamWriter<W> {
    /// Wraps `sink` with an empty write queue.
    #[must_use]
    pub fn new(sink: W) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                sink,
                queue: VecDeque::new(),
                state: WriterState::Open,
                close_promise: Promise::new(),
            })),
        }
    }

    /// Queues `data` for writing. The returned future resolves once every
    /// byte has been accepted by the sink; it also drives earlier queued
    /// items, in FIFO order, while it waits.
    pub fn write(&self, data: Vec<u8>) -> WriteFuture<W> {
        let done: Promise<()> = Promise::new();
        {
            let mut shared = self.shared.borrow_mut();
            match shared.state {
                WriterState::Open => {
                    if data.is_empty() {
                        done.complete(());
                    } else {
                        shared.queue.push_back(WriteItem {
                            data,
                            offset: 0,
                            done: done.clone(),
                        });
                    }
                }
                _ => done.fail(Error::closed().with_context("write on closed stream")),
            }
        }
        WriteFuture {
            shared: Rc::clone(&self.shared),
            wait: done.wait(),
        }
    }

    /// Drives the queue to empty, then flushes the sink.
    pub async fn flush(&self) -> Result<(), Error> {
        self.drain_queue().await?;
        let shared = Rc::clone(&self.shared);
        poll_fn(move |cx| {
            let mut s = shared.borrow_mut();
            Pin::new(&mut s.sink).poll_flush(cx)
        })
        .await?;
        Ok(())
    }

    /// Flushes pending writes, shuts the sink down, and completes the close
    /// promise. Idempotent: later calls (and concurrent callers) wait on
    /// the same close promise.
    pub async fn close_wait(&self) -> Result<(), Error> {
        {
            let mut shared = self.shared.borrow_mut();
            match shared.state {
                WriterState::Closed => return Ok(()),
                WriterState::Closing => {
                    let wait = shared.close_promise.wait();
                    drop(shared);
                    let _ = wait.await;
                    return Ok(());
                }
                WriterState::Open | WriterState::Errored => {
                    shared.state = WriterState::Closing;
                }
            }
        }
        // Best effort: a sink error here still ends in the closed state,
        // with stranded items failed.
        let _ = self.drain_queue().await;
        let shared = Rc::clone(&self.shared);
        let _ = poll_fn(move |cx| {
            let mut s = shared.borrow_mut();
            Pin::new(&mut s.sink).poll_flush(cx)
        })
        .await;
        let shared = Rc::clone(&self.shared);
        let _ = poll_fn(move |cx| {
            let mut s = shared.borrow_mut();
            Pin::new(&mut s.sink).poll_shutdown(cx)
        })
        .await;
        let close_promise = {
            let mut shared = self.shared.borrow_mut();
            fail_queue(&mut shared.queue, &Error::closed());
            shared.state = WriterState::Closed;
            shared.close_promise.clone()
        };
        close_promise.complete(());
        Ok(())
    }

    /// Promise completed when the writer reaches the closed state.
    #[must_use]
    pub fn close_promise(&self) -> Promise<()> {
        self.shared.borrow().close_promise.clone()
    }

    /// True once [`close_wait`](Self::close_wait) has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.borrow().state == WriterState::Closed
    }

    /// Number of items waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.borrow().queue.len()
    }

    async fn drain_queue(&self) -> Result<(), Error> {
        let shared = Rc::clone(&self.shared);
        poll_fn(move |cx| {
            drive_queue(&shared, cx);
            let s = shared.borrow();
            if s.queue.is_empty() || s.state == WriterState::Errored {
                Poll::Ready(Ok(()))
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

fn fail_queue(queue: &mut VecDeque<WriteItem>, error: &Error) {
    for item in queue.drain(..) {
        item.done.fail(error.clone());
    }
}

/// Makes as much progress on the queue head as the sink allows.
fn drive_queue<W: AsyncWrite + Unpin>(shared: &Rc<RefCell<Shared<W>>>, cx: &mut Context<'_>) {
    loop {
        let mut guard = shared.borrow_mut();
        if guard.state == WriterState::Errored || guard.state == WriterState::Closed {
            return;
        }
        let s = &mut *guard;
        let Some(front) = s.queue.front_mut() else { return };
        match Pin::new(&mut s.sink).poll_write(cx, &front.data[front.offset..]) {
            Poll::Ready(Ok(0)) => {
                let err = Error::new(ErrorKind::Io).with_context("sink accepted zero bytes");
                s.state = WriterState::Errored;
                fail_queue(&mut s.queue, &err);
                return;
            }
            Poll::Ready(Ok(n)) => {
                front.offset += n;
                if front.offset >= front.data.len() {
                    let item = s.queue.pop_front().expect("checked front");
                    drop(guard);
                    item.done.complete(());
                }
            }
            Poll::Ready(Err(e)) => {
                let err = Error::from(e);
                let head = s.queue.pop_front().expect("checked front");
                fail_queue(&mut s.queue, &Error::closed());
                s.state = WriterState::Errored;
                drop(guard);
                head.done.fail(err);
                return;
            }
            Poll::Pending => return,
        }
    }
}

/// Future returned by [`StreamWriter::write`].
pub struct WriteFuture<W> {
    shared: Rc<RefCell<Shared<W>>>,
    wait: Wait<()>,
}

impl<W: AsyncWrite + Unpin + 'static> Future for WriteFuture<W> {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        drive_queue(&self.shared, cx);
        match Pin::new(&mut self.wait).poll(cx) {
            Poll::Ready(result) => Poll::Ready(result.map(|()| ())),
            Poll::Pending => Poll::Pending,
        }
    }
}
