//! In-memory duplex pipe.
//!
//! Two handles, each reading what the other wrote, with a bounded buffer
//! per direction. Useful for wiring stream stacks (chunked, bounded, TLS)
//! together in tests and tools without a socket.

use super::{AsyncRead, AsyncWrite, ReadBuf};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Debug, Default)]
struct Pipe {
    buffer: VecDeque<u8>,
    closed: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    // Directions are named from handle A's point of view.
    a_to_b: Pipe,
    b_to_a: Pipe,
}

/// One endpoint of an in-memory duplex pipe.
#[derive(Debug)]
pub struct DuplexStream {
    shared: Rc<RefCell<Shared>>,
    is_a: bool,
}

/// Creates a connected pair of in-memory streams with `capacity` bytes of
/// buffering in each direction.
#[must_use]
pub fn duplex(capacity: usize) -> (DuplexStream, DuplexStream) {
    let shared = Rc::new(RefCell::new(Shared {
        capacity: capacity.max(1),
        a_to_b: Pipe::default(),
        b_to_a: Pipe::default(),
    }));
    (
        DuplexStream {
            shared: Rc::clone(&shared),
            is_a: true,
        },
        DuplexStream {
            shared,
            is_a: false,
        },
    )
}

impl AsyncRead for DuplexStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut shared = this.shared.borrow_mut();
        let pipe = if this.is_a {
            &mut shared.b_to_a
        } else {
            &mut shared.a_to_b
        };
        if pipe.buffer.is_empty() {
            if pipe.closed {
                return Poll::Ready(Ok(()));
            }
            pipe.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = pipe.buffer.len().min(buf.remaining());
        for _ in 0..n {
            let byte = pipe.buffer.pop_front().expect("checked non-empty");
            buf.put_slice(&[byte]);
        }
        if let Some(waker) = pipe.write_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for DuplexStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let mut shared = this.shared.borrow_mut();
        let capacity = shared.capacity;
        let pipe = if this.is_a {
            &mut shared.a_to_b
        } else {
            &mut shared.b_to_a
        };
        if pipe.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "duplex peer closed",
            )));
        }
        let room = capacity.saturating_sub(pipe.buffer.len());
        if room == 0 {
            pipe.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = room.min(buf.len());
        pipe.buffer.extend(&buf[..n]);
        if let Some(waker) = pipe.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut shared = this.shared.borrow_mut();
        let pipe = if this.is_a {
            &mut shared.a_to_b
        } else {
            &mut shared.b_to_a
        };
        pipe.closed = true;
        if let Some(waker) = pipe.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for DuplexStream {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        let pipe = if self.is_a {
            &mut shared.a_to_b
        } else {
            &mut shared.b_to_a
        };
        pipe.closed = true;
        if let Some(waker) = pipe.read_waker.take() {
            waker.wake();
        }
    }
}
