//! Split a combined read/write stream into separate halves.
//!
//! The halves share the stream through an `Rc<RefCell<..>>`; each poll
//! borrows it only for the duration of that poll, so a reader task and a
//! writer task can both hold a half. Both halves may also coexist with an
//! outside `Rc` clone (the HTTP connection keeps one to force-close the
//! transport).

use super::{AsyncRead, AsyncWrite, ReadBuf};
use std::cell::RefCell;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Splits `stream` into read and write halves.
pub fn split<T>(stream: T) -> (ReadHalf<T>, WriteHalf<T>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    split_shared(Rc::new(RefCell::new(stream)))
}

/// Splits an already-shared stream into read and write halves.
pub fn split_shared<T>(shared: Rc<RefCell<T>>) -> (ReadHalf<T>, WriteHalf<T>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    (
        ReadHalf {
            shared: Rc::clone(&shared),
        },
        WriteHalf { shared },
    )
}

/// The read half of a split stream.
#[derive(Debug)]
pub struct ReadHalf<T> {
    shared: Rc<RefCell<T>>,
}

/// The write half of a split stream.
#[derive(Debug)]
pub struct WriteHalf<T> {
    shared: Rc<RefCell<T>>,
}

impl<T: AsyncRead + Unpin> AsyncRead for ReadHalf<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.shared.borrow_mut();
        Pin::new(&mut *inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for WriteHalf<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.shared.borrow_mut();
        Pin::new(&mut *inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut inner = self.shared.borrow_mut();
        Pin::new(&mut *inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut inner = self.shared.borrow_mut();
        Pin::new(&mut *inner).poll_shutdown(cx)
    }
}
