//! Async UDP socket with queued send vectors.
//!
//! Receives follow the usual try-then-park shape. Sends are queued: each
//! datagram becomes a queue item with a completion promise, served in FIFO
//! order whenever the socket is writable, so concurrent senders never
//! interleave and each caller learns exactly when the kernel accepted its
//! datagram.

use crate::error::Error;
use crate::promise::{Promise, Wait};
use crate::runtime::Dispatcher;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

struct SendItem {
    data: Vec<u8>,
    target: Option<SocketAddr>,
    done: Promise<()>,
}

/// An async UDP socket.
pub struct UdpSocket {
    inner: std::net::UdpSocket,
    dispatcher: Dispatcher,
    queue: RefCell<VecDeque<SendItem>>,
}

impl UdpSocket {
    /// Binds to `addr`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = std::net::UdpSocket::bind(addr)?;
        inner.set_nonblocking(true)?;
        let dispatcher = Dispatcher::current();
        dispatcher.reactor_attach(inner.as_raw_fd())?;
        Ok(Self {
            inner,
            dispatcher,
            queue: RefCell::new(VecDeque::new()),
        })
    }

    /// Sets the default peer for [`send`](Self::send)/[`recv`](Self::recv).
    pub fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        self.inner.connect(addr)
    }

    /// The bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    /// Queues a datagram for `target`; resolves once the kernel accepts it.
    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<(), Error> {
        self.enqueue(data.to_vec(), Some(target)).await
    }

    /// Queues a datagram for the connected peer.
    pub async fn send(&self, data: &[u8]) -> Result<(), Error> {
        self.enqueue(data.to_vec(), None).await
    }

    fn enqueue(&self, data: Vec<u8>, target: Option<SocketAddr>) -> SendDrive<'_> {
        let done: Promise<()> = Promise::new();
        self.queue.borrow_mut().push_back(SendItem {
            data,
            target,
            done: done.clone(),
        });
        SendDrive {
            socket: self,
            wait: done.wait(),
        }
    }

    /// Serves the send queue head for as long as the socket cooperates.
    fn drive_sends(&self, cx: &mut Context<'_>) {
        loop {
            let mut queue = self.queue.borrow_mut();
            let Some(front) = queue.front() else { return };
            let result = match front.target {
                Some(target) => self.inner.send_to(&front.data, target),
                None => self.inner.send(&front.data),
            };
            match result {
                Ok(_) => {
                    let item = queue.pop_front().expect("checked front");
                    drop(queue);
                    item.done.complete(());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    drop(queue);
                    let _ = self.dispatcher.park_writer(self.fd(), cx.waker());
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let item = queue.pop_front().expect("checked front");
                    drop(queue);
                    item.done.fail(Error::from(e));
                }
            }
        }
    }

    /// Receives a datagram and its source address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        std::future::poll_fn(|cx| self.poll_recv_from(cx, buf)).await
    }

    /// Polls for a datagram.
    pub fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        loop {
            match self.inner.recv_from(buf) {
                Ok(result) => return Poll::Ready(Ok(result)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Err(e) = self.dispatcher.park_reader(self.fd(), cx.waker()) {
                        return Poll::Ready(Err(e));
                    }
                    return Poll::Pending;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    /// Receives a datagram from the connected peer.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        std::future::poll_fn(|cx| {
            loop {
                match self.inner.recv(buf) {
                    Ok(n) => return Poll::Ready(Ok(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if let Err(e) = self.dispatcher.park_reader(self.fd(), cx.waker()) {
                            return Poll::Ready(Err(e));
                        }
                        return Poll::Pending;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Poll::Ready(Err(e)),
                }
            }
        })
        .await
    }

    /// Number of datagrams waiting in the send queue.
    #[must_use]
    pub fn queued_sends(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        self.dispatcher.reactor_detach(self.fd());
    }
}

impl std::fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSocket")
            .field("queued_sends", &self.queue.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Future for a queued send: drives the queue head while waiting on its
/// own completion promise.
struct SendDrive<'a> {
    socket: &'a UdpSocket,
    wait: Wait<()>,
}

impl Future for SendDrive<'_> {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.socket.drive_sends(cx);
        match Pin::new(&mut self.wait).poll(cx) {
            Poll::Ready(result) => Poll::Ready(result.map(|()| ())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Dispatcher;

    #[test]
    fn datagrams_round_trip() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let a = UdpSocket::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
            let b = UdpSocket::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
            let b_addr = b.local_addr().expect("addr");

            a.send_to(b"ping", b_addr).await.expect("send");
            let mut buf = [0u8; 16];
            let (n, from) = b.recv_from(&mut buf).await.expect("recv");
            assert_eq!(&buf[..n], b"ping");
            assert_eq!(from, a.local_addr().expect("addr"));
        });
    }

    #[test]
    fn queued_sends_complete_in_order() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let a = UdpSocket::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
            let b = UdpSocket::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
            let b_addr = b.local_addr().expect("addr");

            a.send_to(b"one", b_addr).await.expect("send");
            a.send_to(b"two", b_addr).await.expect("send");
            assert_eq!(a.queued_sends(), 0);

            let mut buf = [0u8; 16];
            let (n, _) = b.recv_from(&mut buf).await.expect("recv");
            assert_eq!(&buf[..n], b"one");
            let (n, _) = b.recv_from(&mut buf).await.expect("recv");
            assert_eq!(&buf[..n], b"two");
        });
    }

    #[test]
    fn connected_send_recv() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let a = UdpSocket::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
            let b = UdpSocket::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
            a.connect(b.local_addr().expect("addr")).expect("connect");
            b.connect(a.local_addr().expect("addr")).expect("connect");

            a.send(b"hello").await.expect("send");
            let mut buf = [0u8; 16];
            let n = b.recv(&mut buf).await.expect("recv");
            assert_eq!(&buf[..n], b"hello");
        });
    }
}
