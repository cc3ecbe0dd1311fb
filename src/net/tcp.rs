//! Async TCP listener and stream.

use crate::io::{AsyncRead, AsyncWrite, ReadBuf};
use crate::runtime::Dispatcher;
use socket2::{Domain, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

/// EINPROGRESS from a nonblocking connect.
const IN_PROGRESS: i32 = 115;

/// An async TCP stream registered with the dispatcher's readiness source.
#[derive(Debug)]
pub struct TcpStream {
    inner: std::net::TcpStream,
    dispatcher: Dispatcher,
}

impl TcpStream {
    /// Adopts a std stream, switching it to nonblocking mode.
    pub fn from_std(inner: std::net::TcpStream) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        let dispatcher = Dispatcher::current();
        dispatcher.reactor_attach(inner.as_raw_fd())?;
        Ok(Self { inner, dispatcher })
    }

    /// Connects to `addr`.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == Some(IN_PROGRESS) => {}
            Err(e) => return Err(e),
        }
        let stream = Self::from_std(socket.into())?;
        // Writability signals the nonblocking connect has settled; a
        // refused connect surfaces through take_error.
        std::future::poll_fn(|cx| {
            match stream.inner.take_error() {
                Ok(None) => {}
                Ok(Some(err)) => return Poll::Ready(Err(err)),
                Err(e) => return Poll::Ready(Err(e)),
            }
            match stream.inner.peer_addr() {
                Ok(_) => Poll::Ready(Ok(())),
                Err(e)
                    if e.kind() == io::ErrorKind::NotConnected
                        || e.raw_os_error() == Some(IN_PROGRESS) =>
                {
                    match stream
                        .dispatcher
                        .park_writer(stream.inner.as_raw_fd(), cx.waker())
                    {
                        Ok(()) => Poll::Pending,
                        Err(e) => Poll::Ready(Err(e)),
                    }
                }
                Err(e) => Poll::Ready(Err(e)),
            }
        })
        .await?;
        Ok(stream)
    }

    /// The peer's address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    /// The local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Shuts down one or both directions at the socket level.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.inner.shutdown(how)
    }

    fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.dispatcher.reactor_detach(self.fd());
    }
}

impl AsyncRead for TcpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match (&this.inner).read(buf.unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Err(e) = this.dispatcher.park_reader(this.fd(), cx.waker()) {
                        return Poll::Ready(Err(e));
                    }
                    return Poll::Pending;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}

impl AsyncWrite for TcpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            match (&this.inner).write(buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Err(e) = this.dispatcher.park_writer(this.fd(), cx.waker()) {
                        return Poll::Ready(Err(e));
                    }
                    return Poll::Pending;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.shutdown(Shutdown::Write) {
            Ok(()) | Err(_) => Poll::Ready(Ok(())),
        }
    }
}

/// An async TCP listener.
#[derive(Debug)]
pub struct TcpListener {
    inner: std::net::TcpListener,
    dispatcher: Dispatcher,
}

impl TcpListener {
    /// Binds to `addr` with the given OS listen backlog.
    pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;
        let inner: std::net::TcpListener = socket.into();
        let dispatcher = Dispatcher::current();
        dispatcher.reactor_attach(inner.as_raw_fd())?;
        Ok(Self { inner, dispatcher })
    }

    /// The bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Polls for an incoming connection.
    pub fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => {
                    return Poll::Ready(TcpStream::from_std(stream).map(|s| (s, addr)))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Err(e) = self
                        .dispatcher
                        .park_reader(self.inner.as_raw_fd(), cx.waker())
                    {
                        return Poll::Ready(Err(e));
                    }
                    return Poll::Pending;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    /// Accepts an incoming connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        std::future::poll_fn(|cx| self.poll_accept(cx)).await
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.dispatcher.reactor_detach(self.inner.as_raw_fd());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{AsyncReadExt, AsyncWriteExt};
    use crate::runtime::Dispatcher;

    #[test]
    fn loopback_echo() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let listener =
                TcpListener::bind("127.0.0.1:0".parse().expect("addr"), 16).expect("bind");
            let addr = listener.local_addr().expect("local addr");

            crate::runtime::spawn(async move {
                let (mut conn, _) = listener.accept().await.expect("accept");
                let mut buf = [0u8; 5];
                conn.read_exact(&mut buf).await.expect("read");
                conn.write_all(&buf).await.expect("write");
            });

            let mut client = TcpStream::connect(addr).await.expect("connect");
            client.write_all(b"hello").await.expect("write");
            let mut echo = [0u8; 5];
            client.read_exact(&mut echo).await.expect("read");
            assert_eq!(&echo, b"hello");
        });
    }

    #[test]
    fn connect_to_closed_port_fails() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            // Bind then drop to find a port with no listener.
            let addr = {
                let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
                l.local_addr().expect("addr")
            };
            let result = TcpStream::connect(addr).await;
            assert!(result.is_err());
        });
    }
}
