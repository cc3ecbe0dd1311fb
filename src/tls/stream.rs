//! TLS duplex stream.
//!
//! One state machine multiplexes the engine's two sides: the record side
//! (ciphertext against the transport) and the application side (plaintext
//! against the caller). Each poll makes whatever progress the engine
//! advertises as possible and parks on the transport otherwise, so exactly
//! one side is in the engine at any instant.

use super::error::TlsError;
use crate::io::{AsyncRead, AsyncWrite, ReadBuf};
use crate::promise::Promise;
use rustls::{ClientConnection, ServerConnection};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsState {
    Handshaking,
    Ready,
    ShuttingDown,
    Closed,
}

/// The opaque record-layer engine, client or server flavored.
enum TlsSession {
    Client(Box<ClientConnection>),
    Server(Box<ServerConnection>),
}

impl TlsSession {
    fn is_handshaking(&self) -> bool {
        match self {
            Self::Client(c) => c.is_handshaking(),
            Self::Server(s) => s.is_handshaking(),
        }
    }

    fn wants_read(&self) -> bool {
        match self {
            Self::Client(c) => c.wants_read(),
            Self::Server(s) => s.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Self::Client(c) => c.wants_write(),
            Self::Server(s) => s.wants_write(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Self::Client(c) => c.reader(),
            Self::Server(s) => s.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Self::Client(c) => c.writer(),
            Self::Server(s) => s.writer(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.read_tls(rd),
            Self::Server(s) => s.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.write_tls(wr),
            Self::Server(s) => s.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            Self::Client(c) => c.process_new_packets(),
            Self::Server(s) => s.process_new_packets(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Self::Client(c) => c.send_close_notify(),
            Self::Server(s) => s.send_close_notify(),
        }
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Self::Client(c) => c.alpn_protocol(),
            Self::Server(s) => s.alpn_protocol(),
        }
    }

    fn sni_hostname(&self) -> Option<&str> {
        match self {
            Self::Client(_) => None,
            Self::Server(s) => s.server_name(),
        }
    }
}

/// A TLS stream wrapping an async transport.
///
/// Implements [`AsyncRead`] and [`AsyncWrite`], transparently encrypting
/// and decrypting over the underlying connection. Until the handshake
/// completes, application reads and writes park behind
/// [`poll_handshake`](Self::poll_handshake).
pub struct TlsStream<IO> {
    io: IO,
    session: TlsSession,
    state: TlsState,
    handshake: Promise<()>,
}

impl<IO> TlsStream<IO> {
    pub(crate) fn new_client(io: IO, conn: ClientConnection) -> Self {
        Self {
            io,
            session: TlsSession::Client(Box::new(conn)),
            state: TlsState::Handshaking,
            handshake: Promise::new(),
        }
    }

    pub(crate) fn new_server(io: IO, conn: ServerConnection) -> Self {
        Self {
            io,
            session: TlsSession::Server(Box::new(conn)),
            state: TlsState::Handshaking,
            handshake: Promise::new(),
        }
    }

    /// Promise completed when the handshake finishes, or failed when it
    /// does not. Both directions observe the same promise.
    #[must_use]
    pub fn handshake_promise(&self) -> Promise<()> {
        self.handshake.clone()
    }

    /// The negotiated ALPN protocol, if any.
    #[must_use]
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.session.alpn_protocol()
    }

    /// The SNI hostname presented by the client (server side only).
    #[must_use]
    pub fn sni_hostname(&self) -> Option<&str> {
        self.session.sni_hostname()
    }

    /// A reference to the underlying transport.
    pub fn get_ref(&self) -> &IO {
        &self.io
    }

    /// A mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    /// True once the handshake has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == TlsState::Ready
    }

    /// True once the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == TlsState::Closed
    }

    fn fail_handshake(&mut self, error: TlsError) -> TlsError {
        self.state = TlsState::Closed;
        if self.handshake.is_pending() {
            self.handshake
                .fail(crate::error::Error::new(crate::error::ErrorKind::Protocol)
                    .with_context(error.to_string()));
        }
        error
    }
}

impl<IO: AsyncRead + AsyncWrite + Unpin> TlsStream<IO> {
    /// Drives the handshake to completion.
    pub fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), TlsError>> {
        if self.state != TlsState::Handshaking {
            return Poll::Ready(Ok(()));
        }
        loop {
            if let Err(e) = self.session.process_new_packets() {
                return Poll::Ready(Err(self.fail_handshake(TlsError::Handshake(e.to_string()))));
            }

            let mut write_blocked = false;
            while self.session.wants_write() {
                match self.poll_write_tls(cx) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(self.fail_handshake(TlsError::Handshake(
                            "connection closed during handshake".into(),
                        ))));
                    }
                    Poll::Ready(Ok(_)) => {}
                    Poll::Ready(Err(e)) => {
                        return Poll::Ready(Err(self.fail_handshake(TlsError::Io(e))));
                    }
                    Poll::Pending => {
                        write_blocked = true;
                        break;
                    }
                }
            }

            if !self.session.is_handshaking() {
                self.state = TlsState::Ready;
                debug!("TLS handshake complete");
                if self.handshake.is_pending() {
                    self.handshake.complete(());
                }
                return Poll::Ready(Ok(()));
            }

            if self.session.wants_read() {
                match self.poll_read_tls(cx) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(self.fail_handshake(TlsError::Handshake(
                            "connection closed during handshake".into(),
                        ))));
                    }
                    Poll::Ready(Ok(_)) => {}
                    Poll::Ready(Err(e)) => {
                        return Poll::Ready(Err(self.fail_handshake(TlsError::Io(e))));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            } else if write_blocked {
                return Poll::Pending;
            }
        }
    }

    /// Runs the handshake to completion.
    pub async fn handshake(&mut self) -> Result<(), TlsError> {
        std::future::poll_fn(|cx| self.poll_handshake(cx)).await
    }

    /// Pulls ciphertext from the transport into the engine.
    fn poll_read_tls(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        struct ReadAdapter<'a, 'b, IO> {
            io: &'a mut IO,
            cx: &'a mut Context<'b>,
        }

        impl<IO: AsyncRead + Unpin> io::Read for ReadAdapter<'_, '_, IO> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *self.io).poll_read(self.cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => Ok(read_buf.filled().len()),
                    Poll::Ready(Err(e)) => Err(e),
                    Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
                }
            }
        }

        let mut adapter = ReadAdapter {
            io: &mut self.io,
            cx,
        };
        match self.session.read_tls(&mut adapter) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    /// Pushes ciphertext from the engine into the transport.
    fn poll_write_tls(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        struct WriteAdapter<'a, 'b, IO> {
            io: &'a mut IO,
            cx: &'a mut Context<'b>,
        }

        impl<IO: AsyncWrite + Unpin> io::Write for WriteAdapter<'_, '_, IO> {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                match Pin::new(&mut *self.io).poll_write(self.cx, buf) {
                    Poll::Ready(Ok(n)) => Ok(n),
                    Poll::Ready(Err(e)) => Err(e),
                    Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
                }
            }

            fn flush(&mut self) -> io::Result<()> {
                match Pin::new(&mut *self.io).poll_flush(self.cx) {
                    Poll::Ready(Ok(())) => Ok(()),
                    Poll::Ready(Err(e)) => Err(e),
                    Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
                }
            }
        }

        let mut adapter = WriteAdapter {
            io: &mut self.io,
            cx,
        };
        match self.session.write_tls(&mut adapter) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl<IO: AsyncRead + AsyncWrite + Unpin> AsyncRead for TlsStream<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.state == TlsState::Closed {
            return Poll::Ready(Ok(()));
        }
        if this.state == TlsState::Handshaking {
            match this.poll_handshake(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
                Poll::Pending => return Poll::Pending,
            }
        }

        loop {
            match io::Read::read(&mut this.session.reader(), buf.unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    if n > 0 {
                        trace!(bytes = n, "tls read");
                        return Poll::Ready(Ok(()));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Poll::Ready(Err(e)),
            }

            match this.poll_read_tls(cx) {
                Poll::Ready(Ok(0)) => {
                    // Source EOF closes the engine.
                    this.state = TlsState::Closed;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Ok(_)) => {
                    if let Err(e) = this.session.process_new_packets() {
                        this.state = TlsState::Closed;
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            e.to_string(),
                        )));
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<IO: AsyncRead + AsyncWrite + Unpin> AsyncWrite for TlsStream<IO> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.state == TlsState::Closed || this.state == TlsState::ShuttingDown {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "TLS session closed",
            )));
        }
        if this.state == TlsState::Handshaking {
            match this.poll_handshake(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = io::Write::write(&mut this.session.writer(), buf)?;
        trace!(bytes = n, "tls write");

        while this.session.wants_write() {
            match this.poll_write_tls(cx) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(_)) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {
                    if n > 0 {
                        // Plaintext was accepted; ciphertext drains later.
                        return Poll::Ready(Ok(n));
                    }
                    return Poll::Pending;
                }
            }
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.session.wants_write() {
            match this.poll_write_tls(cx) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(_)) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.state != TlsState::ShuttingDown && this.state != TlsState::Closed {
            debug!("tls shutdown");
            this.state = TlsState::ShuttingDown;
            this.session.send_close_notify();
        }
        while this.session.wants_write() {
            match this.poll_write_tls(cx) {
                Poll::Ready(Ok(0)) => break,
                Poll::Ready(Ok(_)) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        this.state = TlsState::Closed;
        Pin::new(&mut this.io).poll_shutdown(cx)
    }
}

impl<IO: std::fmt::Debug> std::fmt::Debug for TlsStream<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("io", &self.io)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
