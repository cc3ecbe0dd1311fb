//! Per-connection transport and shared state.

use crate::io::{split_shared, AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use crate::net::TcpStream;
use crate::stream::{StreamReader, StreamWriter};
use crate::tls::TlsStream;
use std::cell::{Cell, RefCell};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use super::server::HttpServerConfig;

/// The connection's byte transport: the raw socket, or a TLS stream
/// wrapping it.
pub(crate) enum ServerTransport {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl ServerTransport {
    /// Hard-closes the underlying socket in both directions; pending reads
    /// observe EOF or an error on their next poll.
    pub(crate) fn force_shutdown(&self) {
        let socket = match self {
            Self::Plain(s) => s,
            Self::Tls(t) => t.get_ref(),
        };
        let _ = socket.shutdown(Shutdown::Both);
    }
}

impl AsyncRead for ServerTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// State shared between the connection loop, the request object handed to
/// the handler, and the response writing into the connection.
pub(crate) struct ConnectionCore {
    pub(crate) transport: Rc<RefCell<ServerTransport>>,
    pub(crate) reader: RefCell<StreamReader<ReadHalf<ServerTransport>>>,
    pub(crate) writer: StreamWriter<WriteHalf<ServerTransport>>,
    pub(crate) config: Rc<HttpServerConfig>,
    pub(crate) remote: SocketAddr,
    pub(crate) local: SocketAddr,
    /// Set while a `100 Continue` is owed before the next body read.
    pub(crate) expect_pending: Cell<bool>,
}

impl ConnectionCore {
    pub(crate) fn new(
        transport: ServerTransport,
        config: Rc<HttpServerConfig>,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Rc<Self> {
        let transport = Rc::new(RefCell::new(transport));
        let (read_half, write_half) = split_shared(Rc::clone(&transport));
        Rc::new(Self {
            transport,
            reader: RefCell::new(StreamReader::new(read_half)),
            writer: StreamWriter::new(write_half),
            config,
            remote,
            local,
            expect_pending: Cell::new(false),
        })
    }

    pub(crate) fn force_close(&self) {
        self.transport.borrow().force_shutdown();
    }
}
