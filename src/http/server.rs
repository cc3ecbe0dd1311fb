//! HTTP/1.1 server: options, lifecycle, accept loop, and the
//! per-connection state machine.

use super::connection::{ConnectionCore, ServerTransport};
use super::error::HttpError;
use super::request::{parse_request_head, HttpRequest, HttpVersion, RequestFlags};
use super::response::{default_reason, HttpResponse, ResponseState};
use crate::error::{Error, ErrorKind};
use crate::net::{TcpListener, TcpStream};
use crate::promise::{join_all, Promise};
use crate::runtime::Dispatcher;
use crate::time::timeout;
use crate::tls::TlsAcceptor;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::{poll_fn, Future};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Server construction options.
#[derive(Clone)]
pub struct HttpServerConfig {
    /// Admission bound on concurrent connections; `-1` means unlimited.
    /// Currently advisory: exceeding it is logged, not enforced.
    pub max_connections: i64,
    /// Deadline for receiving a complete request head.
    pub headers_timeout: Duration,
    /// Cap on the request head size; exceeding it yields 413.
    pub max_headers_size: usize,
    /// Cap on the request body size; exceeding it yields 413.
    pub max_request_body_size: usize,
    /// OS listen backlog.
    pub backlog_size: i32,
    /// Overrides the scheme/authority used when building absolute URIs.
    pub server_uri: Option<String>,
    /// Suppresses the automatic `100 Continue` interim response.
    pub no_expect_handler: bool,
    /// TLS acceptor; when set, every connection handshakes first.
    pub tls: Option<TlsAcceptor>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            max_connections: -1,
            headers_timeout: Duration::from_secs(10),
            max_headers_size: 8192,
            max_request_body_size: 1024 * 1024,
            backlog_size: 128,
            server_uri: None,
            no_expect_handler: false,
            tls: None,
        }
    }
}

impl HttpServerConfig {
    /// Sets the advisory connection bound.
    #[must_use]
    pub fn max_connections(mut self, max: i64) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the request-head deadline.
    #[must_use]
    pub fn headers_timeout(mut self, timeout: Duration) -> Self {
        self.headers_timeout = timeout;
        self
    }

    /// Sets the request-head size cap.
    #[must_use]
    pub fn max_headers_size(mut self, size: usize) -> Self {
        self.max_headers_size = size;
        self
    }

    /// Sets the request-body size cap.
    #[must_use]
    pub fn max_request_body_size(mut self, size: usize) -> Self {
        self.max_request_body_size = size;
        self
    }

    /// Sets the OS listen backlog.
    #[must_use]
    pub fn backlog_size(mut self, backlog: i32) -> Self {
        self.backlog_size = backlog;
        self
    }

    /// Overrides the scheme/authority for absolute URIs.
    #[must_use]
    pub fn server_uri(mut self, uri: impl Into<String>) -> Self {
        self.server_uri = Some(uri.into());
        self
    }

    /// Suppresses the automatic `100 Continue`.
    #[must_use]
    pub fn no_expect_handler(mut self) -> Self {
        self.no_expect_handler = true;
        self
    }

    /// Requires TLS on every connection.
    #[must_use]
    pub fn secure(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }
}

impl std::fmt::Debug for HttpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServerConfig")
            .field("max_connections", &self.max_connections)
            .field("headers_timeout", &self.headers_timeout)
            .field("max_headers_size", &self.max_headers_size)
            .field("max_request_body_size", &self.max_request_body_size)
            .field("backlog_size", &self.backlog_size)
            .field("secure", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

/// Observable server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not accepting connections.
    Stopped,
    /// Accepting and serving.
    Running,
    /// Closed for good; terminal.
    Closed,
}

/// The per-request value handed to the user callback: a parsed request,
/// or a typed error describing why no request exists (today that is a
/// failed TLS handshake).
pub enum RequestFence {
    /// A successfully parsed request.
    Ok(HttpRequest),
    /// No request could be produced.
    Err(HttpError),
}

impl RequestFence {
    /// Unwraps the request or propagates the error.
    pub fn into_request(self) -> Result<HttpRequest, HttpError> {
        match self {
            Self::Ok(request) => Ok(request),
            Self::Err(error) => Err(error),
        }
    }

    /// True when a request was parsed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

struct ConnectionSlot {
    core: RefCell<Option<Rc<ConnectionCore>>>,
    done: Promise<()>,
}

struct ServerShared<H> {
    config: Rc<HttpServerConfig>,
    handler: H,
    listener: TcpListener,
    dispatcher: Dispatcher,
    state: Cell<ServerState>,
    stop_signal: RefCell<Promise<()>>,
    accept_done: RefCell<Option<Promise<()>>>,
    connections: RefCell<HashMap<(SocketAddr, SocketAddr), Rc<ConnectionSlot>>>,
    closing: Cell<bool>,
    closed: Promise<()>,
}

/// An HTTP/1.1 server bound to a local address.
///
/// The lifecycle is `Stopped → Running → Stopped → Closed`:
/// [`start`](Self::start) begins accepting, [`stop`](Self::stop) halts the
/// accept loop while letting live connections finish,
/// [`close_wait`](Self::close_wait) force-disconnects everything and makes
/// the state terminal, and [`join`](Self::join) resolves once closed.
pub struct HttpServer<H> {
    shared: Rc<ServerShared<H>>,
}

impl<H> Clone for HttpServer<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

enum AcceptOutcome {
    Conn(TcpStream, SocketAddr),
    Failed(io::Error),
    Stopped,
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

impl<H, Fut> HttpServer<H>
where
    H: Fn(RequestFence) -> Fut + 'static,
    Fut: Future<Output = Result<HttpResponse, HttpError>> + 'static,
{
    /// Binds the listening socket. The server starts in the stopped state.
    pub fn bind(
        addr: SocketAddr,
        config: HttpServerConfig,
        handler: H,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr, config.backlog_size)?;
        Ok(Self {
            shared: Rc::new(ServerShared {
                config: Rc::new(config),
                handler,
                listener,
                dispatcher: Dispatcher::current(),
                state: Cell::new(ServerState::Stopped),
                stop_signal: RefCell::new(Promise::new()),
                accept_done: RefCell::new(None),
                connections: RefCell::new(HashMap::new()),
                closing: Cell::new(false),
                closed: Promise::new(),
            }),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.listener.local_addr()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.shared.state.get()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.borrow().len()
    }

    /// Starts the accept loop. No-op unless the server is stopped.
    pub fn start(&self) {
        if self.shared.state.get() != ServerState::Stopped || self.shared.closing.get() {
            return;
        }
        let stop = Promise::new();
        let done = Promise::new();
        *self.shared.stop_signal.borrow_mut() = stop.clone();
        *self.shared.accept_done.borrow_mut() = Some(done.clone());
        self.shared.state.set(ServerState::Running);
        let shared = Rc::clone(&self.shared);
        self.shared.dispatcher.spawn(async move {
            accept_loop(shared, stop).await;
            done.complete(());
        });
        if let Ok(addr) = self.shared.listener.local_addr() {
            debug!(%addr, "server started");
        }
    }

    /// Halts the accept loop and waits for it to exit. Live connections
    /// keep running.
    pub async fn stop(&self) {
        if self.shared.state.get() != ServerState::Running {
            return;
        }
        self.shared.stop_signal.borrow().complete(());
        let done = self.shared.accept_done.borrow_mut().take();
        if let Some(done) = done {
            let _ = done.wait().await;
        }
        self.shared.state.set(ServerState::Stopped);
        debug!("server stopped");
    }

    /// Stops accepting, force-disconnects every live connection, waits
    /// for the connection tasks to finish, and transitions to the
    /// terminal closed state.
    pub async fn close_wait(&self) {
        if self.shared.closing.replace(true) {
            self.join().await;
            return;
        }
        self.stop().await;
        self.drop_connections();
        let pending: Vec<Promise<()>> = self
            .shared
            .connections
            .borrow()
            .values()
            .map(|slot| slot.done.clone())
            .collect();
        join_all(pending).await;
        self.shared.state.set(ServerState::Closed);
        self.shared.closed.complete(());
        debug!("server closed");
    }

    /// Force-disconnects every live connection.
    pub fn drop_connections(&self) {
        for slot in self.shared.connections.borrow().values() {
            if let Some(core) = slot.core.borrow().as_ref() {
                core.force_close();
            }
        }
    }

    /// Resolves once the server reaches the closed state.
    pub async fn join(&self) {
        let _ = self.shared.closed.wait().await;
    }
}

async fn accept_loop<H, Fut>(shared: Rc<ServerShared<H>>, stop: Promise<()>)
where
    H: Fn(RequestFence) -> Fut + 'static,
    Fut: Future<Output = Result<HttpResponse, HttpError>> + 'static,
{
    let mut stop_wait = stop.wait();
    loop {
        let outcome = poll_fn(|cx| {
            if Pin::new(&mut stop_wait).poll(cx).is_ready() {
                return Poll::Ready(AcceptOutcome::Stopped);
            }
            match shared.listener.poll_accept(cx) {
                Poll::Ready(Ok((stream, remote))) => {
                    Poll::Ready(AcceptOutcome::Conn(stream, remote))
                }
                Poll::Ready(Err(e)) => Poll::Ready(AcceptOutcome::Failed(e)),
                Poll::Pending => Poll::Pending,
            }
        })
        .await;

        match outcome {
            AcceptOutcome::Stopped => break,
            AcceptOutcome::Failed(e) if is_transient_accept_error(&e) => {
                debug!(error = %e, "transient accept error");
            }
            AcceptOutcome::Failed(e) => {
                error!(error = %e, "accept loop terminated");
                break;
            }
            AcceptOutcome::Conn(stream, remote) => {
                let Ok(local) = stream.local_addr() else {
                    continue;
                };
                let bound = shared.config.max_connections;
                if bound >= 0 && shared.connections.borrow().len() >= bound as usize {
                    warn!(
                        %remote,
                        bound,
                        "connection count exceeds the configured bound"
                    );
                }
                let key = (remote, local);
                let slot = Rc::new(ConnectionSlot {
                    core: RefCell::new(None),
                    done: Promise::new(),
                });
                shared
                    .connections
                    .borrow_mut()
                    .insert(key, Rc::clone(&slot));
                let task_shared = Rc::clone(&shared);
                shared.dispatcher.spawn(async move {
                    serve_connection(&task_shared, stream, remote, local, &slot).await;
                    task_shared.connections.borrow_mut().remove(&key);
                    slot.done.complete(());
                });
            }
        }
    }
}

async fn serve_connection<H, Fut>(
    shared: &ServerShared<H>,
    stream: TcpStream,
    remote: SocketAddr,
    local: SocketAddr,
    slot: &ConnectionSlot,
) where
    H: Fn(RequestFence) -> Fut + 'static,
    Fut: Future<Output = Result<HttpResponse, HttpError>> + 'static,
{
    debug!(%remote, "connection accepted");
    let transport = match shared.config.tls.as_ref() {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => ServerTransport::Tls(tls),
            Err(e) => {
                debug!(%remote, error = %e, "tls handshake failed");
                // Best-effort notification; the callback cannot respond.
                let fence = RequestFence::Err(HttpError::critical(
                    400,
                    format!("TLS handshake failed: {e}"),
                ));
                let _ = (shared.handler)(fence).await;
                return;
            }
        },
        None => ServerTransport::Plain(stream),
    };

    let core = ConnectionCore::new(transport, Rc::clone(&shared.config), remote, local);
    *slot.core.borrow_mut() = Some(Rc::clone(&core));
    connection_loop(shared, &core).await;
    let _ = core.writer.close_wait().await;
    debug!(%remote, "connection closed");
}

async fn read_request_head(core: &ConnectionCore) -> Result<Vec<u8>, Error> {
    let mut reader = core.reader.borrow_mut();
    reader
        .read_until(b"\r\n\r\n", core.config.max_headers_size)
        .await
}

async fn connection_loop<H, Fut>(shared: &ServerShared<H>, core: &Rc<ConnectionCore>)
where
    H: Fn(RequestFence) -> Fut + 'static,
    Fut: Future<Output = Result<HttpResponse, HttpError>> + 'static,
{
    loop {
        let head_bytes =
            match timeout(shared.config.headers_timeout, read_request_head(core)).await {
                Err(_elapsed) => {
                    debug!(remote = %core.remote, "request head timeout");
                    send_fallback_error(core, HttpVersion::Http11, 408).await;
                    return;
                }
                Ok(Err(e)) => match e.kind() {
                    ErrorKind::LimitExceeded => {
                        send_fallback_error(core, HttpVersion::Http11, 413).await;
                        return;
                    }
                    // Peer went away between or inside requests.
                    ErrorKind::Incomplete | ErrorKind::Closed => return,
                    _ => {
                        debug!(remote = %core.remote, error = %e, "request read failed");
                        return;
                    }
                },
                Ok(Ok(bytes)) => bytes,
            };

        let head = match parse_request_head(
            &head_bytes,
            shared.config.max_request_body_size as u64,
        ) {
            Ok(head) => head,
            Err(e) => {
                debug!(remote = %core.remote, error = %e, "request rejected");
                send_fallback_error(core, HttpVersion::Http11, e.status()).await;
                return;
            }
        };
        trace!(method = %head.method, path = %head.raw_path, "request");

        core.expect_pending.set(
            head.flags.contains(RequestFlags::CLIENT_EXPECT)
                && head.version == HttpVersion::Http11
                && !shared.config.no_expect_handler,
        );
        let request = HttpRequest::new(Rc::clone(core), head);
        let version = request.version();
        let request_keep_alive = request.keep_alive_requested();
        let body_complete = request.body_complete_handle();

        let result = (shared.handler)(RequestFence::Ok(request)).await;

        let keep_alive = match result {
            Ok(response) => match response.state() {
                // The handler never produced a response.
                ResponseState::Empty => {
                    send_fallback_error(core, version, 404).await;
                    false
                }
                // Prepared but nothing reached the wire.
                ResponseState::Prepared => {
                    send_fallback_error(core, version, 409).await;
                    false
                }
                // Partially sent; nothing more can be said.
                ResponseState::Sending => false,
                ResponseState::Finished => response.keep_alive() && request_keep_alive,
                ResponseState::Failed
                | ResponseState::Cancelled
                | ResponseState::Dumb => false,
            },
            Err(e) => {
                if e.is_silent() {
                    return;
                }
                debug!(remote = %core.remote, error = %e, "handler error");
                send_fallback_error(core, version, e.status()).await;
                false
            }
        };

        if !keep_alive || !body_complete.get() {
            return;
        }
        core.expect_pending.set(false);
    }
}

/// Emits a fabricated error response; failures are swallowed.
async fn send_fallback_error(core: &Rc<ConnectionCore>, version: HttpVersion, status: u16) {
    let mut response = HttpResponse::dumb(Rc::clone(core), version);
    let body = default_reason(status).as_bytes().to_vec();
    if let Err(e) = response.send_dumb(status, &body).await {
        trace!(error = %e, "error response dropped");
    }
}
