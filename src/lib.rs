//! Sprocket: a single-threaded cooperative async I/O runtime with an
//! HTTP/1.1 server layer.
//!
//! # Overview
//!
//! Sprocket is built around one dispatcher per thread. The dispatcher owns a
//! timer heap, an OS readiness source, and a FIFO of ready work; every
//! future, stream, and connection in the process is driven from that single
//! loop. There are no locks on the hot path and no data races by
//! construction: all runtime state is touched only from the dispatcher
//! thread, and control returns to the loop exclusively at await points.
//!
//! On top of the runtime sit byte-stream transports (buffered readers and
//! writers, length-bounded readers, the RFC 7230 chunked codec, and a TLS
//! duplex stream driven by rustls) and an HTTP/1.1 server with keep-alive,
//! `Expect: 100-continue` handling, and both fixed-length and chunked
//! response paths.
//!
//! # Module Structure
//!
//! - [`runtime`]: the dispatcher, timer heap, and fd readiness source
//! - [`promise`]: write-once result cells with ordered callback lists
//! - [`time`]: sleep, timeout, and interval primitives
//! - [`io`]: minimal `AsyncRead`/`AsyncWrite` traits and adapters
//! - [`stream`]: buffered stream readers/writers, bounded and chunked codecs
//! - [`tls`]: TLS acceptor, connector, and duplex stream
//! - [`net`]: nonblocking TCP and UDP primitives
//! - [`http`]: the HTTP/1.1 request/response model and server loop
//!
//! # Example
//!
//! ```ignore
//! use sprocket::http::{HttpServer, HttpServerConfig, RequestFence};
//! use sprocket::runtime::Dispatcher;
//!
//! let dispatcher = Dispatcher::new()?;
//! let server = HttpServer::bind(
//!     "127.0.0.1:8080".parse()?,
//!     HttpServerConfig::default(),
//!     |fence: RequestFence| async move {
//!         let request = fence.into_request()?;
//!         let mut response = request.take_response();
//!         response.send_body(b"ok").await?;
//!         Ok(response)
//!     },
//! )?;
//! server.start();
//! dispatcher.block_on(server.join());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod http;
pub mod io;
pub mod net;
pub mod promise;
pub mod runtime;
pub mod stream;
pub mod time;
pub mod tls;

pub use error::{Error, ErrorKind};
pub use promise::Promise;
pub use runtime::Dispatcher;
