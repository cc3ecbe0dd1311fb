//! The HTTP/1.1 request/response model and server loop.
//!
//! Parsing is strict RFC 7230: request-line, `name: value` header lines,
//! CRLF end-of-headers, chunked framing per section 4.1, and
//! `Transfer-Encoding: chunked` mutually exclusive with `Content-Length`.
//! The server loop reads one request at a time per connection, hands a
//! [`RequestFence`] to the user callback, and disposes of the returned
//! response according to its state.

mod body;
mod connection;
mod date;
mod error;
mod headers;
mod multipart;
mod request;
mod response;
mod server;
mod uri;

pub use body::HttpBodyReader;
pub use date::imf_fixdate;
pub use error::{HttpError, HttpErrorKind};
pub use headers::{canonical_name, HeaderTable};
pub use request::{EncodingFlags, HttpRequest, HttpVersion, Method, RequestFlags};
pub use response::{default_reason, HttpResponse, ResponseState};
pub use server::{HttpServer, HttpServerConfig, RequestFence, ServerState};
pub use uri::{QueryTable, Uri};
