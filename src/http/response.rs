//! HTTP response emission.
//!
//! A response advances monotonically through
//! `Empty → Prepared → Sending → Finished` (with `Failed` and `Cancelled`
//! as terminal side exits), except that `Sending` re-enters itself for
//! repeated chunk writes. Misusing the state machine (sending into a
//! non-empty response, chunking an unprepared one) is a programmer error
//! and panics. `Dumb` marks responses the server fabricates without a
//! request, such as fallback error pages.

use super::connection::{ConnectionCore, ServerTransport};
use super::date::imf_fixdate;
use super::error::HttpError;
use super::headers::{canonical_name, HeaderTable};
use super::request::HttpVersion;
use crate::io::WriteHalf;
use crate::stream::ChunkedWriter;
use std::cell::Cell;
use std::rc::Rc;
use std::time::SystemTime;

/// Observable state of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Nothing composed or written.
    Empty,
    /// Headers composed (chunked path: staged, not yet on the wire).
    Prepared,
    /// Bytes are going out.
    Sending,
    /// The response is complete.
    Finished,
    /// A write failed; the connection is unusable.
    Failed,
    /// The response was abandoned by cancellation.
    Cancelled,
    /// Fabricated by the server outside the request/response model.
    Dumb,
}

/// Returns the standard reason phrase for a status code.
#[must_use]
pub fn default_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

/// Body framing for a composed head.
pub(crate) enum Framing {
    /// Fixed-length body of the given size.
    Length(usize),
    /// Chunked transfer encoding.
    Chunked,
}

/// Composes the response head: status line, `Date`, `Content-Type`,
/// framing headers, `Connection` (unless user-set), then every user
/// header not in {date, content-type, content-length} (plus
/// transfer-encoding on the chunked path), names canonicalized.
pub(crate) fn compose_head(
    version: HttpVersion,
    status: u16,
    headers: &HeaderTable,
    keep_alive: bool,
    framing: &Framing,
    date: &str,
) -> Vec<u8> {
    use std::fmt::Write;

    let mut head = String::with_capacity(256);
    let _ = write!(head, "{version} {status} {}\r\n", default_reason(status));
    let _ = write!(head, "Date: {date}\r\n");

    let content_type = headers
        .get("content-type")
        .unwrap_or("text/html; charset=utf-8");
    let _ = write!(head, "Content-Type: {content_type}\r\n");

    match framing {
        Framing::Length(0) => {}
        Framing::Length(n) => {
            let _ = write!(head, "Content-Length: {n}\r\n");
        }
        Framing::Chunked => head.push_str("Transfer-Encoding: chunked\r\n"),
    }

    if !headers.contains("connection") {
        let value = if keep_alive { "keep-alive" } else { "close" };
        let _ = write!(head, "Connection: {value}\r\n");
    }

    for (name, value) in headers.iter() {
        let skip = name.eq_ignore_ascii_case("date")
            || name.eq_ignore_ascii_case("content-type")
            || name.eq_ignore_ascii_case("content-length")
            || (matches!(framing, Framing::Chunked)
                && name.eq_ignore_ascii_case("transfer-encoding"));
        if skip {
            continue;
        }
        let _ = write!(head, "{}: {value}\r\n", canonical_name(name));
    }

    head.push_str("\r\n");
    head.into_bytes()
}

/// A response bound to its connection.
pub struct HttpResponse {
    core: Rc<ConnectionCore>,
    version: HttpVersion,
    status: u16,
    headers: HeaderTable,
    state: Cell<ResponseState>,
    keep_alive: Cell<bool>,
    chunked: Option<ChunkedWriter<WriteHalf<ServerTransport>>>,
    staged_head: Option<Vec<u8>>,
}

impl HttpResponse {
    pub(crate) fn new(core: Rc<ConnectionCore>, version: HttpVersion, keep_alive: bool) -> Self {
        Self {
            core,
            version,
            status: 200,
            headers: HeaderTable::new(),
            state: Cell::new(ResponseState::Empty),
            keep_alive: Cell::new(keep_alive),
            chunked: None,
            staged_head: None,
        }
    }

    pub(crate) fn dumb(core: Rc<ConnectionCore>, version: HttpVersion) -> Self {
        let response = Self::new(core, version, false);
        response.state.set(ResponseState::Dumb);
        response
    }

    /// The response state.
    #[must_use]
    pub fn state(&self) -> ResponseState {
        self.state.get()
    }

    /// The status code (defaults to 200).
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// The response HTTP version (matches the request).
    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Appends a response header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.add(name, value);
    }

    /// Replaces a response header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// The response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    /// Whether the connection may serve another request afterwards.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive.get()
    }

    /// Sets the keep-alive flag (the `Connection` header follows it).
    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.keep_alive.set(keep_alive);
    }

    /// Marks a partially-sent response as abandoned.
    pub fn cancel(&self) {
        if matches!(
            self.state.get(),
            ResponseState::Prepared | ResponseState::Sending
        ) {
            self.state.set(ResponseState::Cancelled);
        }
    }

    async fn write_all(&self, data: Vec<u8>) -> Result<(), HttpError> {
        match self.core.writer.write(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.set(ResponseState::Failed);
                Err(HttpError::from(e))
            }
        }
    }

    /// Sends a complete fixed-length response.
    ///
    /// # Panics
    ///
    /// Panics if the response is not in the `Empty` state.
    pub async fn send_body(&mut self, body: &[u8]) -> Result<(), HttpError> {
        assert_eq!(
            self.state.get(),
            ResponseState::Empty,
            "response already started"
        );
        let head = compose_head(
            self.version,
            self.status,
            &self.headers,
            self.keep_alive.get(),
            &Framing::Length(body.len()),
            &imf_fixdate(SystemTime::now()),
        );
        self.state.set(ResponseState::Prepared);
        self.state.set(ResponseState::Sending);
        self.write_all(head).await?;
        if !body.is_empty() {
            self.write_all(body.to_vec()).await?;
        }
        self.state.set(ResponseState::Finished);
        Ok(())
    }

    /// Stages chunked-response headers and allocates the chunked writer.
    /// Nothing reaches the wire until the first chunk or [`finish`].
    ///
    /// # Panics
    ///
    /// Panics if the response is not in the `Empty` state.
    ///
    /// [`finish`]: Self::finish
    pub fn prepare(&mut self) {
        assert_eq!(
            self.state.get(),
            ResponseState::Empty,
            "response already started"
        );
        self.staged_head = Some(compose_head(
            self.version,
            self.status,
            &self.headers,
            self.keep_alive.get(),
            &Framing::Chunked,
            &imf_fixdate(SystemTime::now()),
        ));
        self.chunked = Some(ChunkedWriter::new(self.core.writer.clone()));
        self.state.set(ResponseState::Prepared);
    }

    async fn flush_staged_head(&mut self) -> Result<(), HttpError> {
        if let Some(head) = self.staged_head.take() {
            self.write_all(head).await?;
        }
        Ok(())
    }

    /// Sends one body chunk.
    ///
    /// # Panics
    ///
    /// Panics unless the response is `Prepared` or `Sending`.
    pub async fn send_chunk(&mut self, data: &[u8]) -> Result<(), HttpError> {
        match self.state.get() {
            ResponseState::Prepared => {
                self.flush_staged_head().await?;
                self.state.set(ResponseState::Sending);
            }
            ResponseState::Sending => {}
            state => panic!("send_chunk on response in state {state:?}"),
        }
        let chunked = self.chunked.as_mut().expect("prepared response");
        match chunked.write_chunk(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.set(ResponseState::Failed);
                Err(HttpError::from(e))
            }
        }
    }

    /// Terminates the chunked body with the zero chunk.
    ///
    /// # Panics
    ///
    /// Panics unless the response is `Prepared` or `Sending`.
    pub async fn finish(&mut self) -> Result<(), HttpError> {
        match self.state.get() {
            ResponseState::Prepared => {
                self.flush_staged_head().await?;
                self.state.set(ResponseState::Sending);
            }
            ResponseState::Sending => {}
            state => panic!("finish on response in state {state:?}"),
        }
        let chunked = self.chunked.as_mut().expect("prepared response");
        match chunked.finish().await {
            Ok(()) => {
                self.state.set(ResponseState::Finished);
                Ok(())
            }
            Err(e) => {
                self.state.set(ResponseState::Failed);
                Err(HttpError::from(e))
            }
        }
    }

    /// Sets the status and sends `body` in one step. Allowed only from
    /// the `Empty` state.
    pub async fn send_error(&mut self, status: u16, body: &[u8]) -> Result<(), HttpError> {
        self.status = status;
        self.send_body(body).await
    }

    /// Emits a fabricated response on a `Dumb` response object.
    pub(crate) async fn send_dumb(&mut self, status: u16, body: &[u8]) -> Result<(), HttpError> {
        debug_assert_eq!(self.state.get(), ResponseState::Dumb);
        self.status = status;
        let head = compose_head(
            self.version,
            self.status,
            &self.headers,
            false,
            &Framing::Length(body.len()),
            &imf_fixdate(SystemTime::now()),
        );
        self.write_all(head).await?;
        if !body.is_empty() {
            self.write_all(body.to_vec()).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

    fn head_str(
        status: u16,
        headers: &HeaderTable,
        keep_alive: bool,
        framing: &Framing,
    ) -> String {
        let bytes = compose_head(HttpVersion::Http11, status, headers, keep_alive, framing, DATE);
        String::from_utf8(bytes).expect("ascii head")
    }

    #[test]
    fn fixed_length_head_has_the_expected_shape() {
        let head = head_str(200, &HeaderTable::new(), true, &Framing::Length(2));
        assert_eq!(
            head,
            "HTTP/1.1 200 OK\r\nDate: Thu, 01 Jan 1970 00:00:00 GMT\r\n\
             Content-Type: text/html; charset=utf-8\r\nContent-Length: 2\r\n\
             Connection: keep-alive\r\n\r\n"
        );
    }

    #[test]
    fn zero_length_body_omits_content_length() {
        let head = head_str(404, &HeaderTable::new(), false, &Framing::Length(0));
        assert!(!head.contains("Content-Length"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn chunked_head_has_no_content_length() {
        let head = head_str(200, &HeaderTable::new(), true, &Framing::Chunked);
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!head.contains("Content-Length"));
    }

    #[test]
    fn user_headers_override_and_pass_through() {
        let mut headers = HeaderTable::new();
        headers.add("content-type", "application/json");
        headers.add("x-request-id", "abc");
        headers.add("date", "bogus");
        headers.add("content-length", "999");
        let head = head_str(200, &headers, true, &Framing::Length(2));
        // User content-type wins; user date/content-length are dropped.
        assert!(head.contains("Content-Type: application/json\r\n"));
        assert_eq!(head.matches("Content-Length").count(), 1);
        assert!(head.contains("Content-Length: 2\r\n"));
        assert_eq!(head.matches("Date:").count(), 1);
        assert!(head.contains("Date: Thu"));
        // Other names pass through, canonicalized.
        assert!(head.contains("X-Request-Id: abc\r\n"));
    }

    #[test]
    fn user_connection_header_suppresses_the_automatic_one() {
        let mut headers = HeaderTable::new();
        headers.add("Connection", "upgrade");
        let head = head_str(200, &headers, true, &Framing::Length(1));
        assert_eq!(head.matches("Connection:").count(), 1);
        assert!(head.contains("Connection: upgrade\r\n"));
    }
}
