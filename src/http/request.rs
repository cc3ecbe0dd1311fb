//! HTTP request parsing and the request object handed to handlers.

use super::body::HttpBodyReader;
use super::connection::ConnectionCore;
use super::error::HttpError;
use super::headers::HeaderTable;
use super::multipart;
use super::response::HttpResponse;
use super::uri::{parse_query, parse_request_target, QueryTable, Uri};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;

/// HTTP request method. Only the standard set is accepted; anything else
/// is rejected while parsing the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// CONNECT
    Connect,
    /// OPTIONS
    Options,
    /// TRACE
    Trace,
    /// PATCH
    Patch,
}

impl Method {
    /// Parses a method from its ASCII representation.
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            b"CONNECT" => Some(Self::Connect),
            b"OPTIONS" => Some(Self::Options),
            b"TRACE" => Some(Self::Trace),
            b"PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    /// The method as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVersion {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    Http11,
}

impl HttpVersion {
    /// The version as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties derived from the request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestFlags(u8);

impl RequestFlags {
    /// The body length is declared by `Content-Length`.
    pub const BOUND_BODY: RequestFlags = RequestFlags(0b0000_0001);
    /// The body is chunked-encoded with no declared length.
    pub const UNBOUND_BODY: RequestFlags = RequestFlags(0b0000_0010);
    /// The body is a `multipart/form-data` form.
    pub const MULTIPART_FORM: RequestFlags = RequestFlags(0b0000_0100);
    /// The body is an `application/x-www-form-urlencoded` form.
    pub const URLENCODED_FORM: RequestFlags = RequestFlags(0b0000_1000);
    /// The client sent `Expect: 100-continue`.
    pub const CLIENT_EXPECT: RequestFlags = RequestFlags(0b0001_0000);

    /// Combines flag sets.
    #[must_use]
    pub const fn with(self, other: RequestFlags) -> RequestFlags {
        RequestFlags(self.0 | other.0)
    }

    /// True if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: RequestFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Transfer- and content-encoding token sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodingFlags(u8);

impl EncodingFlags {
    /// `identity`
    pub const IDENTITY: EncodingFlags = EncodingFlags(0b0000_0001);
    /// `chunked`
    pub const CHUNKED: EncodingFlags = EncodingFlags(0b0000_0010);
    /// `compress`
    pub const COMPRESS: EncodingFlags = EncodingFlags(0b0000_0100);
    /// `deflate`
    pub const DEFLATE: EncodingFlags = EncodingFlags(0b0000_1000);
    /// `gzip`
    pub const GZIP: EncodingFlags = EncodingFlags(0b0001_0000);
    /// `br` (content-encoding only)
    pub const BR: EncodingFlags = EncodingFlags(0b0010_0000);

    /// Combines flag sets.
    #[must_use]
    pub const fn with(self, other: EncodingFlags) -> EncodingFlags {
        EncodingFlags(self.0 | other.0)
    }

    /// True if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: EncodingFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Everything parsed and validated from the request head.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: Method,
    pub(crate) version: HttpVersion,
    pub(crate) raw_path: String,
    pub(crate) uri: Uri,
    pub(crate) query: QueryTable,
    pub(crate) headers: HeaderTable,
    pub(crate) flags: RequestFlags,
    pub(crate) transfer_encoding: EncodingFlags,
    pub(crate) content_encoding: EncodingFlags,
    pub(crate) content_length: u64,
}

/// Validates an HTTP field-name against the RFC 7230 token charset.
fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            matches!(
                b,
                b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                    | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z'
            )
        })
}

fn parse_header_line(line: &str) -> Result<(String, String), HttpError> {
    let colon = line
        .find(':')
        .ok_or_else(|| HttpError::critical(400, "malformed header line"))?;
    let raw_name = &line[..colon];
    if raw_name.trim() != raw_name || !is_valid_header_name(raw_name) {
        return Err(HttpError::critical(400, "invalid header name"));
    }
    let value = line[colon + 1..].trim().to_owned();
    Ok((raw_name.to_owned(), value))
}

/// Parses a lowercased, comma-split, whitespace-stripped encoding list.
fn parse_encoding_list(value: &str, allow_br: bool) -> Result<EncodingFlags, HttpError> {
    let mut flags = EncodingFlags::default();
    for token in value.split(',') {
        let token = token.trim().to_ascii_lowercase();
        if token.is_empty() {
            continue;
        }
        flags = match token.as_str() {
            "identity" => flags.with(EncodingFlags::IDENTITY),
            "chunked" => flags.with(EncodingFlags::CHUNKED),
            "compress" => flags.with(EncodingFlags::COMPRESS),
            "deflate" => flags.with(EncodingFlags::DEFLATE),
            "gzip" => flags.with(EncodingFlags::GZIP),
            "br" if allow_br => flags.with(EncodingFlags::BR),
            _ => return Err(HttpError::critical(400, "unknown encoding token")),
        };
    }
    Ok(flags)
}

/// True when the `Connection` header's token list contains `token`.
fn connection_has_token(headers: &HeaderTable, token: &str) -> bool {
    headers.get_all("connection").any(|value| {
        value
            .split(',')
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    })
}

/// Parses and validates a complete request head (request line through the
/// final CRLF), applying every check the server imposes before the user
/// callback runs.
pub(crate) fn parse_request_head(
    head: &[u8],
    max_body_size: u64,
) -> Result<RequestHead, HttpError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| HttpError::critical(400, "request head is not valid text"))?;

    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::critical(400, "missing request line"))?;

    let mut parts = request_line.split_ascii_whitespace();
    let method_str = parts
        .next()
        .ok_or_else(|| HttpError::critical(400, "malformed request line"))?;
    let target = parts
        .next()
        .ok_or_else(|| HttpError::critical(400, "malformed request line"))?;
    let version_str = parts
        .next()
        .ok_or_else(|| HttpError::critical(400, "malformed request line"))?;
    if parts.next().is_some() {
        return Err(HttpError::critical(400, "malformed request line"));
    }

    let version = match version_str {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        v if v.starts_with("HTTP/") => {
            return Err(HttpError::critical(505, "unsupported HTTP version"))
        }
        _ => return Err(HttpError::critical(400, "malformed request line")),
    };
    let method = Method::from_bytes(method_str.as_bytes())
        .ok_or_else(|| HttpError::critical(400, "unrecognized method"))?;

    let mut headers = HeaderTable::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = parse_header_line(line)?;
        headers.add(name, value);
    }

    let (uri, query) = parse_request_target(target)?;

    // Security-sensitive headers may appear at most once.
    for name in ["content-type", "content-length", "transfer-encoding"] {
        if headers.count(name) > 1 {
            return Err(HttpError::critical(400, "duplicate header"));
        }
    }

    let transfer_encoding = match headers.get("transfer-encoding") {
        Some(value) => parse_encoding_list(value, false)?,
        None => EncodingFlags::default(),
    };
    let content_encoding = match headers.get("content-encoding") {
        Some(value) => parse_encoding_list(value, true)?,
        None => EncodingFlags::default(),
    };

    let content_length = match headers.get("content-length") {
        Some(value) => {
            if transfer_encoding.contains(EncodingFlags::CHUNKED) {
                return Err(HttpError::critical(
                    400,
                    "both Content-Length and Transfer-Encoding present",
                ));
            }
            let length: u64 = value
                .trim()
                .parse()
                .map_err(|_| HttpError::critical(400, "invalid Content-Length"))?;
            if length > max_body_size {
                return Err(HttpError::critical(413, "request body too large"));
            }
            length
        }
        None => 0,
    };

    let mut flags = RequestFlags::default();
    if content_length > 0 {
        flags = flags.with(RequestFlags::BOUND_BODY);
    } else if transfer_encoding.contains(EncodingFlags::CHUNKED) {
        flags = flags.with(RequestFlags::UNBOUND_BODY);
    }

    if method == Method::Trace
        && (flags.contains(RequestFlags::BOUND_BODY)
            || flags.contains(RequestFlags::UNBOUND_BODY))
    {
        return Err(HttpError::critical(400, "TRACE request with a body"));
    }

    if let Some(content_type) = headers.get("content-type") {
        let ct = content_type.trim();
        if ct
            .get(..33)
            .is_some_and(|p| p.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        {
            flags = flags.with(RequestFlags::URLENCODED_FORM);
        } else if ct
            .get(..19)
            .is_some_and(|p| p.eq_ignore_ascii_case("multipart/form-data"))
        {
            flags = flags.with(RequestFlags::MULTIPART_FORM);
        }
    }

    if headers
        .get_all("expect")
        .any(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    {
        flags = flags.with(RequestFlags::CLIENT_EXPECT);
    }

    Ok(RequestHead {
        method,
        version,
        raw_path: target.to_owned(),
        uri,
        query,
        headers,
        flags,
        transfer_encoding,
        content_encoding,
        content_length,
    })
}

/// A parsed HTTP request, immutable after construction, bound to its
/// connection.
pub struct HttpRequest {
    core: Rc<ConnectionCore>,
    head: RequestHead,
    body_complete: Rc<Cell<bool>>,
    post_cache: RefCell<Option<Rc<QueryTable>>>,
}

impl HttpRequest {
    pub(crate) fn new(core: Rc<ConnectionCore>, head: RequestHead) -> Self {
        let has_body = head.flags.contains(RequestFlags::BOUND_BODY)
            || head.flags.contains(RequestFlags::UNBOUND_BODY);
        Self {
            core,
            head,
            body_complete: Rc::new(Cell::new(!has_body)),
            post_cache: RefCell::new(None),
        }
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.head.method
    }

    /// The request HTTP version.
    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.head.version
    }

    /// The request-target exactly as received.
    #[must_use]
    pub fn raw_path(&self) -> &str {
        &self.head.raw_path
    }

    /// The parsed request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    /// The decoded query parameters.
    #[must_use]
    pub fn query(&self) -> &QueryTable {
        &self.head.query
    }

    /// The request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderTable {
        &self.head.headers
    }

    /// Derived request properties.
    #[must_use]
    pub fn flags(&self) -> RequestFlags {
        self.head.flags
    }

    /// The transfer-encoding token set.
    #[must_use]
    pub fn transfer_encoding(&self) -> EncodingFlags {
        self.head.transfer_encoding
    }

    /// The content-encoding token set.
    #[must_use]
    pub fn content_encoding(&self) -> EncodingFlags {
        self.head.content_encoding
    }

    /// The declared content length (0 when absent).
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.head.content_length
    }

    /// The peer address.
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.core.remote
    }

    /// The local address.
    #[must_use]
    pub fn local(&self) -> SocketAddr {
        self.core.local
    }

    /// True when the request has a body (bound or chunked).
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.head.flags.contains(RequestFlags::BOUND_BODY)
            || self.head.flags.contains(RequestFlags::UNBOUND_BODY)
    }

    /// Whether the client asked to keep the connection open: the HTTP/1.1
    /// default unless `Connection: close`, or HTTP/1.0 with an explicit
    /// `Connection: keep-alive`.
    #[must_use]
    pub fn keep_alive_requested(&self) -> bool {
        match self.head.version {
            HttpVersion::Http11 => !connection_has_token(&self.head.headers, "close"),
            HttpVersion::Http10 => connection_has_token(&self.head.headers, "keep-alive"),
        }
    }

    pub(crate) fn body_complete_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.body_complete)
    }

    /// Returns a streaming reader over the request body: a bounded reader
    /// for a declared length, a chunked reader capped at the server's body
    /// bound for chunked transfer, or an empty reader.
    #[must_use]
    pub fn body_reader(&self) -> HttpBodyReader {
        HttpBodyReader::for_request(
            Rc::clone(&self.core),
            self.head.flags,
            self.head.content_length,
            Rc::clone(&self.body_complete),
        )
    }

    /// Reads the entire request body.
    pub async fn read_body(&self) -> Result<Vec<u8>, HttpError> {
        self.body_reader().read_to_end().await
    }

    /// Decodes the request body as a POST table.
    ///
    /// Only meaningful for POST/PATCH/PUT/DELETE. URL-encoded and
    /// multipart forms are decoded into an insertion-ordered multimap; any
    /// other non-empty bound body fails with `400 unsupported request
    /// body`. The result is computed once and memoized.
    pub async fn post(&self) -> Result<Rc<QueryTable>, HttpError> {
        if let Some(cached) = self.post_cache.borrow().as_ref() {
            return Ok(Rc::clone(cached));
        }
        if !matches!(
            self.head.method,
            Method::Post | Method::Patch | Method::Put | Method::Delete
        ) {
            return Err(HttpError::critical(400, "no POST data for this method"));
        }

        let table = if self.head.flags.contains(RequestFlags::URLENCODED_FORM) {
            let body = self.read_body().await?;
            let text = std::str::from_utf8(&body)
                .map_err(|_| HttpError::critical(400, "form body is not valid text"))?;
            parse_query(text)?
        } else if self.head.flags.contains(RequestFlags::MULTIPART_FORM) {
            let content_type = self
                .head
                .headers
                .get("content-type")
                .ok_or_else(|| HttpError::critical(400, "missing content type"))?;
            let boundary = multipart::boundary_from_content_type(content_type)?;
            let body = self.read_body().await?;
            let mut table = QueryTable::default();
            for (name, value) in multipart::parse_parts(&body, &boundary)? {
                table.push(name, value);
            }
            table
        } else if self.head.flags.contains(RequestFlags::BOUND_BODY) {
            return Err(HttpError::critical(400, "unsupported request body"));
        } else {
            QueryTable::default()
        };

        let table = Rc::new(table);
        *self.post_cache.borrow_mut() = Some(Rc::clone(&table));
        Ok(table)
    }

    /// The absolute URI for this request: the configured `server_uri`
    /// override when present, else a scheme and authority derived from
    /// the transport and the `Host` header.
    #[must_use]
    pub fn absolute_uri(&self) -> String {
        let base = match &self.core.config.server_uri {
            Some(uri) => uri.trim_end_matches('/').to_owned(),
            None => {
                let scheme = if self.core.config.tls.is_some() {
                    "https"
                } else {
                    "http"
                };
                let host = if self.head.uri.authority.is_empty() {
                    self.head
                        .headers
                        .get("host")
                        .unwrap_or("localhost")
                        .to_owned()
                } else {
                    self.head.uri.authority.clone()
                };
                format!("{scheme}://{host}")
            }
        };
        format!("{base}{}", self.head.raw_path)
    }

    /// Creates the response object for this request.
    ///
    /// The response's keep-alive flag starts set for HTTP/1.1 requests
    /// that did not ask to close.
    #[must_use]
    pub fn take_response(&self) -> HttpResponse {
        let keep_alive =
            self.head.version == HttpVersion::Http11 && self.keep_alive_requested();
        HttpResponse::new(Rc::clone(&self.core), self.head.version, keep_alive)
    }

    /// Shorthand: build a response and send `body` with the given status.
    pub async fn respond(
        &self,
        status: u16,
        body: &[u8],
    ) -> Result<HttpResponse, HttpError> {
        let mut response = self.take_response();
        response.set_status(status);
        response.send_body(body).await?;
        Ok(response)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.head.method)
            .field("path", &self.head.raw_path)
            .field("version", &self.head.version)
            .finish_non_exhaustive()
    }
}
