//! Request body acquisition.
//!
//! The body reader façade composes the connection's buffered reader with
//! the framing the request head declared: a length-bounded reader for
//! `Content-Length`, or a chunked reader over a body-size-bounded reader
//! for `Transfer-Encoding: chunked`. The first read settles any owed
//! `100 Continue` before touching the body.

use super::connection::ConnectionCore;
use super::error::HttpError;
use super::request::RequestFlags;
use crate::io::{AsyncRead, ReadBuf};
use crate::stream::{BoundMode, BoundedReader, ChunkedReader};
use std::cell::Cell;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Reader over the connection's stream reader, borrowing it only for the
/// duration of each poll so the request and the connection loop can both
/// hold the core.
pub(crate) struct CoreReader {
    core: Rc<ConnectionCore>,
}

impl AsyncRead for CoreReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut reader = self.core.reader.borrow_mut();
        Pin::new(&mut *reader).poll_read(cx, buf)
    }
}

enum BodyFraming {
    Empty,
    Bounded(BoundedReader<CoreReader>),
    Chunked(ChunkedReader<BoundedReader<CoreReader>>),
}

/// Streaming reader over a request body.
pub struct HttpBodyReader {
    core: Rc<ConnectionCore>,
    framing: BodyFraming,
    complete: Rc<Cell<bool>>,
}

impl HttpBodyReader {
    pub(crate) fn for_request(
        core: Rc<ConnectionCore>,
        flags: RequestFlags,
        content_length: u64,
        complete: Rc<Cell<bool>>,
    ) -> Self {
        let source = CoreReader {
            core: Rc::clone(&core),
        };
        let framing = if flags.contains(RequestFlags::BOUND_BODY) {
            BodyFraming::Bounded(BoundedReader::new(source, content_length, BoundMode::Exact))
        } else if flags.contains(RequestFlags::UNBOUND_BODY) {
            let cap = core.config.max_request_body_size as u64;
            BodyFraming::Chunked(ChunkedReader::new(BoundedReader::new(
                source,
                cap,
                BoundMode::AtMost,
            )))
        } else {
            BodyFraming::Empty
        };
        Self {
            core,
            framing,
            complete,
        }
    }

    /// True iff the lowest-level bounded reader has delivered every byte
    /// its bound allows. Distinguishes "the client filled the cap" from
    /// "the transfer was cut short".
    #[must_use]
    pub fn at_bound(&self) -> bool {
        match &self.framing {
            BodyFraming::Empty => true,
            BodyFraming::Bounded(b) => b.at_eof(),
            BodyFraming::Chunked(c) => c.get_ref().at_eof(),
        }
    }

    /// True once the body has been fully consumed per its framing.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.get()
    }

    /// Sends the owed `HTTP/1.1 100 Continue` interim response, if any.
    async fn handle_expect(&self) -> Result<(), HttpError> {
        if !self.core.expect_pending.replace(false) {
            return Ok(());
        }
        self.core
            .writer
            .write(b"HTTP/1.1 100 Continue\r\n\r\n".to_vec())
            .await
            .map_err(HttpError::from)
    }

    /// Reads at least one byte into `buf`; 0 means the body is complete.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.handle_expect().await?;
        match &mut self.framing {
            BodyFraming::Empty => Ok(0),
            BodyFraming::Bounded(bounded) => {
                let n = poll_fn(|cx| {
                    let mut read_buf = ReadBuf::new(buf);
                    match Pin::new(&mut *bounded).poll_read(cx, &mut read_buf) {
                        Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
                        Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                        Poll::Pending => Poll::Pending,
                    }
                })
                .await
                .map_err(HttpError::from)?;
                if n == 0 && !bounded.at_eof() {
                    return Err(HttpError::disconnect());
                }
                if bounded.at_eof() {
                    self.complete.set(true);
                }
                Ok(n)
            }
            BodyFraming::Chunked(chunked) => {
                let result = poll_fn(|cx| {
                    let mut read_buf = ReadBuf::new(buf);
                    match Pin::new(&mut *chunked).poll_read(cx, &mut read_buf) {
                        Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
                        Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                        Poll::Pending => Poll::Pending,
                    }
                })
                .await;
                match result {
                    Ok(n) => {
                        if chunked.finished() {
                            self.complete.set(true);
                        }
                        Ok(n)
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        // The cap cutting the stream short means the body
                        // ran past the server's bound; a true peer EOF is
                        // a disconnect.
                        if chunked.get_ref().at_eof() {
                            Err(HttpError::critical(413, "request body too large"))
                        } else {
                            Err(HttpError::disconnect())
                        }
                    }
                    Err(e) => Err(HttpError::from(e)),
                }
            }
        }
    }

    /// Reads the body to completion.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, HttpError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read_some(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}
