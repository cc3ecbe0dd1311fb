//! RFC 7230 chunked transfer coding.
//!
//! The reader parses `hex-size [; ext] CRLF data CRLF` frames, terminating
//! on a size-0 chunk followed by optional trailers (ignored) and a final
//! CRLF. Malformed sizes, missing CRLFs, and size overflow surface as
//! `InvalidData` I/O errors, which the error layer maps to protocol
//! errors. The writer frames each buffer as one chunk and `finish` emits
//! the terminating zero chunk exactly once.

use crate::error::Error;
use crate::io::{AsyncRead, AsyncWrite, ReadBuf};
use crate::stream::StreamWriter;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

const MAX_CHUNK_LINE: usize = 1024;
const MAX_TRAILER_BYTES: usize = 8192;

fn protocol_error(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[derive(Debug)]
enum ChunkState {
    SizeLine,
    Data { remaining: u64 },
    DataCrlf { matched: usize },
    Trailers { seen: usize },
    Done,
}

/// Decodes a chunked-encoded stream into its payload bytes.
#[derive(Debug)]
pub struct ChunkedReader<R> {
    inner: R,
    state: ChunkState,
    line: Vec<u8>,
}

impl<R> ChunkedReader<R> {
    /// Wraps a chunked-encoded source.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: ChunkState::SizeLine,
            line: Vec::new(),
        }
    }

    /// True once the terminating zero chunk has been consumed.
    #[must_use]
    pub fn finished(&self) -> bool {
        matches!(self.state, ChunkState::Done)
    }

    /// Returns a reference to the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let line = std::str::from_utf8(line).map_err(|_| protocol_error("malformed chunk size"))?;
    let size_part = line.split(';').next().unwrap_or("").trim();
    if size_part.is_empty() {
        return Err(protocol_error("malformed chunk size"));
    }
    u64::from_str_radix(size_part, 16).map_err(|_| protocol_error("malformed chunk size"))
}

impl<R: AsyncRead + Unpin> ChunkedReader<R> {
    /// Reads a single byte from the source. `None` means EOF.
    fn poll_byte(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Option<u8>>> {
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match Pin::new(&mut self.inner).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().is_empty() {
                    Poll::Ready(Ok(None))
                } else {
                    Poll::Ready(Ok(Some(byte[0])))
                }
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Accumulates `self.line` up to a CRLF (both bytes stripped).
    /// `Ready(Ok(true))` means the line is complete.
    fn poll_line(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<bool>> {
        loop {
            match self.poll_byte(cx) {
                Poll::Ready(Ok(Some(b'\n'))) if self.line.last() == Some(&b'\r') => {
                    self.line.pop();
                    return Poll::Ready(Ok(true));
                }
                Poll::Ready(Ok(Some(b))) => {
                    self.line.push(b);
                    if self.line.len() > MAX_CHUNK_LINE {
                        return Poll::Ready(Err(protocol_error("chunk line too long")));
                    }
                }
                Poll::Ready(Ok(None)) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "eof inside chunk framing",
                    )))
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChunkedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match this.state {
                ChunkState::Done => return Poll::Ready(Ok(())),

                ChunkState::SizeLine => {
                    match this.poll_line(cx) {
                        Poll::Ready(Ok(true)) => {}
                        Poll::Ready(Ok(false)) => unreachable!("poll_line yields true or errors"),
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    let size = parse_chunk_size(&this.line)?;
                    this.line.clear();
                    this.state = if size == 0 {
                        ChunkState::Trailers { seen: 0 }
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }

                ChunkState::Data { remaining } => {
                    if buf.remaining() == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let cap = (buf.remaining() as u64).min(remaining) as usize;
                    let n = {
                        let unfilled = buf.unfilled();
                        let mut capped = ReadBuf::new(&mut unfilled[..cap]);
                        match Pin::new(&mut this.inner).poll_read(cx, &mut capped) {
                            Poll::Ready(Ok(())) => capped.filled().len(),
                            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                            Poll::Pending => return Poll::Pending,
                        }
                    };
                    if n == 0 {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "eof inside chunk data",
                        )));
                    }
                    buf.advance(n);
                    let remaining = remaining - n as u64;
                    this.state = if remaining == 0 {
                        ChunkState::DataCrlf { matched: 0 }
                    } else {
                        ChunkState::Data { remaining }
                    };
                    return Poll::Ready(Ok(()));
                }

                ChunkState::DataCrlf { matched } => {
                    let byte = match this.poll_byte(cx) {
                        Poll::Ready(Ok(Some(b))) => b,
                        Poll::Ready(Ok(None)) => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof inside chunk framing",
                            )))
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    };
                    let expected = if matched == 0 { b'\r' } else { b'\n' };
                    if byte != expected {
                        return Poll::Ready(Err(protocol_error("missing CRLF after chunk")));
                    }
                    this.state = if matched == 0 {
                        ChunkState::DataCrlf { matched: 1 }
                    } else {
                        ChunkState::SizeLine
                    };
                }

                ChunkState::Trailers { seen } => {
                    match this.poll_line(cx) {
                        Poll::Ready(Ok(true)) => {}
                        Poll::Ready(Ok(false)) => unreachable!("poll_line yields true or errors"),
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    let seen = seen + this.line.len() + 2;
                    if seen > MAX_TRAILER_BYTES {
                        return Poll::Ready(Err(protocol_error("trailer block too large")));
                    }
                    let empty = this.line.is_empty();
                    this.line.clear();
                    this.state = if empty {
                        ChunkState::Done
                    } else {
                        ChunkState::Trailers { seen }
                    };
                }
            }
        }
    }
}

/// Encodes chunks onto a [`StreamWriter`].
pub struct ChunkedWriter<W> {
    inner: StreamWriter<W>,
    finished: bool,
}

impl<W: AsyncWrite + Unpin + 'static> ChunkedWriter<W> {
    /// Wraps a queued writer. The writer handle is shared, so the chunked
    /// frames interleave with nothing: each frame is one write item.
    #[must_use]
    pub fn new(inner: StreamWriter<W>) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// Emits `hex(len) CRLF data CRLF`. Empty input writes nothing, since a
    /// zero-sized chunk would terminate the stream.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.finished {
            return Err(Error::closed().with_context("chunked writer finished"));
        }
        if data.is_empty() {
            return Ok(());
        }
        let mut frame = Vec::with_capacity(data.len() + 20);
        frame.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
        frame.extend_from_slice(data);
        frame.extend_from_slice(b"\r\n");
        self.inner.write(frame).await
    }

    /// Emits the terminating `0 CRLF CRLF` exactly once.
    pub async fn finish(&mut self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::closed().with_context("chunked writer finished"));
        }
        self.finished = true;
        self.inner.write(b"0\r\n\r\n".to_vec()).await
    }

    /// True once [`finish`](Self::finish) has run.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
