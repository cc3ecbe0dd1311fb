//! Buffered stream reader.

use crate::error::{Error, ErrorKind};
use crate::io::{AsyncRead, ReadBuf};
use std::future::poll_fn;
use std::pin::Pin;
use std::task::Poll;

const FILL_CHUNK: usize = 8192;

/// Buffered reader over any [`AsyncRead`] with the byte-oriented operations
/// the protocol layers need. EOF is sticky: once the source reports end of
/// stream, no further fill is attempted.
///
/// `StreamReader` also implements [`AsyncRead`] itself, draining its buffer
/// before touching the source, so adapters can stack on top of it without
/// losing bytes that were read ahead (a parsed request head leaves body
/// bytes behind in the buffer).
#[derive(Debug)]
pub struct StreamReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R> StreamReader<R> {
    /// Wraps `inner` with an empty buffer.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// The bytes read ahead but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// True once the source hit EOF and the buffer is drained.
    #[must_use]
    pub fn at_eof(&self) -> bool {
        self.eof && self.pos >= self.buf.len()
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn consume(&mut self, n: usize) -> Vec<u8> {
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos > FILL_CHUNK {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        out
    }
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    /// Reads one chunk from the source into the buffer. Returns the byte
    /// count; 0 means EOF.
    async fn fill(&mut self) -> Result<usize, Error> {
        if self.eof {
            return Ok(0);
        }
        let mut chunk = [0u8; FILL_CHUNK];
        let n = poll_fn(|cx| {
            let mut read_buf = ReadBuf::new(&mut chunk);
            match Pin::new(&mut self.inner).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Pending => Poll::Pending,
            }
        })
        .await?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }

    /// Reads exactly `n` bytes, or up to EOF. At EOF the short buffer is
    /// returned; `at_eof` tells the two cases apart.
    pub async fn read_exact_or_eof(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        while self.buffered().len() < n && !self.eof {
            self.fill().await?;
        }
        let take = n.min(self.buffered().len());
        Ok(self.consume(take))
    }

    /// Reads at least one byte into `buf`, returning the count. Returns 0
    /// if and only if the source is at EOF (or `buf` is empty).
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.buffered().is_empty() {
            if self.fill().await? == 0 {
                return Ok(0);
            }
        }
        let n = self.buffered().len().min(buf.len());
        let data = self.consume(n);
        buf[..n].copy_from_slice(&data);
        Ok(n)
    }

    /// Reads until the byte sequence `sep` is matched, inclusive.
    ///
    /// Fails with `LimitExceeded` if a match cannot end within `limit`
    /// consumed bytes, and with `Incomplete` on EOF before a match.
    pub async fn read_until(&mut self, sep: &[u8], limit: usize) -> Result<Vec<u8>, Error> {
        assert!(!sep.is_empty(), "empty separator");
        let mut searched = 0usize;
        loop {
            let hay = self.buffered();
            let from = searched.saturating_sub(sep.len() - 1);
            if let Some(i) = find(&hay[from..], sep) {
                let end = from + i + sep.len();
                if end > limit {
                    return Err(Error::new(ErrorKind::LimitExceeded).with_context("read_until"));
                }
                return Ok(self.consume(end));
            }
            searched = hay.len();
            if searched >= limit {
                return Err(Error::new(ErrorKind::LimitExceeded).with_context("read_until"));
            }
            if self.eof || self.fill().await? == 0 {
                return Err(Error::new(ErrorKind::Incomplete).with_context("read_until"));
            }
        }
    }

    /// Discards everything up to EOF, returning the byte count.
    pub async fn consume_to_eof(&mut self) -> Result<u64, Error> {
        let mut total = self.buffered().len() as u64;
        let n = self.buffered().len();
        self.consume(n);
        loop {
            let read = self.fill().await?;
            if read == 0 {
                return Ok(total);
            }
            total += read as u64;
            let n = self.buffered().len();
            self.consume(n);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl<R: AsyncRead + Unpin> AsyncRead for StreamReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.buffered().is_empty() {
            let n = this.buffered().len().min(buf.remaining());
            let data = this.consume(n);
            buf.put_slice(&data);
            return Poll::Ready(Ok(()));
        }
        if this.eof {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
