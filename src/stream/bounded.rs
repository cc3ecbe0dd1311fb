//! Length-bounded reader.

use crate::io::{AsyncRead, ReadBuf};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// How a [`BoundedReader`] interprets its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundMode {
    /// Exactly `limit` bytes are expected; an earlier source EOF is a
    /// framing violation, visible through [`BoundedReader::premature_eof`].
    Exact,
    /// Up to `limit` bytes; an earlier EOF is ordinary.
    AtMost,
}

/// Wraps a reader and refuses to read past `limit` bytes.
///
/// Frames request bodies with a known `Content-Length` (`Exact`) and caps
/// chunked bodies at the server's body-size bound (`AtMost`).
#[derive(Debug)]
pub struct BoundedReader<R> {
    inner: R,
    limit: u64,
    consumed: u64,
    mode: BoundMode,
    premature_eof: bool,
}

impl<R> BoundedReader<R> {
    /// Caps `inner` at `limit` bytes with the given mode.
    #[must_use]
    pub fn new(inner: R, limit: u64, mode: BoundMode) -> Self {
        Self {
            inner,
            limit,
            consumed: 0,
            mode,
            premature_eof: false,
        }
    }

    /// True once `limit` bytes have been delivered.
    #[must_use]
    pub fn at_eof(&self) -> bool {
        self.consumed == self.limit
    }

    /// Bytes still allowed through the bound.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit - self.consumed
    }

    /// Bytes delivered so far.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// True if the source ended before an `Exact` bound was satisfied.
    #[must_use]
    pub fn premature_eof(&self) -> bool {
        self.premature_eof
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

impl<R: AsyncRead + Unpin> AsyncRead for BoundedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let remaining = this.limit - this.consumed;
        if remaining == 0 || buf.remaining() == 0 {
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
        if n == 0 && this.mode == BoundMode::Exact {
            this.premature_eof = true;
        }
        this.consumed += n as u64;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::AsyncReadExt;
    use crate::runtime::Dispatcher;

    #[test]
    fn delivers_exactly_the_bound() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let src: &[u8] = b"0123456789";
            let mut bounded = BoundedReader::new(src, 4, BoundMode::Exact);
            let mut out = Vec::new();
            bounded.read_to_end(&mut out).await.expect("read");
            assert_eq!(out, b"0123");
            assert!(bounded.at_eof());
            assert!(!bounded.premature_eof());
        });
    }

    #[test]
    fn flags_short_source_in_exact_mode() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let src: &[u8] = b"ab";
            let mut bounded = BoundedReader::new(src, 10, BoundMode::Exact);
            let mut out = Vec::new();
            bounded.read_to_end(&mut out).await.expect("read");
            assert_eq!(out, b"ab");
            assert!(!bounded.at_eof());
            assert!(bounded.premature_eof());
            assert_eq!(bounded.remaining(), 8);
        });
    }

    #[test]
    fn at_most_mode_tolerates_short_source() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let src: &[u8] = b"ab";
            let mut bounded = BoundedReader::new(src, 10, BoundMode::AtMost);
            let mut out = Vec::new();
            bounded.read_to_end(&mut out).await.expect("read");
            assert_eq!(out, b"ab");
            assert!(!bounded.premature_eof());
        });
    }

    #[test]
    fn zero_limit_is_immediate_eof() {
        let dispatcher = Dispatcher::new().expect("dispatcher");
        dispatcher.block_on(async {
            let src: &[u8] = b"data";
            let mut bounded = BoundedReader::new(src, 0, BoundMode::Exact);
            let mut buf = [0u8; 4];
            assert_eq!(bounded.read(&mut buf).await.expect("read"), 0);
            assert!(bounded.at_eof());
        });
    }
}
