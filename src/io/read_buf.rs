//! A safe wrapper around a partially-filled read buffer.

/// Tracks how much of a caller-provided buffer has been filled.
#[derive(Debug)]
pub struct ReadBuf<'a> {
    buf: &'a mut [u8],
    filled: usize,
}

impl<'a> ReadBuf<'a> {
    /// Wraps `buf` with nothing filled yet.
    #[must_use]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, filled: 0 }
    }

    /// Total capacity of the underlying buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes still available for filling.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.filled
    }

    /// The filled prefix.
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// The unfilled suffix.
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Marks `n` further bytes as filled.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the remaining capacity.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance past end of buffer");
        self.filled += n;
    }

    /// Copies `src` into the buffer and marks it filled.
    ///
    /// # Panics
    ///
    /// Panics if `src` exceeds the remaining capacity.
    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(src.len() <= self.remaining(), "put_slice past end of buffer");
        self.buf[self.filled..self.filled + src.len()].copy_from_slice(src);
        self.filled += src.len();
    }
}
