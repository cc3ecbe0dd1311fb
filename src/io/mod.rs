//! Minimal async I/O traits and adapters.
//!
//! The design mirrors `std::io` but is poll-based and intentionally small:
//! [`AsyncRead`] and [`AsyncWrite`] with a safe [`ReadBuf`], extension
//! futures for the common whole-buffer operations, read/write halves over a
//! shared stream, and an in-memory duplex pipe for wiring stream stacks
//! together without a socket.

mod ext;
mod mem;
mod read;
mod read_buf;
mod split;
mod write;

pub use ext::{AsyncReadExt, AsyncWriteExt};
pub use mem::{duplex, DuplexStream};
pub use read::AsyncRead;
pub use read_buf::ReadBuf;
pub use split::{split, split_shared, ReadHalf, WriteHalf};
pub use write::AsyncWrite;
