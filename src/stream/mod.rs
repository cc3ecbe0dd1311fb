//! Byte-stream transports layered over the async I/O traits.
//!
//! [`StreamReader`] and [`StreamWriter`] form the buffered duplex channel
//! every higher layer builds on. [`BoundedReader`] caps a reader at a byte
//! limit, and the chunked module carries the RFC 7230 transfer codec. The
//! layers compose through [`AsyncRead`](crate::io::AsyncRead): a request
//! body is a chunked reader over a bounded reader over the connection's
//! stream reader, which itself may sit on a TLS stream.

mod bounded;
mod chunked;
mod reader;
mod writer;

pub use bounded::{BoundMode, BoundedReader};
pub use chunked::{ChunkedReader, ChunkedWriter};
pub use reader::StreamReader;
pub use writer::{StreamWriter, WriteFuture};
