//! TLS transport built on the rustls record-layer engine.
//!
//! The engine is treated as an opaque state machine: it advertises whether
//! it wants ciphertext in (`wants_read`), has ciphertext to push out
//! (`wants_write`), or has plaintext ready, and [`TlsStream`] multiplexes
//! the I/O and application sides over any [`AsyncRead`](crate::io::AsyncRead)
//! + [`AsyncWrite`](crate::io::AsyncWrite) transport.
//!
//! [`TlsAcceptor`] configures the server side from a certificate chain and
//! private key; [`TlsConnector`] configures the client side, including the
//! verification-disabled modes behind [`TlsFlags`].

mod acceptor;
mod connector;
mod error;
mod stream;
mod types;

pub use acceptor::{TlsAcceptor, TlsAcceptorBuilder};
pub use connector::{TlsConnector, TlsConnectorBuilder};
pub use error::TlsError;
pub use stream::TlsStream;
pub use types::{Certificate, CertificateChain, PrivateKey, TlsFlags, TlsVersion};
