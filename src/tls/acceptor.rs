//! TLS server acceptor.

use super::error::TlsError;
use super::stream::TlsStream;
use super::types::{CertificateChain, PrivateKey, TlsFlags, TlsVersion};
use crate::io::{AsyncRead, AsyncWrite};
use rustls::{ServerConfig, ServerConnection};
use std::sync::Arc;

/// Server-side TLS endpoint. Configured once, reused for every
/// connection; cloning is cheap.
#[derive(Clone)]
pub struct TlsAcceptor {
    config: Arc<ServerConfig>,
    alpn_required: bool,
}

impl TlsAcceptor {
    /// Creates a builder from the server's certificate chain and key.
    pub fn builder(chain: CertificateChain, key: PrivateKey) -> TlsAcceptorBuilder {
        TlsAcceptorBuilder {
            chain,
            key,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            alpn: Vec::new(),
            flags: TlsFlags::TOLERATE_NO_CLIENT_AUTH,
        }
    }

    /// Accepts a TLS session over `io`, driving the handshake to
    /// completion.
    pub async fn accept<IO>(&self, io: IO) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let conn = ServerConnection::new(Arc::clone(&self.config))
            .map_err(|e| TlsError::Configuration(e.to_string()))?;
        let mut stream = TlsStream::new_server(io, conn);
        stream.handshake().await?;
        if self.alpn_required {
            let negotiated = stream.alpn_protocol().map(<[u8]>::to_vec);
            let ok = negotiated
                .as_deref()
                .is_some_and(|p| self.config.alpn_protocols.iter().any(|e| e == p));
            if !ok {
                return Err(TlsError::AlpnMismatch {
                    expected: self.config.alpn_protocols.clone(),
                    negotiated,
                });
            }
        }
        Ok(stream)
    }
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor")
            .field("alpn_required", &self.alpn_required)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TlsAcceptor`].
pub struct TlsAcceptorBuilder {
    chain: CertificateChain,
    key: PrivateKey,
    min_version: TlsVersion,
    max_version: TlsVersion,
    alpn: Vec<Vec<u8>>,
    flags: TlsFlags,
}

impl TlsAcceptorBuilder {
    /// Selects the supported protocol versions as a `(min, max)` pair.
    #[must_use]
    pub fn versions(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    /// Adds an ALPN protocol, in preference order.
    #[must_use]
    pub fn alpn_protocol(mut self, protocol: impl Into<Vec<u8>>) -> Self {
        self.alpn.push(protocol.into());
        self
    }

    /// Shorthand for advertising `http/1.1`.
    #[must_use]
    pub fn alpn_http1(self) -> Self {
        self.alpn_protocol(&b"http/1.1"[..])
    }

    /// Sets behavior flags.
    #[must_use]
    pub fn flags(mut self, flags: TlsFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builds the acceptor.
    pub fn build(self) -> Result<TlsAcceptor, TlsError> {
        if self.chain.is_empty() {
            return Err(TlsError::Configuration("empty certificate chain".into()));
        }
        let versions = TlsVersion::range(self.min_version, self.max_version)?;
        let mut config = ServerConfig::builder_with_protocol_versions(&versions)
            .with_no_client_auth()
            .with_single_cert(self.chain.into_inner(), self.key.clone_inner())?;
        config.alpn_protocols.clone_from(&self.alpn);
        Ok(TlsAcceptor {
            config: Arc::new(config),
            alpn_required: self.flags.contains(TlsFlags::FAIL_ON_ALPN_MISMATCH),
        })
    }
}
