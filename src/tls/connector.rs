//! TLS client connector.

use super::error::TlsError;
use super::stream::TlsStream;
use super::types::{Certificate, TlsFlags, TlsVersion};
use crate::io::{AsyncRead, AsyncWrite};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;

/// Client-side TLS endpoint. Cloning is cheap.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    alpn_required: bool,
}

impl TlsConnector {
    /// Creates a builder with no roots and default versions.
    #[must_use]
    pub fn builder() -> TlsConnectorBuilder {
        TlsConnectorBuilder {
            roots: Vec::new(),
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            alpn: Vec::new(),
            flags: TlsFlags::NONE,
        }
    }

    /// Opens a TLS session to `server_name` over `io`, driving the
    /// handshake to completion.
    pub async fn connect<IO>(
        &self,
        server_name: &str,
        io: IO,
    ) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| TlsError::InvalidDnsName(server_name.to_owned()))?;
        let conn = ClientConnection::new(Arc::clone(&self.config), name)
            .map_err(|e| TlsError::Configuration(e.to_string()))?;
        let mut stream = TlsStream::new_client(io, conn);
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

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("alpn_required", &self.alpn_required)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TlsConnector`].
pub struct TlsConnectorBuilder {
    roots: Vec<Certificate>,
    min_version: TlsVersion,
    max_version: TlsVersion,
    alpn: Vec<Vec<u8>>,
    flags: TlsFlags,
}

impl TlsConnectorBuilder {
    /// Adds a trusted root certificate.
    #[must_use]
    pub fn add_root(mut self, cert: Certificate) -> Self {
        self.roots.push(cert);
        self
    }

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

    /// Sets behavior flags. `NO_VERIFY_HOST` and `NO_VERIFY_SERVER_NAME`
    /// disable certificate verification entirely; configured roots are
    /// then ignored.
    #[must_use]
    pub fn flags(mut self, flags: TlsFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builds the connector.
    pub fn build(self) -> Result<TlsConnector, TlsError> {
        let versions = TlsVersion::range(self.min_version, self.max_version)?;
        let builder = ClientConfig::builder_with_protocol_versions(&versions);
        let no_verify = self.flags.contains(TlsFlags::NO_VERIFY_HOST)
            || self.flags.contains(TlsFlags::NO_VERIFY_SERVER_NAME);
        let mut config = if no_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
                .with_no_client_auth()
        } else {
            let mut store = rustls::RootCertStore::empty();
            for cert in self.roots {
                store
                    .add(cert.into_inner())
                    .map_err(|e| TlsError::Certificate(e.to_string()))?;
            }
            builder
                .with_root_certificates(store)
                .with_no_client_auth()
        };
        config.alpn_protocols.clone_from(&self.alpn);
        Ok(TlsConnector {
            config: Arc::new(config),
            alpn_required: self.flags.contains(TlsFlags::FAIL_ON_ALPN_MISMATCH),
        })
    }
}

/// Certificate verifier that accepts everything. Behind the
/// `NO_VERIFY_HOST` / `NO_VERIFY_SERVER_NAME` flags only.
#[derive(Debug)]
struct NoVerification {
    schemes: Vec<SignatureScheme>,
}

impl NoVerification {
    fn new() -> Self {
        Self {
            schemes: rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}
