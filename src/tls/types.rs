//! TLS certificate, key, version, and flag types.
//!
//! These wrap rustls types to keep the public interface decoupled from
//! engine internals. Keys are accepted as PKCS#8/PKCS#1/SEC1 DER or PEM;
//! certificates as DER or PEM chains.

use super::error::TlsError;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// A DER-encoded X.509 certificate.
#[derive(Clone, Debug)]
pub struct Certificate {
    inner: CertificateDer<'static>,
}

impl Certificate {
    /// Creates a certificate from DER-encoded bytes.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: CertificateDer::from(der.into()),
        }
    }

    /// Parses every certificate found in PEM-encoded data.
    pub fn from_pem(pem: &[u8]) -> Result<Vec<Self>, TlsError> {
        let mut reader = BufReader::new(pem);
        let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Certificate(e.to_string()))?;
        if certs.is_empty() {
            return Err(TlsError::Certificate("no certificates found in PEM".into()));
        }
        Ok(certs.into_iter().map(|c| Self { inner: c }).collect())
    }

    /// Loads certificates from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Vec<Self>, TlsError> {
        let pem = std::fs::read(path.as_ref())
            .map_err(|e| TlsError::Certificate(format!("reading file: {e}")))?;
        Self::from_pem(&pem)
    }

    /// The raw DER bytes.
    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        self.inner.as_ref()
    }

    pub(crate) fn into_inner(self) -> CertificateDer<'static> {
        self.inner
    }
}

/// A chain of X.509 certificates, leaf first.
#[derive(Clone, Debug, Default)]
pub struct CertificateChain {
    certs: Vec<Certificate>,
}

impl CertificateChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self { certs: Vec::new() }
    }

    /// Appends a certificate.
    pub fn push(&mut self, cert: Certificate) {
        self.certs.push(cert);
    }

    /// Number of certificates in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// True if the chain holds no certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Parses a chain from PEM-encoded data.
    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsError> {
        Ok(Self {
            certs: Certificate::from_pem(pem)?,
        })
    }

    /// Loads a chain from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, TlsError> {
        Ok(Self {
            certs: Certificate::from_pem_file(path)?,
        })
    }

    pub(crate) fn into_inner(self) -> Vec<CertificateDer<'static>> {
        self.certs.into_iter().map(Certificate::into_inner).collect()
    }
}

impl From<Vec<Certificate>> for CertificateChain {
    fn from(certs: Vec<Certificate>) -> Self {
        Self { certs }
    }
}

/// A private key for TLS authentication.
#[derive(Clone)]
pub struct PrivateKey {
    inner: Arc<PrivateKeyDer<'static>>,
}

impl PrivateKey {
    /// Creates a private key from PKCS#8 DER-encoded bytes.
    pub fn from_pkcs8_der(der: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der.into()))),
        }
    }

    /// Creates a private key from SEC1 (EC) DER-encoded bytes.
    pub fn from_sec1_der(der: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der.into()))),
        }
    }

    /// Parses a private key from PEM-encoded data.
    ///
    /// PKCS#8 is tried first, then PKCS#1 (RSA), then SEC1 (EC).
    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsError> {
        let mut reader = BufReader::new(pem);
        let pkcs8: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Certificate(e.to_string()))?;
        if let Some(key) = pkcs8.into_iter().next() {
            return Ok(Self {
                inner: Arc::new(PrivateKeyDer::Pkcs8(key)),
            });
        }

        let mut reader = BufReader::new(pem);
        let rsa: Vec<_> = rustls_pemfile::rsa_private_keys(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Certificate(e.to_string()))?;
        if let Some(key) = rsa.into_iter().next() {
            return Ok(Self {
                inner: Arc::new(PrivateKeyDer::Pkcs1(key)),
            });
        }

        let mut reader = BufReader::new(pem);
        let ec: Vec<_> = rustls_pemfile::ec_private_keys(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Certificate(e.to_string()))?;
        if let Some(key) = ec.into_iter().next() {
            return Ok(Self {
                inner: Arc::new(PrivateKeyDer::Sec1(key)),
            });
        }

        Err(TlsError::Certificate("no private key found in PEM".into()))
    }

    /// Loads a private key from a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let pem = std::fs::read(path.as_ref())
            .map_err(|e| TlsError::Certificate(format!("reading file: {e}")))?;
        Self::from_pem(&pem)
    }

    pub(crate) fn clone_inner(&self) -> PrivateKeyDer<'static> {
        self.inner.clone_key()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}

/// TLS protocol versions supported by the engine, selected as a
/// `(min, max)` pair. The default pair is `(Tls12, Tls13)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Resolves a `(min, max)` pair into the engine's version set.
    pub fn range(
        min: Self,
        max: Self,
    ) -> Result<Vec<&'static rustls::SupportedProtocolVersion>, TlsError> {
        if min > max {
            return Err(TlsError::Configuration(
                "minimum TLS version above maximum".into(),
            ));
        }
        let mut versions = Vec::new();
        if min <= Self::Tls12 && max >= Self::Tls12 {
            versions.push(&rustls::version::TLS12);
        }
        if max >= Self::Tls13 {
            versions.push(&rustls::version::TLS13);
        }
        Ok(versions)
    }
}

/// Behavior flags for TLS endpoints.
///
/// `NO_RENEGOTIATION` and `ENFORCE_SERVER_PREF` are accepted for
/// configuration compatibility: the rustls engine never renegotiates and
/// always applies server preference order. `TOLERATE_NO_CLIENT_AUTH`
/// matches the server default of not requesting client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsFlags(u8);

impl TlsFlags {
    /// No flags set.
    pub const NONE: TlsFlags = TlsFlags(0);
    /// Skip certificate chain verification (client).
    pub const NO_VERIFY_HOST: TlsFlags = TlsFlags(0b0000_0001);
    /// Skip server-name verification (client).
    pub const NO_VERIFY_SERVER_NAME: TlsFlags = TlsFlags(0b0000_0010);
    /// Apply the server's cipher suite preference order.
    pub const ENFORCE_SERVER_PREF: TlsFlags = TlsFlags(0b0000_0100);
    /// Refuse renegotiation.
    pub const NO_RENEGOTIATION: TlsFlags = TlsFlags(0b0000_1000);
    /// Do not require a client certificate.
    pub const TOLERATE_NO_CLIENT_AUTH: TlsFlags = TlsFlags(0b0001_0000);
    /// Fail the handshake when ALPN negotiation does not produce one of
    /// the configured protocols.
    pub const FAIL_ON_ALPN_MISMATCH: TlsFlags = TlsFlags(0b0010_0000);

    /// Combines flag sets.
    #[must_use]
    pub const fn with(self, other: TlsFlags) -> TlsFlags {
        TlsFlags(self.0 | other.0)
    }

    /// True if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: TlsFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_range_resolution() {
        let both =
            TlsVersion::range(TlsVersion::Tls12, TlsVersion::Tls13).expect("range");
        assert_eq!(both.len(), 2);
        let only13 =
            TlsVersion::range(TlsVersion::Tls13, TlsVersion::Tls13).expect("range");
        assert_eq!(only13.len(), 1);
        assert!(TlsVersion::range(TlsVersion::Tls13, TlsVersion::Tls12).is_err());
    }

    #[test]
    fn flags_combine_and_query() {
        let flags = TlsFlags::NO_VERIFY_HOST.with(TlsFlags::FAIL_ON_ALPN_MISMATCH);
        assert!(flags.contains(TlsFlags::NO_VERIFY_HOST));
        assert!(flags.contains(TlsFlags::FAIL_ON_ALPN_MISMATCH));
        assert!(!flags.contains(TlsFlags::NO_VERIFY_SERVER_NAME));
        assert!(TlsFlags::default().contains(TlsFlags::NONE));
    }

    #[test]
    fn pem_without_key_material_is_rejected() {
        let err = PrivateKey::from_pem(b"not a pem").expect_err("no key");
        assert!(matches!(err, TlsError::Certificate(_)));
        let err = Certificate::from_pem(b"not a pem").expect_err("no cert");
        assert!(matches!(err, TlsError::Certificate(_)));
    }
}
