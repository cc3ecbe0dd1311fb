//! HTTP error taxonomy.
//!
//! Every failure the per-connection loop can observe maps onto one of five
//! kinds. Critical and recoverable errors carry an HTTP status and produce
//! exactly one best-effort error response before the connection closes;
//! timeouts map to 408; disconnects end the loop silently; cancellation is
//! re-raised at the await point and never becomes an HTTP response.
//! Programmer errors (state machine misuse) are defects and panic.

use crate::error::{Error, ErrorKind};
use std::fmt;

/// Classification of an HTTP-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// Protocol violation, resource exhaustion, or unrecoverable stream
    /// fault. The connection closes after the error response.
    Critical,
    /// Request-level validation failure. Carries a status; the connection
    /// still closes after the response.
    Recoverable,
    /// The request head did not arrive in time.
    Timeout,
    /// The peer went away mid-request; no response is possible.
    Disconnect,
    /// A future was cancelled; never sent as an HTTP response.
    Cancelled,
}

/// An HTTP-level error with its response status.
#[derive(Debug, Clone)]
pub struct HttpError {
    kind: HttpErrorKind,
    status: u16,
    message: String,
}

impl HttpError {
    /// A critical error with the given status (400 is the conventional
    /// default for protocol violations).
    #[must_use]
    pub fn critical(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Critical,
            status,
            message: message.into(),
        }
    }

    /// A recoverable request-validation error.
    #[must_use]
    pub fn recoverable(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Recoverable,
            status,
            message: message.into(),
        }
    }

    /// A request-head timeout (408).
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            kind: HttpErrorKind::Timeout,
            status: 408,
            message: "request timeout".into(),
        }
    }

    /// A peer disconnect.
    #[must_use]
    pub fn disconnect() -> Self {
        Self {
            kind: HttpErrorKind::Disconnect,
            status: 0,
            message: "peer disconnected".into(),
        }
    }

    /// A cancelled operation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: HttpErrorKind::Cancelled,
            status: 0,
            message: "operation cancelled".into(),
        }
    }

    /// An unclassified handler failure, reported as 503.
    #[must_use]
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Critical,
            status: 503,
            message: message.into(),
        }
    }

    /// The error kind.
    #[must_use]
    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    /// The HTTP status to report (0 for kinds that never respond).
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True when no HTTP response may be produced for this error.
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        matches!(
            self.kind,
            HttpErrorKind::Disconnect | HttpErrorKind::Cancelled
        )
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} ({})", self.message, self.status)
        }
    }
}

impl std::error::Error for HttpError {}

impl From<Error> for HttpError {
    fn from(e: Error) -> Self {
        match e.kind() {
            ErrorKind::Cancelled => Self::cancelled(),
            ErrorKind::TimedOut => Self::timeout(),
            ErrorKind::LimitExceeded => Self::critical(413, e.to_string()),
            ErrorKind::Protocol => Self::critical(400, e.to_string()),
            ErrorKind::Incomplete | ErrorKind::Closed => Self::disconnect(),
            ErrorKind::Io => Self::critical(400, e.to_string()),
        }
    }
}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        Self::from(Error::from(e))
    }
}
