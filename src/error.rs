//! Error types and error handling strategy.
//!
//! One error type covers the runtime and stream layers. Errors are explicit
//! and typed, carry optional context text and an optional source, and are
//! `Clone` so a promise can fan a failure out to every consumer. Programmer
//! errors (double-completing a promise, writing into a started response) are
//! defects: they panic instead of returning an error.

use std::fmt;
use std::io;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation was cancelled.
    Cancelled,
    /// A deadline elapsed before the operation finished.
    TimedOut,
    /// A byte limit would be crossed without satisfying the request.
    LimitExceeded,
    /// The stream ended before the requested data was found.
    Incomplete,
    /// The peer violated the wire protocol.
    Protocol,
    /// The stream or resource is closed.
    Closed,
    /// An I/O error from the operating system.
    Io,
}

impl ErrorKind {
    /// Returns a static description of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "operation cancelled",
            Self::TimedOut => "operation timed out",
            Self::LimitExceeded => "limit exceeded",
            Self::Incomplete => "incomplete",
            Self::Protocol => "protocol error",
            Self::Closed => "stream closed",
            Self::Io => "I/O error",
        }
    }
}

/// The main error type for runtime and stream operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Shorthand for a cancellation error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Shorthand for a closed-stream error.
    #[must_use]
    pub const fn closed() -> Self {
        Self::new(ErrorKind::Closed)
    }

    /// Returns the underlying I/O error kind, if this error wraps one.
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        if self.kind != ErrorKind::Io {
            return None;
        }
        self.source
            .as_deref()
            .and_then(|s| s.downcast_ref::<io::Error>())
            .map(io::Error::kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{}: {ctx}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::TimedOut => ErrorKind::TimedOut,
            io::ErrorKind::UnexpectedEof => ErrorKind::Incomplete,
            io::ErrorKind::InvalidData => ErrorKind::Protocol,
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => ErrorKind::Closed,
            _ => ErrorKind::Io,
        };
        Self::new(kind).with_source(e)
    }
}

/// Convenience alias for results using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
