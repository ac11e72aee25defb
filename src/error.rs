//! Error types and error handling strategy for Alting.
//!
//! Every failure a channel operation can produce is classified by a
//! [`ErrorKind`]. The kinds mirror the outcomes an alternation can have:
//! a request either commits, times out, is cancelled, loses its channel to
//! retirement, is evicted by an overflow policy, or was malformed to begin
//! with.
//!
//! Principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Every failure surfaces through the caller's completer; the core never
//!   logs-and-swallows
//! - Aggregates unwrap to their single underlying cause when unambiguous

use core::fmt;
use std::sync::Arc;

/// The kind of failure a channel or alternation operation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The deadline elapsed before any request committed.
    Timeout,
    /// An external cancellation signal arrived before any request committed.
    Cancelled,
    /// The channel reached the retired state while the request was live, or
    /// was already retired when the request was posted.
    Retired,
    /// The request was refused or evicted by a pending-queue overflow policy.
    Overflow,
    /// Programmer error: empty alternation, Fair priority without a channel
    /// set, or a read and a write against the same channel in one alt.
    InvalidOperation,
}

impl ErrorKind {
    /// Returns true if a caller may reasonably retry the operation.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled | Self::Overflow)
    }
}

/// The main error type for Alting operations.
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

    /// Returns true if this error represents an elapsed deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error represents channel retirement.
    #[must_use]
    pub const fn is_retired(&self) -> bool {
        matches!(self.kind, ErrorKind::Retired)
    }

    /// Adds deterministic context text to the error.
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

    /// Shorthand for an [`ErrorKind::InvalidOperation`] with context.
    #[must_use]
    pub fn invalid(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation).with_context(ctx)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for Alting operations.
pub type Result<T> = core::result::Result<T, Error>;
