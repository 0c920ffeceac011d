//! Error types for the RTSP/RTP library.
//!
//! Variants map onto the taxonomy from the specification:
//!
//! - **ProtocolError** — [`Error::Parse`], [`Error::BadTransport`].
//! - **TransportError** — [`Error::Io`], [`Error::Resolve`].
//! - **StateError** — [`Error::WrongState`].
//! - **ResourceError** — [`Error::ResourceNotFound`], [`Error::PathEscape`].
//! - **ConfigurationError** — [`Error::UnsupportedOption`].
//! - **InternalError** — [`Error::Internal`].

use std::fmt;

/// Byte offset at which a parser committed its last good token.
pub type Offset = usize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RTSP message or header grammar (RFC 2326 §6/§7).
    #[error("RTSP parse error at byte {offset}: {kind}")]
    Parse { kind: ParseErrorKind, offset: Offset },

    /// `Transport` header did not contain at least one parseable spec.
    #[error("malformed Transport header: {0}")]
    BadTransport(String),

    /// Host resolution failed for an RTSP URL.
    #[error("could not resolve host: {0}")]
    Resolve(String),

    /// No session with the given identifier exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A method was invoked in a state that forbids it.
    #[error("method not valid in current state: {0}")]
    WrongState(String),

    /// Requested resource does not exist under the resource root.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Request-URI attempted to escape the configured resource root.
    #[error("path escapes resource root: {0}")]
    PathEscape(String),

    /// A required option tag was not recognized.
    #[error("option not supported: {0}")]
    UnsupportedOption(String),

    /// No transport spec in the peer's `Transport` header was acceptable.
    #[error("unsupported transport")]
    UnsupportedTransport,

    /// Client-side SETUP failed (non-2xx response or malformed Transport).
    #[error("SETUP failed: {0}")]
    SetupFailed(String),

    /// The server's port allocator exhausted its configured range.
    #[error("port range exhausted")]
    PortRangeExhausted,

    /// [`crate::server::Server::start`] was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// An operation that requires a started server/client was attempted first.
    #[error("not started")]
    NotStarted,

    /// Caught panic or otherwise-unreachable internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Specific kind of RTSP message parse failure (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Start line did not match the request or response grammar.
    MalformedStartLine,
    /// A header line was missing its `:` separator or violated the token grammar.
    MalformedHeader,
    /// The message ended before a bare CRLF terminator was seen.
    UnexpectedTerminator,
    /// The `Transport` header value had no parseable transport-spec.
    BadTransport,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedStartLine => write!(f, "malformed start line"),
            Self::MalformedHeader => write!(f, "malformed header"),
            Self::UnexpectedTerminator => write!(f, "unexpected terminator"),
            Self::BadTransport => write!(f, "malformed transport header"),
        }
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
