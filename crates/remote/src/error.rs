//! Remote Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Transport and decoding failures are attached as children
//! of the [`ErrorKind`] that describes them.

use derive_more::{Display, Error};

/// A remote storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The provider could not be reached (DNS, connect, TLS, timeout).
    #[display("network error")]
    Network,
    /// Access token missing, expired or revoked. Reconnect the account.
    #[display("unauthorized")]
    Unauthorized,
    /// Resource (or its parent directory) does not exist.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Resource already exists.
    #[display("conflict: {_0}")]
    Conflict(#[error(not(source))] String),
    /// Quota exhausted or file too large for the account.
    #[display("insufficient storage")]
    InsufficientStorage,
    /// Provider asked us to slow down.
    #[display("too many requests")]
    TooManyRequests,
    /// Any other 4xx response.
    #[display("request rejected with status {_0}")]
    Rejected(#[error(not(source))] u16),
    /// 5xx response; transient on the provider's side.
    #[display("server error with status {_0}")]
    Server(#[error(not(source))] u16),
    /// The provider answered with something we could not make sense of.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] &'static str),
    /// Local media referenced by an upload could not be read.
    #[display("unreadable local source: {_0}")]
    LocalSource(#[error(not(source))] String),
    /// Path contains empty, relative or otherwise invalid segments.
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Server(_) | Self::TooManyRequests)
    }

    /// Map an unsuccessful HTTP status onto an error category.
    ///
    /// `resource` is the remote path (or upload target) the request was about.
    pub fn from_status(status: u16, resource: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound(resource.into()),
            409 => Self::Conflict(resource.into()),
            413 | 507 => Self::InsufficientStorage,
            429 => Self::TooManyRequests,
            500..=599 => Self::Server(status),
            _ => Self::Rejected(status),
        }
    }
}
