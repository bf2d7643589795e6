//! State Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A state error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("inspection not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Media capture and upload start require an `Active` inspection.
    #[display("inspection is not active: {_0}")]
    NotActive(#[error(not(source))] String),
    #[display("label must not be empty")]
    InvalidLabel,
    #[display("access token must not be empty")]
    InvalidCredentials,
    /// Reading or writing the key-value store failed.
    #[display("persistence error for key {_0}")]
    Persistence(#[error(not(source))] String),
    /// Serialization/deserialization error.
    #[display("invalid persisted data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
