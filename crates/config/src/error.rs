//! Configuration Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("unsupported configuration format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The merged sources could not be deserialized.
    #[display("could not read configuration")]
    Extract,
    #[display("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: &'static str },
}

impl ErrorKind {
    /// Configuration errors need a human to fix the configuration.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
