//! Application Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    /// The local key-value store could not be opened or read.
    #[display("local storage unavailable")]
    Storage,
    #[display("could not set up the remote storage client")]
    Remote,
    #[display("could not install the log subscriber: {_0}")]
    Logging(#[error(not(source))] String),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
