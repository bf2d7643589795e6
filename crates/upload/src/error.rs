//! Upload Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Remote and state failures are attached as children of
//! the [`ErrorKind`] that describes what the upload was doing at the time.

use crate::classify::Category;
use carcheck_state::MediaKind;
use derive_more::{Display, Error};

/// An upload error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for upload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single media item could not be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Remote file name, e.g. `photo_002.jpg`.
    pub name: String,
    pub kind: MediaKind,
    pub category: Category,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No account is connected.
    #[display("no account connected")]
    NotConnected,
    #[display("credentials expired")]
    CredentialsExpired,
    #[display("unknown inspection: {_0}")]
    UnknownInspection(#[error(not(source))] String),
    #[display("inspection has no media to upload: {_0}")]
    NothingToUpload(#[error(not(source))] String),
    /// Only `Active` inspections are uploaded; a completed one keeps its
    /// status and link.
    #[display("inspection is not active: {_0}")]
    NotActive(#[error(not(source))] String),
    /// Rejected without any side effect: an upload of this inspection is
    /// already running.
    #[display("inspection is already uploading: {_0}")]
    AlreadyUploading(#[error(not(source))] String),
    /// The configured root folder and the folder name do not form a valid
    /// remote path.
    #[display("invalid remote folder: {_0}")]
    InvalidFolder(#[error(not(source))] String),
    /// A remote operation outside the per-item loop failed.
    #[display("remote operation failed: {context}")]
    Remote { category: Category, context: &'static str },
    /// Every item failed; nothing was published.
    #[display("all {} items failed to upload", _0.len())]
    AllItemsFailed(#[error(not(source))] Vec<ItemFailure>),
    /// Items were uploaded and the inspection completed, but the folder has
    /// no public link.
    #[display("uploaded, but the folder could not be published")]
    PublishFailed,
    /// Local state could not be updated.
    #[display("local state error")]
    State,
    /// The upload stream ended without a terminal event.
    #[display("upload ended unexpectedly")]
    Interrupted,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { category, .. } => category.allows_retry(),
            Self::AllItemsFailed(failures) => failures.iter().any(|f| f.category.allows_retry()),
            Self::PublishFailed | Self::Interrupted => true,
            _ => false,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::NotConnected | Self::CredentialsExpired => Category::Auth,
            Self::UnknownInspection(_) | Self::Interrupted => Category::Unknown,
            Self::NothingToUpload(_)
            | Self::NotActive(_)
            | Self::AlreadyUploading(_)
            | Self::InvalidFolder(_)
            | Self::AllItemsFailed(_)
            | Self::PublishFailed => Category::Upload,
            Self::Remote { category, .. } => *category,
            Self::State => Category::Storage,
        }
    }

    /// What to tell the user.
    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }
}
