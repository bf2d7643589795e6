//! Error classification for user messaging and retry decisions.
//!
//! Errors raised by this workspace carry their [`Category`] from the point of
//! failure (see [`ErrorKind::category`](crate::error::ErrorKind::category)).
//! [`classify`] exists for foreign errors that reach the application boundary
//! without one.

use carcheck_remote::error::ErrorKind as RemoteErrorKind;
use carcheck_state::error::ErrorKind as StateErrorKind;
use derive_more::Display;
use std::error::Error as StdError;
use std::io::ErrorKind as IoErrorKind;

/// The closed failure taxonomy.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// The remote store could not be reached.
    #[display("network")]
    Network,
    /// The account must be (re)connected.
    #[display("auth")]
    Auth,
    /// The remote store refused or failed the transfer.
    #[display("upload")]
    Upload,
    /// Local persistence failed.
    #[display("storage")]
    Storage,
    /// Captured media could not be read.
    #[display("capture")]
    Capture,
    #[display("unknown")]
    Unknown,
}

impl Category {
    /// Critical failures need user action; retrying alone will not help.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Auth | Self::Storage)
    }

    /// Whether to offer a retry action alongside the message.
    pub fn allows_retry(&self) -> bool {
        !self.is_critical()
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Network => "No connection",
            Self::Auth => "Authorization required",
            Self::Upload => "Upload failed",
            Self::Storage => "Storage error",
            Self::Capture => "Camera error",
            Self::Unknown => "Error",
        }
    }

    /// Human-readable message, independent of the technical cause.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection and try again.",
            Self::Auth => "Please sign in to your cloud storage account again.",
            Self::Upload => "The files could not be uploaded. Check that your cloud storage is available.",
            Self::Storage => "There is not enough space to save the files.",
            Self::Capture => "The camera or the captured media could not be accessed. Check the permissions.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl From<&RemoteErrorKind> for Category {
    fn from(kind: &RemoteErrorKind) -> Self {
        match kind {
            RemoteErrorKind::Network => Self::Network,
            RemoteErrorKind::Unauthorized => Self::Auth,
            RemoteErrorKind::LocalSource(_) => Self::Capture,
            RemoteErrorKind::NotFound(_)
            | RemoteErrorKind::Conflict(_)
            | RemoteErrorKind::InsufficientStorage
            | RemoteErrorKind::TooManyRequests
            | RemoteErrorKind::Rejected(_)
            | RemoteErrorKind::Server(_)
            | RemoteErrorKind::InvalidResponse(_)
            | RemoteErrorKind::InvalidPath(_) => Self::Upload,
        }
    }
}

impl From<&StateErrorKind> for Category {
    fn from(kind: &StateErrorKind) -> Self {
        match kind {
            StateErrorKind::Persistence(_) | StateErrorKind::InvalidData(_) => Self::Storage,
            StateErrorKind::InvalidCredentials => Self::Auth,
            StateErrorKind::NotFound(_) | StateErrorKind::NotActive(_) | StateErrorKind::InvalidLabel => Self::Unknown,
        }
    }
}

impl From<&crate::error::ErrorKind> for Category {
    fn from(kind: &crate::error::ErrorKind) -> Self {
        kind.category()
    }
}

fn typed(err: &(dyn StdError + 'static)) -> Option<Category> {
    if let Some(kind) = err.downcast_ref::<crate::error::ErrorKind>() {
        return Some(kind.category());
    }
    if let Some(kind) = err.downcast_ref::<RemoteErrorKind>() {
        return Some(kind.into());
    }
    if let Some(kind) = err.downcast_ref::<StateErrorKind>() {
        return Some(kind.into());
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return Some(match e.status().map(|s| s.as_u16()) {
            Some(401 | 403) => Category::Auth,
            Some(_) => Category::Upload,
            None if e.is_connect() || e.is_timeout() || e.is_request() => Category::Network,
            None => Category::Unknown,
        });
    }
    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        return Some(match e.kind() {
            IoErrorKind::NotFound | IoErrorKind::PermissionDenied => Category::Capture,
            IoErrorKind::ConnectionRefused
            | IoErrorKind::ConnectionReset
            | IoErrorKind::ConnectionAborted
            | IoErrorKind::NotConnected
            | IoErrorKind::TimedOut => Category::Network,
            _ => Category::Storage,
        });
    }
    None
}

const AUTH_SIGNALS: &[&str] = &["401", "unauthorized", "token", "auth"];
const NETWORK_SIGNALS: &[&str] = &["network", "connection", "timed out", "timeout", "dns"];
const UPLOAD_SIGNALS: &[&str] = &["upload", "загрузк"];
const CAPTURE_SIGNALS: &[&str] = &["camera", "фото", "видео"];

fn heuristic(message: &str) -> Option<Category> {
    let message = message.to_lowercase();
    let has = |signals: &[&str]| signals.iter().any(|s| message.contains(s));
    if has(AUTH_SIGNALS) {
        Some(Category::Auth)
    } else if has(NETWORK_SIGNALS) {
        Some(Category::Network)
    } else if has(UPLOAD_SIGNALS) {
        Some(Category::Upload)
    } else if has(CAPTURE_SIGNALS) {
        Some(Category::Capture)
    } else {
        None
    }
}

/// Classify an error of unknown origin.
///
/// Typed errors anywhere in the source chain win, outermost first. Only when
/// none is recognised is the message text inspected, as a last resort.
///
/// ```
/// use carcheck_upload::classify::{Category, classify};
///
/// let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
/// assert_eq!(classify(&err), Category::Network);
///
/// let err = std::fmt::Error;
/// assert_eq!(classify(&err), Category::Unknown);
/// ```
pub fn classify(err: &(dyn StdError + 'static)) -> Category {
    let chain = || std::iter::successors(Some(err), |&e| e.source());
    chain()
        .find_map(typed)
        .or_else(|| chain().find_map(|e| heuristic(&e.to_string())))
        .unwrap_or(Category::Unknown)
}
