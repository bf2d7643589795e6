//! Inspection data model.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Duration, UtcDateTime};

/// Lifecycle status of an [`Inspection`].
///
/// `Active → Uploading → Completed`, or back to `Active` when an upload fails
/// or is cancelled.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[display("active")]
    Active,
    #[display("uploading")]
    Uploading,
    #[display("completed")]
    Completed,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    #[display("photo")]
    Photo,
    #[display("video")]
    Video,
}

/// A single captured photo or video. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    /// Local content reference: a filesystem path or `file://` URI.
    pub uri: String,
    pub captured_at: UtcDateTime,
    /// Only present for videos.
    pub duration_ms: Option<u64>,
}

/// What the capture collaborator hands over; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCapture {
    pub uri: String,
    pub captured_at: UtcDateTime,
    pub duration_ms: Option<u64>,
}
impl MediaCapture {
    pub fn photo(uri: impl Into<String>, captured_at: UtcDateTime) -> Self {
        Self { uri: uri.into(), captured_at, duration_ms: None }
    }

    pub fn video(uri: impl Into<String>, captured_at: UtcDateTime, duration_ms: u64) -> Self {
        Self { uri: uri.into(), captured_at, duration_ms: Some(duration_ms) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub id: String,
    /// Free-text vehicle description, e.g. `Toyota Camry`.
    pub label: String,
    pub start_time: UtcDateTime,
    pub end_time: Option<UtcDateTime>,
    pub status: Status,
    /// In capture order.
    pub photos: Vec<MediaItem>,
    /// In capture order.
    pub videos: Vec<MediaItem>,
    /// Public link to the uploaded folder. Set on completion, unless
    /// publishing failed.
    pub remote_folder_url: Option<String>,
}
impl Inspection {
    pub(crate) fn new(id: String, label: String, start_time: UtcDateTime) -> Self {
        Self {
            id,
            label,
            start_time,
            end_time: None,
            status: Status::Active,
            photos: Vec::new(),
            videos: Vec::new(),
            remote_folder_url: None,
        }
    }

    /// Number of photos and videos.
    pub fn media_count(&self) -> usize {
        self.photos.len() + self.videos.len()
    }

    pub fn has_media(&self) -> bool {
        self.media_count() > 0
    }

    pub fn media(&self, kind: MediaKind) -> &[MediaItem] {
        match kind {
            MediaKind::Photo => &self.photos,
            MediaKind::Video => &self.videos,
        }
    }
}

/// Default validity when the authorisation flow does not report one.
pub const DEFAULT_VALIDITY: Duration = Duration::seconds(31_536_000);

/// Access token for the remote account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_token: String,
    expires_at: UtcDateTime,
}
impl Credentials {
    pub fn new(access_token: impl Into<String>, expires_at: UtcDateTime) -> Self {
        Self { access_token: access_token.into(), expires_at }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> UtcDateTime {
        self.expires_at
    }

    /// Credentials expire at `expires_at` itself, not after it.
    pub fn is_expired_at(&self, now: UtcDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(UtcDateTime::now())
    }
}
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("access_token", &"<redacted>").field("expires_at", &self.expires_at).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_expiry_boundary() {
        let now = UtcDateTime::now();
        let credentials = Credentials::new("t", now);
        assert!(credentials.is_expired_at(now));
        assert!(!credentials.is_expired_at(now - Duration::milliseconds(1)));
        assert!(!format!("{credentials:?}").contains("\"t\""));
    }

    #[test]
    fn test_media_count() {
        let now = UtcDateTime::now();
        let mut inspection = Inspection::new("1".to_string(), "Lada Niva".to_string(), now);
        assert!(!inspection.has_media());
        inspection.videos.push(MediaItem { id: "v".to_string(), uri: "/v.mp4".to_string(), captured_at: now, duration_ms: Some(5) });
        assert_eq!(inspection.media_count(), 1);
        assert_eq!(inspection.media(MediaKind::Video).len(), 1);
        assert!(inspection.media(MediaKind::Photo).is_empty());
    }
}
