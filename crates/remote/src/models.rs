//! Remote storage models.

use crate::error::{ErrorKind, Result};
use std::path::PathBuf;

/// A one-time upload target handed out by the provider for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHandle {
    /// Where the bytes go. Usually a signed URL on a different host.
    pub href: String,
    /// HTTP method the provider expects for the transfer (`PUT` by default).
    pub method: String,
}
impl UploadHandle {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into(), method: "PUT".to_string() }
    }
}

/// Kind of resource found at a remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Directory,
    File,
}

/// Read-only view of a remote path, used for diagnostics and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub exists: bool,
    pub kind: Option<ResourceKind>,
    pub public_url: Option<String>,
}
impl RemoteMetadata {
    pub fn missing() -> Self {
        Self { exists: false, kind: None, public_url: None }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == Some(ResourceKind::Directory)
    }
}

/// Resolve a local content reference to a filesystem path.
///
/// Capture collaborators hand out either plain paths or `file://` URIs; other
/// schemes cannot be read by this crate.
///
/// ```
/// use carcheck_remote::resolve_source;
/// use std::path::Path;
///
/// assert_eq!(resolve_source("file:///data/photo.jpg").unwrap(), Path::new("/data/photo.jpg"));
/// assert_eq!(resolve_source("/data/photo.jpg").unwrap(), Path::new("/data/photo.jpg"));
/// assert!(resolve_source("content://media/1").is_err());
/// ```
pub fn resolve_source(uri: &str) -> Result<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        // `file://localhost/...` is equivalent to `file:///...`.
        let path = path.strip_prefix("localhost").unwrap_or(path);
        if path.starts_with('/') {
            return Ok(PathBuf::from(path));
        }
        exn::bail!(ErrorKind::LocalSource(uri.to_string()));
    }
    if uri.is_empty() || uri.contains("://") {
        exn::bail!(ErrorKind::LocalSource(uri.to_string()));
    }
    Ok(PathBuf::from(uri))
}
