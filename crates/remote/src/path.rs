//! Remote path validation.
//!
//! Remote paths are absolute, slash-delimited locations in the provider's
//! namespace (`/Inspections/2024-03-05_14-07_Toyota_Camry/photo_001.jpg`).
//! They are never interpreted by the local filesystem, so [`std::path::Path`]
//! is deliberately not used here.

use crate::error::{ErrorKind, Result};
use std::fmt;
use std::str::FromStr;

/// A validated, normalized, absolute remote path.
///
/// # Examples
///
/// ```
/// use carcheck_remote::RemotePath;
///
/// let folder: RemotePath = "/Inspections//2024-03-05_14-07_Toyota_Camry/".parse().unwrap();
/// assert_eq!(folder.as_str(), "/Inspections/2024-03-05_14-07_Toyota_Camry");
/// assert_eq!(folder.prefixes().len(), 2);
/// assert!("/Inspections/../etc".parse::<RemotePath>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// Validates and normalizes a remote path.
    ///
    /// Duplicate and trailing separators are collapsed; a missing leading
    /// separator is added. Empty paths, the bare root, `.`/`..` segments and
    /// NUL bytes are rejected with [`ErrorKind::InvalidPath`].
    pub fn parse(path: impl AsRef<str>) -> Result<Self> {
        let raw = path.as_ref();
        let mut normalized = String::with_capacity(raw.len() + 1);
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            Self::check_segment(raw, segment)?;
            normalized.push('/');
            normalized.push_str(segment);
        }
        if normalized.is_empty() {
            exn::bail!(ErrorKind::InvalidPath(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    fn check_segment(raw: &str, segment: &str) -> Result<()> {
        if segment == "." || segment == ".." || segment.contains('\0') {
            exn::bail!(ErrorKind::InvalidPath(raw.to_string()));
        }
        Ok(())
    }

    /// Append a single segment (a file or directory name).
    pub fn join(&self, segment: impl AsRef<str>) -> Result<Self> {
        let segment = segment.as_ref();
        if segment.is_empty() || segment.contains('/') {
            exn::bail!(ErrorKind::InvalidPath(format!("{}/{segment}", self.0)));
        }
        Self::check_segment(segment, segment)?;
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    /// The containing directory, or `None` for a top-level path.
    pub fn parent(&self) -> Option<Self> {
        match self.0.rfind('/') {
            Some(0) | None => None,
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// The final segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Every ancestor including the path itself, root-first.
    ///
    /// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
    pub fn prefixes(&self) -> Vec<Self> {
        self.0.match_indices('/').skip(1).map(|(idx, _)| Self(self.0[..idx].to_string())).chain([self.clone()]).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RemotePath {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
