use super::KeyValueStore;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Key-value store backed by one JSON file per key in a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
///
/// # Examples
///
/// ```no_run
/// use carcheck_state::kv::{FileStore, KeyValueStore};
///
/// # async fn example() -> carcheck_state::error::Result<()> {
/// let store = FileStore::open("/var/lib/carcheck").await?;
/// store.set("inspections", "[]").await?;
/// assert_eq!(store.get("inspections").await?.as_deref(), Some("[]"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .or_raise(|| ErrorKind::Persistence(root.display().to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            exn::bail!(ErrorKind::Persistence(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).or_raise(|| ErrorKind::Persistence(key.to_string())),
        }
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, value).await.or_raise(|| ErrorKind::Persistence(key.to_string()))?;
        tokio::fs::rename(&temp, &path).await.or_raise(|| ErrorKind::Persistence(key.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).or_raise(|| ErrorKind::Persistence(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("nested")).await.unwrap();
        assert_eq!(store.get("inspections").await.unwrap(), None);

        store.set("inspections", "[1]").await.unwrap();
        store.set("inspections", "[2]").await.unwrap();
        assert_eq!(store.get("inspections").await.unwrap().as_deref(), Some("[2]"));
        assert!(dir.path().join("nested/inspections.json").exists());
        assert!(!dir.path().join("nested/inspections.json.tmp").exists());

        store.remove("inspections").await.unwrap();
        store.remove("inspections").await.unwrap();
        assert_eq!(store.get("inspections").await.unwrap(), None);
    }

    #[rstest]
    #[case("")]
    #[case("../escape")]
    #[case("a/b")]
    #[case("a.b")]
    #[tokio::test]
    async fn test_invalid_keys(#[case] key: &str) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let err = store.set(key, "x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Persistence(_)));
    }
}
