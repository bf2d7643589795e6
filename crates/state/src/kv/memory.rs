//! In-memory key-value store for testing.

use super::KeyValueStore;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    values: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

/// In-memory key-value store. Clones share the same contents.
///
/// Writes can be switched to fail, to exercise the "persistence failure is
/// logged, not fatal" paths.
///
/// ```
/// use carcheck_state::kv::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::with_entries([("inspections", "[]")]);
/// store.set_failing(true);
/// assert!(store.set("inspections", "[1]").await.is_err());
/// assert_eq!(store.value("inspections").as_deref(), Some("[]"));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let store = Self::default();
        store.values().extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        store
    }

    /// Make every subsequent `set`/`remove` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Current value of `key`, read synchronously.
    pub fn value(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    /// Number of successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.inner.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.inner.failing.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Persistence(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check(key)?;
        self.values().insert(key.to_string(), value.to_string());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check(key)?;
        self.values().remove(key);
        Ok(())
    }
}
