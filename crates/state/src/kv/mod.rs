//! Local key-value persistence.

mod file;
#[cfg(any(test, feature = "mock"))]
mod memory;

pub use self::file::FileStore;
#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryStore;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Key under which the inspection list is stored.
pub const INSPECTIONS_KEY: &str = "inspections";
/// Key under which the account credentials are stored.
pub const CREDENTIALS_KEY: &str = "yandex_auth";

pub type KvHandle = Arc<dyn KeyValueStore>;

/// Durable string storage keyed by name.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns `None` for keys that were never set (or were removed).
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}
