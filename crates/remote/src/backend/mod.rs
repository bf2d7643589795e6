//! Remote storage trait and implementations.
//!
//! [`RemoteStorage`] is the narrow client-side contract the upload pipeline
//! relies on. [`DiskClient`] speaks the provider's REST protocol;
//! [`MockRemote`] (feature `mock`) keeps an in-memory directory tree with the
//! same semantics for tests.

mod disk;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::disk::{DEFAULT_API_BASE, DiskClient, DiskConnector};
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{Failure, MockCall, MockRemote, Operation};
use crate::error::Result;
use crate::models::{RemoteMetadata, UploadHandle};
use crate::path::RemotePath;
use crate::RemoteHandle;
use async_trait::async_trait;

/// Unified interface for the remote object store.
///
/// Every operation is a suspension point and may fail with an
/// [`ErrorKind`](crate::error::ErrorKind). Implementations never retry
/// internally.
///
/// # Examples
///
/// ```no_run
/// use carcheck_remote::{RemotePath, RemoteStorage, error::Result};
///
/// async fn upload_one(remote: &dyn RemoteStorage, source: &str) -> Result<String> {
///     let folder = RemotePath::parse("/Inspections/2024-03-05_14-07_Toyota_Camry")?;
///     remote.ensure_path(&folder).await?;
///     remote.upload_file(&folder.join("photo_001.jpg")?, source).await?;
///     remote.publish(&folder).await
/// }
/// ```
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Name of the provider (used for logging only).
    fn name(&self) -> &str;

    /// Create a single directory.
    ///
    /// Idempotent: a directory that already exists is a success, not a
    /// [`Conflict`](crate::error::ErrorKind::Conflict). The parent must exist.
    async fn create_directory(&self, path: &RemotePath) -> Result<()>;

    /// Create `path` and all of its ancestors, root-first and sequentially.
    ///
    /// A parent must exist before creation of its child is attempted, so the
    /// segments are never created concurrently.
    async fn ensure_path(&self, path: &RemotePath) -> Result<()> {
        for prefix in path.prefixes() {
            self.create_directory(&prefix).await?;
        }
        Ok(())
    }

    /// Ask the provider for a one-time upload target for `path`.
    ///
    /// Fails with [`NotFound`](crate::error::ErrorKind::NotFound) if the
    /// parent directory does not exist.
    async fn request_upload_handle(&self, path: &RemotePath) -> Result<UploadHandle>;

    /// Send the local resource identified by `source` (a path or `file://`
    /// URI) to `handle` in its entirety. Returns the number of bytes sent.
    ///
    /// All-or-nothing from the caller's perspective: either the whole file
    /// was accepted or an error is returned.
    async fn transfer_bytes(&self, handle: &UploadHandle, source: &str) -> Result<u64>;

    /// Convenience for [`request_upload_handle`](Self::request_upload_handle)
    /// followed by [`transfer_bytes`](Self::transfer_bytes).
    async fn upload_file(&self, path: &RemotePath, source: &str) -> Result<u64> {
        let handle = self.request_upload_handle(path).await?;
        self.transfer_bytes(&handle, source).await
    }

    /// Mark `path` publicly accessible and return its shareable URL.
    ///
    /// Publishing the same path twice returns the same URL.
    async fn publish(&self, path: &RemotePath) -> Result<String>;

    /// Read-only lookup. A missing path is reported through
    /// [`RemoteMetadata::exists`], not as an error.
    async fn resolve_metadata(&self, path: &RemotePath) -> Result<RemoteMetadata>;
}

/// Produces [`RemoteStorage`] clients authorised for a single account.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, access_token: &str) -> RemoteHandle;
}
