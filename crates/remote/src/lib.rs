//! Client-side contract for the remote object store.
//!
//! The remote store is quota-limited, eventually consistent and reached over
//! an unreliable network. This crate keeps the contract narrow: idempotent
//! directory creation, upload by handoff URL, publish-for-public-link and a
//! read-only metadata lookup. It holds no local state and never retries;
//! retrying is the caller's decision, at whole-file granularity.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::{DiskClient, DiskConnector, RemoteConnector, RemoteStorage};
#[cfg(any(test, feature = "mock"))]
pub use crate::backend::{Failure, MockCall, MockRemote, Operation};
pub use crate::models::{RemoteMetadata, ResourceKind, UploadHandle, resolve_source};
pub use crate::path::RemotePath;
use std::sync::Arc;

pub type RemoteHandle = Arc<dyn RemoteStorage + Send + Sync>;
