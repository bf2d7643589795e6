//! In-memory remote storage for testing.

use crate::backend::{RemoteConnector, RemoteStorage};
use crate::error::{ErrorKind, Result};
use crate::models::{RemoteMetadata, ResourceKind, UploadHandle, resolve_source};
use crate::path::RemotePath;
use crate::RemoteHandle;
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Remote operation, as recorded in the [`MockRemote`] call journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateDirectory,
    RequestUploadHandle,
    TransferBytes,
    Publish,
    ResolveMetadata,
}

/// One journal entry. For transfers, `path` is the destination the handle
/// was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: Operation,
    pub path: String,
}

/// An injected failure.
///
/// ```
/// use carcheck_remote::backend::{Failure, Operation};
/// use carcheck_remote::error::ErrorKind;
///
/// // The first two transfers of photo_002.jpg fail with a 503.
/// let failure = Failure::on(Operation::TransferBytes).at("photo_002.jpg").times(2).with(ErrorKind::Server(503));
/// ```
#[derive(Debug, Clone)]
pub struct Failure {
    operation: Operation,
    suffix: Option<String>,
    remaining: Option<usize>,
    kind: ErrorKind,
}
impl Failure {
    /// Fail every call of `operation` with [`ErrorKind::Network`].
    pub fn on(operation: Operation) -> Self {
        Self { operation, suffix: None, remaining: None, kind: ErrorKind::Network }
    }

    /// Only fail calls whose path ends with `suffix`.
    pub fn at(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Only fail the next `n` matching calls.
    pub fn times(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    pub fn with(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    fn matches(&self, operation: Operation, path: &str) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && self.suffix.as_deref().is_none_or(|suffix| path.ends_with(suffix))
    }
}

#[derive(Debug)]
enum Node {
    Directory,
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<RemotePath, Node>,
    public_urls: HashMap<RemotePath, String>,
    handles: HashMap<String, RemotePath>,
    calls: Vec<MockCall>,
    failures: Vec<Failure>,
    expected_token: Option<String>,
    issued: u64,
}
impl State {
    fn is_directory(&self, path: &RemotePath) -> bool {
        matches!(self.nodes.get(path), Some(Node::Directory))
    }

    fn parent_exists(&self, path: &RemotePath) -> bool {
        path.parent().is_none_or(|parent| self.is_directory(&parent))
    }

    fn injected(&mut self, operation: Operation, path: &str) -> Option<ErrorKind> {
        let failure = self.failures.iter_mut().find(|f| f.matches(operation, path))?;
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(failure.kind.clone())
    }
}

/// In-memory remote storage with the same semantics as the real provider.
///
/// Clones (and clients produced through [`RemoteConnector::connect`]) share
/// one directory tree and one call journal, so a test can hand a connector
/// to the code under test and inspect the outcome afterwards.
///
/// # Examples
///
/// ```
/// use carcheck_remote::{MockRemote, RemotePath, RemoteStorage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = MockRemote::with_directories(["/Inspections"]);
/// let folder = RemotePath::parse("/Inspections/2024-03-05_14-07_Toyota_Camry")?;
/// remote.ensure_path(&folder).await?;
/// assert!(remote.directories().contains(&folder.to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<State>>,
    token: Option<String>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock remote with pre-existing directories (and their
    /// ancestors).
    ///
    /// Panics on invalid paths; test setup should not silently differ from
    /// what the test intends.
    pub fn with_directories(paths: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.lock();
            for path in paths {
                let Ok(path) = RemotePath::parse(path.as_ref()) else {
                    panic!("MockRemote::with_directories: invalid path {}", path.as_ref());
                };
                for prefix in path.prefixes() {
                    state.nodes.insert(prefix, Node::Directory);
                }
            }
        }
        remote
    }

    /// Reject calls from clients connected with any other token.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.lock().expected_token = Some(token.into());
        self
    }

    /// Register an injected failure. Earlier registrations take precedence.
    pub fn fail(&self, failure: Failure) {
        self.lock().failures.push(failure);
    }

    /// Every directory, in path order.
    pub fn directories(&self) -> Vec<String> {
        let state = self.lock();
        state.nodes.iter().filter(|(_, node)| matches!(node, Node::Directory)).map(|(p, _)| p.to_string()).collect()
    }

    /// Contents of the file at `path`, if one exists.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let path = RemotePath::parse(path).ok()?;
        match self.lock().nodes.get(&path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Names of the files directly inside `dir`, sorted.
    pub fn files_in(&self, dir: &str) -> Vec<String> {
        let Ok(dir) = RemotePath::parse(dir) else {
            return Vec::new();
        };
        let state = self.lock();
        state
            .nodes
            .iter()
            .filter(|(path, node)| matches!(node, Node::File(_)) && path.parent().as_ref() == Some(&dir))
            .map(|(path, _)| path.file_name().to_string())
            .collect()
    }

    pub fn public_url(&self, path: &str) -> Option<String> {
        let path = RemotePath::parse(path).ok()?;
        self.lock().public_urls.get(&path).cloned()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock().calls.iter().filter(|call| call.operation == operation).count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, then apply the token check and injected failures.
    fn enter(&self, operation: Operation, path: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(MockCall { operation, path: path.to_string() });
        if let Some(expected) = &state.expected_token
            && self.token.as_deref() != Some(expected.as_str())
        {
            exn::bail!(ErrorKind::Unauthorized);
        }
        if let Some(kind) = state.injected(operation, path) {
            exn::bail!(kind);
        }
        Ok(state)
    }
}

impl RemoteConnector for MockRemote {
    fn connect(&self, access_token: &str) -> RemoteHandle {
        Arc::new(Self { state: Arc::clone(&self.state), token: Some(access_token.to_string()) })
    }
}

#[async_trait]
impl RemoteStorage for MockRemote {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_directory(&self, path: &RemotePath) -> Result<()> {
        let mut state = self.enter(Operation::CreateDirectory, path.as_str())?;
        match state.nodes.get(path) {
            Some(Node::Directory) => return Ok(()),
            Some(Node::File(_)) => exn::bail!(ErrorKind::Conflict(path.to_string())),
            None => {},
        }
        if !state.parent_exists(path) {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        state.nodes.insert(path.clone(), Node::Directory);
        Ok(())
    }

    async fn request_upload_handle(&self, path: &RemotePath) -> Result<UploadHandle> {
        let mut state = self.enter(Operation::RequestUploadHandle, path.as_str())?;
        if !state.parent_exists(path) || state.is_directory(path) {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        state.issued += 1;
        let href = format!("mock://upload/{}", state.issued);
        state.handles.insert(href.clone(), path.clone());
        Ok(UploadHandle::new(href))
    }

    async fn transfer_bytes(&self, handle: &UploadHandle, source: &str) -> Result<u64> {
        let destination = self.lock().handles.get(&handle.href).cloned();
        let journal_path = destination.as_ref().map_or(handle.href.as_str(), RemotePath::as_str).to_string();
        drop(self.enter(Operation::TransferBytes, &journal_path)?);
        let Some(destination) = destination else {
            exn::bail!(ErrorKind::NotFound(handle.href.clone()));
        };
        let local = resolve_source(source)?;
        let data = tokio::fs::read(&local).await.or_raise(|| ErrorKind::LocalSource(source.to_string()))?;
        let size = data.len() as u64;
        let mut state = self.lock();
        // One-time: a handle is spent only by a transfer that succeeds.
        state.handles.remove(&handle.href);
        state.nodes.insert(destination, Node::File(data));
        Ok(size)
    }

    async fn publish(&self, path: &RemotePath) -> Result<String> {
        let mut state = self.enter(Operation::Publish, path.as_str())?;
        if !state.nodes.contains_key(path) {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        if let Some(url) = state.public_urls.get(path) {
            return Ok(url.clone());
        }
        state.issued += 1;
        let url = format!("https://disk.example/d/{:06}", state.issued);
        state.public_urls.insert(path.clone(), url.clone());
        Ok(url)
    }

    async fn resolve_metadata(&self, path: &RemotePath) -> Result<RemoteMetadata> {
        let state = self.enter(Operation::ResolveMetadata, path.as_str())?;
        let kind = match state.nodes.get(path) {
            None => return Ok(RemoteMetadata::missing()),
            Some(Node::Directory) => ResourceKind::Directory,
            Some(Node::File(_)) => ResourceKind::File,
        };
        Ok(RemoteMetadata { exists: true, kind: Some(kind), public_url: state.public_urls.get(path).cloned() })
    }
}
