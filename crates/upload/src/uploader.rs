//! Upload orchestration.
//!
//! An upload of one inspection runs these steps, each depending on the
//! previous one succeeding:
//!
//! 1. Enter the [`UploadingSet`](carcheck_state::UploadingSet) and mark the
//!    inspection `Uploading`.
//! 2. Create the root folder and the inspection's folder, root-first.
//! 3. Transfer photos, then videos, one at a time in capture order. A failed
//!    item is recorded and the loop moves on.
//! 4. If nothing was transferred, revert to `Active` and fail. Otherwise
//!    publish the folder and mark the inspection `Completed`.
//!
//! Whatever the exit path (success, failure, cancellation or the consumer
//! dropping the stream) the inspection leaves the uploading set and is never
//! left `Uploading`.

use crate::classify::Category;
use crate::error::{ErrorKind, ItemFailure, Result};
use crate::naming::{file_name, folder_name};
use async_stream::stream;
use carcheck_remote::error::{Error as RemoteError, Result as RemoteResult};
use carcheck_remote::{RemoteConnector, RemoteHandle, RemoteMetadata, RemotePath};
use carcheck_state::{Credentials, Inspection, InspectionStore, MediaItem, MediaKind, Progress, Status, UploadTicket};
use exn::{OptionExt, ResultExt};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use time::{OffsetDateTime, UtcOffset};
use tracing::instrument;

pub const DEFAULT_ROOT_FOLDER: &str = "/Inspections";

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Remote folder that holds one sub-folder per inspection.
    pub root_folder: String,
    /// Whole-item attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub retry_delay: Duration,
    /// Offset used to format the start time in folder names.
    pub utc_offset: UtcOffset,
}
impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            root_folder: DEFAULT_ROOT_FOLDER.to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            utc_offset: UtcOffset::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Uploaded { bytes: u64, attempts: u32 },
    Failed(ItemFailure),
}
impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Uploaded { .. })
    }
}

/// Summary of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub inspection: String,
    pub folder: RemotePath,
    /// Remote file names, in upload order.
    pub uploaded: Vec<String>,
    pub failed: Vec<ItemFailure>,
    pub bytes: u64,
    pub public_url: Option<String>,
}
impl UploadReport {
    fn new(inspection: String, folder: RemotePath) -> Self {
        Self { inspection, folder, uploaded: Vec::new(), failed: Vec::new(), bytes: 0, public_url: None }
    }

    fn record(&mut self, name: &str, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Uploaded { bytes, .. } => {
                self.uploaded.push(name.to_string());
                self.bytes += bytes;
            },
            ItemOutcome::Failed(failure) => self.failed.push(failure.clone()),
        }
    }
}

/// Events emitted by [`Uploader::upload`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once.
/// 2. [`FolderReady`](Self::FolderReady): once the remote folder exists.
/// 3. [`Item`](Self::Item): once per media item, photos first.
/// 4. [`Published`](Self::Published) then [`Complete`](Self::Complete).
///
/// [`Cancelled`](Self::Cancelled) replaces the remaining events when the
/// upload is cancelled. An error ends the stream early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Started { folder: RemotePath, total: usize },
    FolderReady(RemotePath),
    Item { name: String, kind: MediaKind, outcome: ItemOutcome, progress: Progress },
    Published(String),
    Complete(UploadReport),
    Cancelled { progress: Progress },
}

/// How [`Uploader::upload_with_progress`] ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed(UploadReport),
    Cancelled(Progress),
}

/// Owns an upload's uploading-set entry for as long as the upload runs.
struct UploadGuard {
    store: InspectionStore,
    ticket: UploadTicket,
}
impl UploadGuard {
    /// Leave the uploading set and revert a lingering `Uploading` status.
    /// Idempotent.
    fn release(&self) {
        let id = self.ticket.id();
        let owned = self.store.uploading().finish(&self.ticket);
        // A newer upload of the same inspection owns the status now.
        if owned || !self.store.uploading().contains(id) {
            self.store.revert_upload(id);
        }
    }
}
impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct Session {
    inspection: Inspection,
    folder: RemotePath,
    remote: RemoteHandle,
    guard: UploadGuard,
}

fn remote_context<T>(result: RemoteResult<T>, context: &'static str) -> Result<T> {
    result.or_else(|e| {
        let category = Category::from(&*e);
        Err(e).or_raise(|| ErrorKind::Remote { category, context })
    })
}

fn usable(credentials: Option<&Credentials>) -> Result<&Credentials> {
    let credentials = credentials.ok_or_raise(|| ErrorKind::NotConnected)?;
    if credentials.is_expired() {
        exn::bail!(ErrorKind::CredentialsExpired);
    }
    Ok(credentials)
}

/// Drives uploads of inspections to remote storage.
///
/// Uploads of different inspections may run concurrently; the items of one
/// inspection are always transferred sequentially.
#[derive(Clone)]
pub struct Uploader {
    store: InspectionStore,
    connector: Arc<dyn RemoteConnector>,
    settings: Arc<UploadSettings>,
}

impl Uploader {
    pub fn new(store: InspectionStore, connector: Arc<dyn RemoteConnector>, settings: UploadSettings) -> Self {
        Self { store, connector, settings: Arc::new(settings) }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Remote folder for `inspection`: the root folder plus the folder name
    /// derived from its label and start time.
    pub fn folder_for(&self, inspection: &Inspection) -> Result<RemotePath> {
        let start = OffsetDateTime::from(inspection.start_time);
        let at = start.checked_to_offset(self.settings.utc_offset).unwrap_or(start);
        let root = self.settings.root_folder.trim_end_matches('/');
        let path = format!("{root}/{}", folder_name(&inspection.label, at));
        RemotePath::parse(&path).or_raise(|| ErrorKind::InvalidFolder(path.clone()))
    }

    /// Checks preconditions, then atomically enters the uploading set.
    /// Nothing is mutated unless every precondition holds.
    fn begin(&self, id: &str, credentials: Option<&Credentials>) -> Result<Session> {
        let credentials = usable(credentials)?;
        let inspection = self.store.get(id).ok_or_raise(|| ErrorKind::UnknownInspection(id.to_string()))?;
        match inspection.status {
            Status::Active => {},
            Status::Uploading => exn::bail!(ErrorKind::AlreadyUploading(id.to_string())),
            Status::Completed => exn::bail!(ErrorKind::NotActive(id.to_string())),
        }
        if !inspection.has_media() {
            exn::bail!(ErrorKind::NothingToUpload(id.to_string()));
        }
        let folder = self.folder_for(&inspection)?;
        let ticket =
            self.store.uploading().try_begin(id).ok_or_raise(|| ErrorKind::AlreadyUploading(id.to_string()))?;
        let guard = UploadGuard { store: self.store.clone(), ticket };
        self.store.begin_upload(id).or_raise(|| ErrorKind::NotActive(id.to_string()))?;
        let remote = self.connector.connect(credentials.access_token());
        Ok(Session { inspection, folder, remote, guard })
    }

    /// Upload every media item of inspection `id`, streaming progress.
    ///
    /// Preconditions are checked immediately: valid credentials, a known
    /// `Active` inspection with at least one media item, and no upload of the
    /// same inspection already running. A violation yields a single error and
    /// touches neither local state nor the network.
    ///
    /// See [`UploadEvent`] for the event sequence. Dropping the stream early
    /// abandons the upload; the inspection reverts to `Active`.
    pub fn upload(&self, id: &str, credentials: Option<&Credentials>) -> BoxStream<'static, Result<UploadEvent>> {
        match self.begin(id, credentials) {
            Ok(session) => self.clone().run(session).boxed(),
            Err(e) => {
                tracing::warn!(inspection = id, error = ?e, "Upload rejected");
                futures::stream::once(async { Err(e) }).boxed()
            },
        }
    }

    fn run(self, session: Session) -> impl Stream<Item = Result<UploadEvent>> + Send + 'static {
        let Session { inspection, folder, remote, guard } = session;
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            let id = inspection.id.as_str();
            let ticket = &guard.ticket;
            let mut progress = Progress::new(inspection.media_count());
            ticket.report(progress);
            tracing::info!(inspection = id, folder = %folder, total = progress.total, "Upload started");
            yield Ok(UploadEvent::Started { folder: folder.clone(), total: progress.total });

            if let Err(e) = remote_context(remote.ensure_path(&folder).await, "create folder") {
                tracing::warn!(inspection = id, error = ?e, "Failed to create remote folder");
                guard.release();
                yield Err(e);
                return;
            }
            yield Ok(UploadEvent::FolderReady(folder.clone()));

            let mut report = UploadReport::new(id.to_string(), folder.clone());
            let items: Vec<(MediaKind, usize, &MediaItem)> = [MediaKind::Photo, MediaKind::Video]
                .into_iter()
                .flat_map(|kind| inspection.media(kind).iter().enumerate().map(move |(i, item)| (kind, i + 1, item)))
                .collect();
            for (kind, index, item) in items {
                if ticket.is_cancelled() {
                    break;
                }
                let name = file_name(kind, index);
                let outcome = self.transfer(&remote, &folder, &name, kind, item, ticket).await;
                progress = progress.advance();
                ticket.report(progress);
                report.record(&name, &outcome);
                tracing::debug!(inspection = id, item = %name, completed = progress.completed, total = progress.total);
                yield Ok(UploadEvent::Item { name, kind, outcome, progress });
            }

            if ticket.is_cancelled() {
                tracing::info!(inspection = id, %progress, "Upload cancelled");
                guard.release();
                yield Ok(UploadEvent::Cancelled { progress });
                return;
            }
            if report.uploaded.is_empty() {
                tracing::warn!(inspection = id, failed = report.failed.len(), "Every item failed, not publishing");
                guard.release();
                yield Err(exn::Exn::from(ErrorKind::AllItemsFailed(report.failed)));
                return;
            }

            let published = remote.publish(&folder).await;
            // Cancellation during publish wins; the folder stays as it is.
            if ticket.is_cancelled() {
                tracing::info!(inspection = id, %progress, "Upload cancelled while publishing");
                guard.release();
                yield Ok(UploadEvent::Cancelled { progress });
                return;
            }
            match published {
                Ok(url) => {
                    let completed = self.store.complete(id, Some(url.clone()));
                    guard.release();
                    if let Err(e) = completed {
                        yield Err(e).or_raise(|| ErrorKind::State);
                        return;
                    }
                    report.public_url = Some(url.clone());
                    tracing::info!(
                        inspection = id,
                        uploaded = report.uploaded.len(),
                        failed = report.failed.len(),
                        url = %url,
                        "Upload complete"
                    );
                    yield Ok(UploadEvent::Published(url));
                    yield Ok(UploadEvent::Complete(report));
                },
                Err(e) => {
                    // Uploaded but unpublished still counts as completed.
                    tracing::warn!(inspection = id, error = ?e, "Failed to publish folder");
                    let completed = self.store.complete(id, None);
                    guard.release();
                    if let Err(state) = completed {
                        yield Err(state).or_raise(|| ErrorKind::State);
                        return;
                    }
                    yield Err(e).or_raise(|| ErrorKind::PublishFailed);
                },
            }
        })
    }

    /// Transfer one item, retrying retryable failures up to the configured
    /// number of attempts.
    async fn transfer(
        &self,
        remote: &RemoteHandle,
        folder: &RemotePath,
        name: &str,
        kind: MediaKind,
        item: &MediaItem,
        ticket: &UploadTicket,
    ) -> ItemOutcome {
        let failed = |e: &RemoteError, attempts: u32| {
            tracing::warn!(item = name, attempts, error = ?e, "Item failed");
            ItemOutcome::Failed(ItemFailure {
                name: name.to_string(),
                kind,
                category: Category::from(&**e),
                reason: (**e).to_string(),
                attempts,
            })
        };
        let path = match folder.join(name) {
            Ok(path) => path,
            Err(e) => return failed(&e, 0),
        };
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let e = match remote.upload_file(&path, &item.uri).await {
                Ok(bytes) => return ItemOutcome::Uploaded { bytes, attempts: attempt },
                Err(e) => e,
            };
            if !e.is_retryable() || attempt >= max_attempts || ticket.is_cancelled() {
                return failed(&e, attempt);
            }
            let delay = self.settings.retry_delay.saturating_mul(2_u32.saturating_pow(attempt - 1));
            tracing::debug!(item = name, attempt, ?delay, error = ?e, "Retrying item");
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                () = ticket.token().cancelled() => return failed(&e, attempt),
            }
            attempt += 1;
        }
    }

    /// Drive [`upload`](Self::upload) to the end, reporting every progress
    /// value (starting at `0/total`) to `on_progress`.
    pub async fn upload_with_progress(
        &self,
        id: &str,
        credentials: Option<&Credentials>,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<UploadOutcome> {
        let mut events = self.upload(id, credentials);
        while let Some(event) = events.next().await {
            match event? {
                UploadEvent::Started { total, .. } => on_progress(Progress::new(total)),
                UploadEvent::Item { progress, .. } => on_progress(progress),
                UploadEvent::Complete(report) => return Ok(UploadOutcome::Completed(report)),
                UploadEvent::Cancelled { progress } => return Ok(UploadOutcome::Cancelled(progress)),
                UploadEvent::FolderReady(_) | UploadEvent::Published(_) => {},
            }
        }
        exn::bail!(ErrorKind::Interrupted)
    }

    /// Cancel the running upload of `id`.
    ///
    /// The inspection leaves the uploading set and reverts to `Active` at
    /// once. An item transfer already in flight is allowed to finish; no
    /// further items are started and the folder is not published. Returns
    /// `false` if no upload of `id` was running.
    pub fn cancel(&self, id: &str) -> bool {
        let cancelled = self.store.uploading().cancel(id);
        if cancelled {
            self.store.revert_upload(id);
            tracing::info!(inspection = id, "Cancellation requested");
        }
        cancelled
    }

    /// Look up the inspection's remote folder. Diagnostics only.
    #[instrument(skip(self, credentials))]
    pub async fn verify(&self, id: &str, credentials: Option<&Credentials>) -> Result<RemoteMetadata> {
        let credentials = usable(credentials)?;
        let inspection = self.store.get(id).ok_or_raise(|| ErrorKind::UnknownInspection(id.to_string()))?;
        let folder = self.folder_for(&inspection)?;
        let remote = self.connector.connect(credentials.access_token());
        remote_context(remote.resolve_metadata(&folder).await, "resolve metadata")
    }
}
