//! Inspection records with write-through persistence.

use crate::error::{ErrorKind, Result};
use crate::kv::{INSPECTIONS_KEY, KvHandle};
use crate::models::{Inspection, MediaCapture, MediaItem, MediaKind, Status};
use crate::records::{decode_inspections, encode_inspections};
use crate::uploading::UploadingSet;
use exn::OptionExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::UtcDateTime;
use tokio::sync::watch;
use tracing::instrument;

type Snapshot = Arc<Vec<Inspection>>;

/// Serializes persistence so an older snapshot never overwrites a newer one.
#[derive(Clone)]
struct Persister {
    kv: KvHandle,
    lock: Arc<tokio::sync::Mutex<()>>,
}
impl Persister {
    async fn persist_latest(&self, rx: &mut watch::Receiver<Snapshot>) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let snapshot = rx.borrow_and_update().clone();
        let json = encode_inspections(&snapshot)?;
        self.kv.set(INSPECTIONS_KEY, &json).await?;
        Ok(snapshot.len())
    }

    /// Background writer: persists every new snapshot, skipping ones that
    /// were superseded before it got to them. Exits once every
    /// [`InspectionStore`] handle is gone and the last snapshot is written.
    async fn run(self, mut rx: watch::Receiver<Snapshot>) {
        while rx.changed().await.is_ok() {
            match self.persist_latest(&mut rx).await {
                Ok(count) => tracing::trace!(count, "Persisted inspections"),
                Err(e) => tracing::warn!(error = ?e, "Failed to persist inspections"),
            }
        }
    }
}

struct Inner {
    /// Newest first.
    inspections: Mutex<Vec<Inspection>>,
    uploading: UploadingSet,
    snapshots: watch::Sender<Snapshot>,
    persister: Persister,
}

/// In-memory list of inspections, persisted on every mutation.
///
/// Mutations update memory synchronously and hand the new list to a
/// background writer; the in-memory state is authoritative for the session
/// and persistence failures are logged, never returned from a mutation. Use
/// [`flush`](Self::flush) to persist immediately and observe the outcome.
///
/// Clones share the same state.
///
/// # Examples
///
/// ```
/// use carcheck_state::{InspectionStore, MediaCapture, Status};
/// use carcheck_state::kv::FileStore;
/// use std::sync::Arc;
/// use time::UtcDateTime;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> carcheck_state::error::Result<()> {
/// # let dir = tempfile::tempdir().unwrap();
/// let store = InspectionStore::load(Arc::new(FileStore::open(dir.path()).await?)).await?;
/// let inspection = store.create("Toyota Camry")?;
/// store.add_photo(&inspection.id, MediaCapture::photo("file:///p1.jpg", UtcDateTime::now()))?;
/// assert_eq!(store.get(&inspection.id).unwrap().photos.len(), 1);
/// assert_eq!(store.active().unwrap().status, Status::Active);
/// store.flush().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InspectionStore {
    inner: Arc<Inner>,
}

impl InspectionStore {
    /// Load the persisted inspections and start the background writer.
    ///
    /// Inspections persisted while `Uploading` are reset to `Active`: the
    /// uploading set always starts empty, so no upload can have survived a
    /// restart.
    #[instrument(skip(kv))]
    pub async fn load(kv: KvHandle) -> Result<Self> {
        let mut inspections = match kv.get(INSPECTIONS_KEY).await? {
            Some(json) => decode_inspections(&json)?,
            None => Vec::new(),
        };
        let mut recovered = 0;
        for inspection in inspections.iter_mut().filter(|i| i.status == Status::Uploading) {
            inspection.status = Status::Active;
            recovered += 1;
        }
        tracing::info!(count = inspections.len(), recovered, "Loaded inspections");

        let (snapshots, rx) = watch::channel(Arc::new(inspections.clone()));
        let persister = Persister { kv, lock: Arc::default() };
        tokio::spawn(persister.clone().run(rx));
        let store = Self {
            inner: Arc::new(Inner {
                inspections: Mutex::new(inspections),
                uploading: UploadingSet::default(),
                snapshots,
                persister,
            }),
        };
        if recovered > 0 {
            store.publish(&store.lock());
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Inspection>> {
        self.inner.inspections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inspections: &[Inspection]) {
        self.inner.snapshots.send_replace(Arc::new(inspections.to_vec()));
    }

    /// Apply `f` to the whole list; a successful mutation is persisted.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<Inspection>) -> Result<T>) -> Result<T> {
        let mut inspections = self.lock();
        let value = f(&mut inspections)?;
        self.publish(&inspections);
        Ok(value)
    }

    fn update<T>(&self, id: &str, f: impl FnOnce(&mut Inspection) -> Result<T>) -> Result<T> {
        self.mutate(|inspections| {
            let inspection =
                inspections.iter_mut().find(|i| i.id == id).ok_or_raise(|| ErrorKind::NotFound(id.to_string()))?;
            f(inspection)
        })
    }

    /// Ids of inspections with an upload in progress.
    pub fn uploading(&self) -> &UploadingSet {
        &self.inner.uploading
    }

    /// Start a new, empty, active inspection. It is listed first.
    ///
    /// The label may be empty; folder naming substitutes a placeholder.
    pub fn create(&self, label: impl AsRef<str>) -> Result<Inspection> {
        let label = label.as_ref().trim();
        let inspection = Inspection::new(uuid::Uuid::new_v4().to_string(), label.to_string(), UtcDateTime::now());
        self.mutate(|inspections| {
            inspections.insert(0, inspection.clone());
            Ok(())
        })?;
        tracing::info!(inspection = %inspection.id, label, "Created inspection");
        Ok(inspection)
    }

    pub fn get(&self, id: &str) -> Option<Inspection> {
        self.lock().iter().find(|i| i.id == id).cloned()
    }

    /// Every inspection, newest first.
    pub fn list(&self) -> Vec<Inspection> {
        self.lock().clone()
    }

    /// The most recently created inspection that is still `Active`.
    pub fn active(&self) -> Option<Inspection> {
        self.lock().iter().find(|i| i.status == Status::Active).cloned()
    }

    fn add_media(&self, id: &str, kind: MediaKind, capture: MediaCapture) -> Result<MediaItem> {
        let item = MediaItem {
            id: uuid::Uuid::new_v4().to_string(),
            uri: capture.uri,
            captured_at: capture.captured_at,
            duration_ms: match kind {
                MediaKind::Photo => None,
                MediaKind::Video => Some(capture.duration_ms.unwrap_or_default()),
            },
        };
        self.update(id, |inspection| {
            if inspection.status != Status::Active {
                exn::bail!(ErrorKind::NotActive(id.to_string()));
            }
            match kind {
                MediaKind::Photo => inspection.photos.push(item.clone()),
                MediaKind::Video => inspection.videos.push(item.clone()),
            }
            Ok(())
        })?;
        tracing::debug!(inspection = id, %kind, media = %item.id, "Added media");
        Ok(item)
    }

    /// Append a photo. Only allowed while the inspection is `Active`.
    pub fn add_photo(&self, id: &str, capture: MediaCapture) -> Result<MediaItem> {
        self.add_media(id, MediaKind::Photo, capture)
    }

    /// Append a video. Only allowed while the inspection is `Active`.
    pub fn add_video(&self, id: &str, capture: MediaCapture) -> Result<MediaItem> {
        self.add_media(id, MediaKind::Video, capture)
    }

    pub fn rename(&self, id: &str, label: impl AsRef<str>) -> Result<()> {
        let label = label.as_ref().trim();
        if label.is_empty() {
            exn::bail!(ErrorKind::InvalidLabel);
        }
        self.update(id, |inspection| {
            inspection.label = label.to_string();
            Ok(())
        })
    }

    pub fn set_status(&self, id: &str, status: Status) -> Result<()> {
        self.update(id, |inspection| {
            inspection.status = status;
            Ok(())
        })?;
        tracing::info!(inspection = id, %status, "Status changed");
        Ok(())
    }

    /// Move an `Active` inspection to `Uploading`. Any other status is left
    /// untouched and reported as [`ErrorKind::NotActive`].
    pub fn begin_upload(&self, id: &str) -> Result<()> {
        self.update(id, |inspection| {
            if inspection.status != Status::Active {
                exn::bail!(ErrorKind::NotActive(id.to_string()));
            }
            inspection.status = Status::Uploading;
            Ok(())
        })?;
        tracing::info!(inspection = id, status = %Status::Uploading, "Status changed");
        Ok(())
    }

    /// Move an `Uploading` inspection back to `Active`. Returns `false` (and
    /// changes nothing) for any other status or an unknown id.
    pub fn revert_upload(&self, id: &str) -> bool {
        let reverted = self
            .update(id, |inspection| match inspection.status {
                Status::Uploading => {
                    inspection.status = Status::Active;
                    Ok(true)
                },
                _ => Ok(false),
            })
            .unwrap_or(false);
        if reverted {
            tracing::info!(inspection = id, "Reverted to active");
        }
        reverted
    }

    /// Mark the inspection `Completed` now. `remote_folder_url` is `None`
    /// when the upload succeeded but publishing the folder did not.
    pub fn complete(&self, id: &str, remote_folder_url: Option<String>) -> Result<Inspection> {
        let inspection = self.update(id, |inspection| {
            inspection.status = Status::Completed;
            inspection.end_time = Some(UtcDateTime::now());
            inspection.remote_folder_url = remote_folder_url;
            Ok(inspection.clone())
        })?;
        tracing::info!(inspection = id, url = inspection.remote_folder_url.as_deref(), "Completed inspection");
        Ok(inspection)
    }

    /// Delete an inspection at any status, cancelling its upload if one is
    /// running.
    pub fn delete(&self, id: &str) -> bool {
        self.delete_many(&[id]) == 1
    }

    /// Delete every inspection in `ids`. Returns how many were removed.
    pub fn delete_many(&self, ids: &[impl AsRef<str>]) -> usize {
        let removed = self
            .mutate(|inspections| {
                let before = inspections.len();
                inspections.retain(|i| !ids.iter().any(|id| id.as_ref() == i.id));
                Ok(before - inspections.len())
            })
            .unwrap_or_default();
        for id in ids {
            self.inner.uploading.cancel(id.as_ref());
        }
        if removed > 0 {
            tracing::info!(count = removed, "Deleted inspections");
        }
        removed
    }

    /// Forget every running upload and reset `Uploading` inspections to
    /// `Active`. Returns how many inspections were reset.
    pub fn reset_uploads(&self) -> usize {
        self.inner.uploading.clear();
        let reset = self
            .mutate(|inspections| {
                let mut reset = 0;
                for inspection in inspections.iter_mut().filter(|i| i.status == Status::Uploading) {
                    inspection.status = Status::Active;
                    reset += 1;
                }
                Ok(reset)
            })
            .unwrap_or_default();
        tracing::info!(count = reset, "Reset stuck uploads");
        reset
    }

    /// Persist the current state now.
    pub async fn flush(&self) -> Result<()> {
        let mut rx = self.inner.snapshots.subscribe();
        self.inner.persister.persist_latest(&mut rx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    async fn store_with(kv: &MemoryStore) -> InspectionStore {
        InspectionStore::load(Arc::new(kv.clone())).await.unwrap()
    }

    fn photo(n: u32) -> MediaCapture {
        MediaCapture::photo(format!("file:///photos/{n}.jpg"), UtcDateTime::now())
    }

    #[tokio::test]
    async fn test_create_lists_newest_first() {
        let store = store_with(&MemoryStore::new()).await;
        let first = store.create("Toyota Camry").unwrap();
        let second = store.create("  Lada Niva ").unwrap();
        assert_eq!(second.label, "Lada Niva");
        let ids: Vec<_> = store.list().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, [second.id.clone(), first.id]);
        assert_eq!(store.active().unwrap().id, second.id);
        assert_eq!(store.create("   ").unwrap().label, "");
    }

    #[tokio::test]
    async fn test_media_is_appended_in_capture_order() {
        let store = store_with(&MemoryStore::new()).await;
        let inspection = store.create("Toyota Camry").unwrap();
        store.add_photo(&inspection.id, photo(1)).unwrap();
        store.add_photo(&inspection.id, photo(2)).unwrap();
        let video = store.add_video(&inspection.id, MediaCapture::video("/v.mp4", UtcDateTime::now(), 4200)).unwrap();
        assert_eq!(video.duration_ms, Some(4200));

        let inspection = store.get(&inspection.id).unwrap();
        let uris: Vec<_> = inspection.photos.iter().map(|p| p.uri.as_str()).collect();
        assert_eq!(uris, ["file:///photos/1.jpg", "file:///photos/2.jpg"]);
        assert_eq!(inspection.photos[0].duration_ms, None);
        assert_ne!(inspection.photos[0].id, inspection.photos[1].id);
    }

    #[tokio::test]
    async fn test_media_only_while_active() {
        let store = store_with(&MemoryStore::new()).await;
        let inspection = store.create("Toyota Camry").unwrap();
        store.set_status(&inspection.id, Status::Uploading).unwrap();
        let err = store.add_photo(&inspection.id, photo(1)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotActive(_)));
        let err = store.add_photo("missing", photo(1)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_crash_recovery_resets_uploading() {
        let json = r#"[
            {"id": "1", "label": "a", "startTime": 1, "status": "uploading"},
            {"id": "2", "label": "b", "startTime": 2, "status": "completed", "remoteFolderUrl": "https://u"}
        ]"#;
        let kv = MemoryStore::with_entries([(INSPECTIONS_KEY, json)]);
        let store = store_with(&kv).await;
        assert_eq!(store.get("1").unwrap().status, Status::Active);
        assert_eq!(store.get("2").unwrap().status, Status::Completed);
        assert!(store.uploading().is_empty());

        store.flush().await.unwrap();
        let persisted = decode_inspections(&kv.value(INSPECTIONS_KEY).unwrap()).unwrap();
        assert_eq!(persisted[0].status, Status::Active);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let kv = MemoryStore::with_entries([(INSPECTIONS_KEY, "{not json")]);
        let err = InspectionStore::load(Arc::new(kv)).await.err().unwrap();
        assert_eq!(*err, ErrorKind::InvalidData("inspections"));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory_state() {
        let kv = MemoryStore::new();
        let store = store_with(&kv).await;
        kv.set_failing(true);
        let inspection = store.create("Toyota Camry").unwrap();
        assert!(store.flush().await.is_err());
        assert_eq!(store.get(&inspection.id).unwrap().label, "Toyota Camry");

        kv.set_failing(false);
        store.flush().await.unwrap();
        let persisted = decode_inspections(&kv.value(INSPECTIONS_KEY).unwrap()).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn test_background_writer_persists_latest() {
        let kv = MemoryStore::new();
        let store = store_with(&kv).await;
        for label in ["a", "b", "c", "d"] {
            store.create(label).unwrap();
        }
        // Let the writer run on the current-thread runtime.
        let mut persisted = Vec::new();
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if let Some(json) = kv.value(INSPECTIONS_KEY) {
                persisted = decode_inspections(&json).unwrap();
                if persisted.len() == 4 {
                    break;
                }
            }
        }
        assert_eq!(persisted.len(), 4);
        // Superseded snapshots are skipped: four mutations, one write.
        assert_eq!(kv.writes(), 1);

        store.flush().await.unwrap();
        assert_eq!(kv.writes(), 2);
    }

    #[tokio::test]
    async fn test_begin_upload_requires_active() {
        let store = store_with(&MemoryStore::new()).await;
        let inspection = store.create("Toyota Camry").unwrap();
        store.begin_upload(&inspection.id).unwrap();
        assert_eq!(store.get(&inspection.id).unwrap().status, Status::Uploading);

        let err = store.begin_upload(&inspection.id).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotActive(_)));
        store.complete(&inspection.id, Some("https://disk/d/1".to_string())).unwrap();
        let err = store.begin_upload(&inspection.id).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotActive(_)));
        let done = store.get(&inspection.id).unwrap();
        assert_eq!(done.status, Status::Completed);
        assert_eq!(done.remote_folder_url.as_deref(), Some("https://disk/d/1"));

        let err = store.begin_upload("missing").unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_and_rename() {
        let store = store_with(&MemoryStore::new()).await;
        let inspection = store.create("Toyota Camry").unwrap();
        store.rename(&inspection.id, " Toyota Corolla ").unwrap();
        assert!(store.rename(&inspection.id, "").is_err());
        let done = store.complete(&inspection.id, Some("https://disk/d/1".to_string())).unwrap();
        assert_eq!(done.label, "Toyota Corolla");
        assert_eq!(done.status, Status::Completed);
        assert!(done.end_time.is_some());
        assert_eq!(done.remote_folder_url.as_deref(), Some("https://disk/d/1"));
        assert!(!store.revert_upload(&inspection.id));
    }

    #[tokio::test]
    async fn test_delete_cancels_running_upload() {
        let store = store_with(&MemoryStore::new()).await;
        let a = store.create("a").unwrap();
        let b = store.create("b").unwrap();
        let c = store.create("c").unwrap();
        let ticket = store.uploading().try_begin(&a.id).unwrap();

        assert!(store.delete(&a.id));
        assert!(!store.delete(&a.id));
        assert!(ticket.is_cancelled());
        assert!(!store.uploading().contains(&a.id));

        assert_eq!(store.delete_many(&[b.id.as_str(), "missing"]), 1);
        let remaining: Vec<_> = store.list().into_iter().map(|i| i.id).collect();
        assert_eq!(remaining, [c.id]);
    }

    #[tokio::test]
    async fn test_reset_uploads() {
        let store = store_with(&MemoryStore::new()).await;
        let a = store.create("a").unwrap();
        let ticket = store.uploading().try_begin(&a.id).unwrap();
        store.set_status(&a.id, Status::Uploading).unwrap();
        assert_eq!(store.reset_uploads(), 1);
        assert!(ticket.is_cancelled());
        assert!(store.uploading().is_empty());
        assert_eq!(store.get(&a.id).unwrap().status, Status::Active);
    }
}
