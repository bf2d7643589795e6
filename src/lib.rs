//! Vehicle inspection capture and cloud upload core.
//!
//! [`App`] is the application-state root: it owns the inspection store, the
//! connected account and the uploader, and hands out shared handles to them.
//! Nothing here is global; tests build as many independent apps as they like.
//!
//! ```no_run
//! # async fn run() {
//! use carcheck::{App, Config};
//!
//! let config = Config::load(None).unwrap();
//! carcheck::logging::init(&config.log).unwrap();
//! let app = App::start(&config).await.unwrap();
//! let inspection = app.store().create("Toyota Camry").unwrap();
//! // Capture media and connect an account, then:
//! app.upload(&inspection.id, |progress| println!("{progress}")).await.unwrap();
//! # }
//! ```

pub mod error;
pub mod logging;

use crate::error::{ErrorKind, Result};
pub use carcheck_config::Config;
use carcheck_config::UploadConfig;
use carcheck_remote::{DiskConnector, RemoteConnector};
use carcheck_state::kv::{FileStore, KvHandle};
use carcheck_state::{Account, InspectionStore, Progress};
use carcheck_upload::{UploadOutcome, UploadSettings, Uploader};
use exn::ResultExt;
use std::sync::Arc;
use tracing::instrument;

fn upload_settings(config: &UploadConfig) -> Result<UploadSettings> {
    Ok(UploadSettings {
        root_folder: config.root_folder.clone(),
        max_attempts: config.max_attempts,
        retry_delay: config.retry_delay(),
        utc_offset: config.utc_offset().or_raise(|| ErrorKind::Config)?,
    })
}

#[derive(Clone)]
pub struct App {
    store: InspectionStore,
    account: Account,
    uploader: Uploader,
}

impl App {
    /// Open the file-backed store in `config.data_dir` and connect to the
    /// configured remote API.
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn start(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let kv: KvHandle = Arc::new(FileStore::open(&config.data_dir).await.or_raise(|| ErrorKind::Storage)?);
        let connector = DiskConnector::new(config.remote.api_base.as_str(), config.remote.request_timeout())
            .or_raise(|| ErrorKind::Remote)?;
        Self::assemble(kv, Arc::new(connector), upload_settings(&config.upload)?).await
    }

    /// Build an app from explicit collaborators.
    pub async fn assemble(kv: KvHandle, connector: Arc<dyn RemoteConnector>, settings: UploadSettings) -> Result<Self> {
        let store = InspectionStore::load(Arc::clone(&kv)).await.or_raise(|| ErrorKind::Storage)?;
        let account = Account::load(kv).await.or_raise(|| ErrorKind::Storage)?;
        let uploader = Uploader::new(store.clone(), connector, settings);
        tracing::info!(inspections = store.list().len(), connected = account.is_connected(), "Application started");
        Ok(Self { store, account, uploader })
    }

    pub fn store(&self) -> &InspectionStore {
        &self.store
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Upload inspection `id` with the connected account's credentials.
    pub async fn upload(
        &self,
        id: &str,
        on_progress: impl FnMut(Progress),
    ) -> carcheck_upload::error::Result<UploadOutcome> {
        let credentials = self.account.credentials();
        self.uploader.upload_with_progress(id, credentials.as_ref(), on_progress).await
    }

    /// Cancel every running upload and persist the current state.
    pub async fn shutdown(&self) -> Result<()> {
        let reset = self.store.reset_uploads();
        self.store.flush().await.or_raise(|| ErrorKind::Storage)?;
        tracing::info!(reset, "Application stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carcheck_remote::{MockRemote, Operation};
    use carcheck_state::kv::MemoryStore;
    use carcheck_state::{MediaCapture, Status};
    use carcheck_upload::error::ErrorKind as UploadErrorKind;
    use std::time::Duration;
    use time::UtcDateTime;

    async fn app(kv: KvHandle, remote: &MockRemote) -> App {
        let settings = UploadSettings { retry_delay: Duration::from_millis(1), ..UploadSettings::default() };
        App::assemble(kv, Arc::new(remote.clone()), settings).await.unwrap()
    }

    #[tokio::test]
    async fn test_upload_requires_connected_account() {
        let remote = MockRemote::new();
        let app = app(Arc::new(MemoryStore::new()), &remote).await;
        let media = tempfile::NamedTempFile::new().unwrap();
        let inspection = app.store().create("Lada Vesta").unwrap();
        let uri = media.path().to_string_lossy().into_owned();
        app.store().add_photo(&inspection.id, MediaCapture::photo(uri, UtcDateTime::now())).unwrap();

        let err = app.upload(&inspection.id, |_| {}).await.unwrap_err();
        assert_eq!(*err, UploadErrorKind::NotConnected);
        assert!(remote.calls().is_empty());

        app.account().connect("token", None).await.unwrap();
        let mut seen = Vec::new();
        let outcome = app.upload(&inspection.id, |p| seen.push(p)).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(_)));
        assert_eq!(seen.last(), Some(&Progress { completed: 1, total: 1 }));
        assert_eq!(app.store().get(&inspection.id).unwrap().status, Status::Completed);
        assert_eq!(remote.call_count(Operation::Publish), 1);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let kv: KvHandle = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let first = app(Arc::clone(&kv), &remote).await;
        let inspection = first.store().create("Kia Rio").unwrap();
        first.store().set_status(&inspection.id, Status::Uploading).unwrap();
        first.account().connect("token", None).await.unwrap();
        first.store().flush().await.unwrap();

        let kv: KvHandle = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let second = app(kv, &remote).await;
        let reloaded = second.store().get(&inspection.id).unwrap();
        assert_eq!(reloaded.label, "Kia Rio");
        // Nothing survives a restart mid-upload.
        assert_eq!(reloaded.status, Status::Active);
        assert!(second.account().is_connected());
    }

    #[tokio::test]
    async fn test_start_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config { data_dir: dir.path().join("data"), ..Config::default() };
        let app = App::start(&config).await.unwrap();
        assert!(dir.path().join("data").is_dir());
        assert!(app.store().list().is_empty());
        app.shutdown().await.unwrap();

        config.upload.max_attempts = 0;
        let err = App::start(&config).await.err().unwrap();
        assert_eq!(*err, ErrorKind::Config);
    }
}
