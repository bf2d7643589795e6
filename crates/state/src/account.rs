//! The single connected remote account.

use crate::error::{ErrorKind, Result};
use crate::kv::{CREDENTIALS_KEY, KvHandle};
use crate::models::{Credentials, DEFAULT_VALIDITY};
use crate::records::{CredentialsRecord, from_millis, to_millis};
use exn::{OptionExt, ResultExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::{Duration, UtcDateTime};

/// Holds the credentials of at most one connected account.
///
/// Absent or expired credentials mean "not connected". Persistence failures
/// are logged; the in-memory value is authoritative for the session.
#[derive(Clone)]
pub struct Account {
    kv: KvHandle,
    credentials: Arc<Mutex<Option<Credentials>>>,
}

impl Account {
    /// Load persisted credentials, discarding (and removing) expired or
    /// unreadable ones.
    pub async fn load(kv: KvHandle) -> Result<Self> {
        let credentials = match kv.get(CREDENTIALS_KEY).await? {
            None => None,
            Some(json) => match Self::decode(&json) {
                Ok(credentials) if !credentials.is_expired() => Some(credentials),
                Ok(_) => {
                    tracing::info!("Stored credentials expired");
                    Self::forget(&kv).await;
                    None
                },
                Err(e) => {
                    tracing::warn!(error = ?e, "Discarding unreadable credentials");
                    Self::forget(&kv).await;
                    None
                },
            },
        };
        Ok(Self { kv, credentials: Arc::new(Mutex::new(credentials)) })
    }

    fn decode(json: &str) -> Result<Credentials> {
        let record: CredentialsRecord =
            serde_json::from_str(json).or_raise(|| ErrorKind::InvalidData("credentials"))?;
        Credentials::try_from(record)
    }

    async fn forget(kv: &KvHandle) {
        if let Err(e) = kv.remove(CREDENTIALS_KEY).await {
            tracing::warn!(error = ?e, "Failed to remove stored credentials");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Credentials>> {
        self.credentials.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current credentials, or `None` when not connected or expired.
    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().as_ref().filter(|c| !c.is_expired()).cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.credentials().is_some()
    }

    /// Store the result of a successful authorisation.
    ///
    /// `expires_in` defaults to one year when the provider did not report
    /// one.
    pub async fn connect(&self, access_token: &str, expires_in: Option<Duration>) -> Result<Credentials> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            exn::bail!(ErrorKind::InvalidCredentials);
        }
        let expires_at = UtcDateTime::now()
            .checked_add(expires_in.unwrap_or(DEFAULT_VALIDITY))
            .ok_or_raise(|| ErrorKind::InvalidData("expiry"))?;
        // Persisted with millisecond precision.
        let expires_at = from_millis(to_millis(expires_at)?, "expiry")?;
        let credentials = Credentials::new(access_token, expires_at);
        *self.lock() = Some(credentials.clone());
        tracing::info!(?expires_at, "Account connected");

        let record = CredentialsRecord::try_from(&credentials)?;
        let json = serde_json::to_string(&record).or_raise(|| ErrorKind::InvalidData("credentials"))?;
        if let Err(e) = self.kv.set(CREDENTIALS_KEY, &json).await {
            tracing::warn!(error = ?e, "Failed to persist credentials");
        }
        Ok(credentials)
    }

    pub async fn disconnect(&self) {
        *self.lock() = None;
        Self::forget(&self.kv).await;
        tracing::info!("Account disconnected");
    }
}
