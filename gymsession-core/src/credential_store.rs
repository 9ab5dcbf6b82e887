//! Persistence of the active session in the secure local store.
//!
//! The whole session is kept as one JSON record under a single key. A record
//! is fully serialized before the one `set` call that writes it, so a failure
//! can never leave half of a session behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{ActiveSession, Credentials, User};
use crate::store::{Secret, SecretStore, StoreError};

/// Key the session record is stored under unless configured otherwise.
pub const DEFAULT_SESSION_KEY: &str = "gymsession/session";

/// Version of the record format (for future migrations).
const RECORD_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    version: u32,
    user: User,
    credentials: Credentials,
    saved_at: DateTime<Utc>,
}

/// Serializes the active session to and from a [`SecretStore`].
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn SecretStore>,
    key: String,
}

impl CredentialStore {
    /// Wrap a store, using [`DEFAULT_SESSION_KEY`].
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_key(store, DEFAULT_SESSION_KEY)
    }

    pub fn with_key(store: Arc<dyn SecretStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write `session`, replacing any previous record.
    pub async fn save(&self, session: &ActiveSession) -> Result<(), StoreError> {
        let record = SessionRecord {
            version: RECORD_VERSION,
            user: session.user.clone(),
            credentials: session.credentials.clone(),
            saved_at: Utc::now(),
        };
        let staged = Secret::new(serde_json::to_string(&record)?);

        self.store.set(&self.key, &staged).await?;
        tracing::debug!("Saved session for user {}", session.user.id);
        Ok(())
    }

    /// Read the stored session, if any.
    ///
    /// A record that exists but cannot be used is reported as
    /// [`StoreError::CorruptRecord`]; it is left in place for [`clear`](Self::clear).
    pub async fn load(&self) -> Result<Option<ActiveSession>, StoreError> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(None);
        };

        let record: SessionRecord =
            serde_json::from_str(raw.expose()).map_err(|e| self.corrupt(e.to_string()))?;

        if record.version != RECORD_VERSION {
            return Err(self.corrupt(format!("unsupported record version {}", record.version)));
        }

        let session = ActiveSession::new(record.user, record.credentials)
            .map_err(|e| self.corrupt(e.to_string()))?;

        tracing::debug!(
            "Loaded session for user {} saved at {}",
            session.user.id,
            record.saved_at
        );
        Ok(Some(session))
    }

    /// Remove the stored session. Succeeds when nothing is stored.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(&self.key).await?;
        tracing::debug!("Cleared stored session");
        Ok(())
    }

    fn corrupt(&self, message: String) -> StoreError {
        StoreError::CorruptRecord {
            key: self.key.clone(),
            message,
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("key", &self.key)
            .finish()
    }
}
