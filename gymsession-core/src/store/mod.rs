//! Secure local store: durable key/value storage for secrets.
//!
//! The session layer keeps exactly one record here, the serialized active
//! session (see [`CredentialStore`](crate::credential_store::CredentialStore)).
//! Backends only move opaque strings; they never parse them.
//!
//! Two backends exist. [`KeyringStore`] (feature `keyring-store`) files each
//! key as an OS keyring entry and survives restarts. [`MemoryStore`] lives
//! and dies with the process, which is what tests want.
//!
//! ```rust,ignore
//! use gymsession_core::store::{Secret, SecretStore, create_store};
//!
//! let store = create_store(true);
//! store.set("gymsession/session", &Secret::new(record_json)).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use self::keyring::KeyringStore;

/// Service name the session's keyring entries are filed under.
const KEYRING_SERVICE: &str = "gymsession";

/// A token or serialized record that must not end up in logs.
///
/// Formatting prints `[REDACTED]`; [`expose`](Secret::expose) is the only way
/// to read the value. The buffer is wiped when the secret is dropped.
/// Serializes as the bare string so stored records stay plain JSON.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only for putting it on the wire or into the store.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Secret {}

/// Failure of the secure local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend refused or failed the operation.
    #[error("secure store failure: {message}")]
    BackendError { message: String },

    #[error("could not encode or decode a record: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Something is stored under `key` but it is not a usable record.
    #[error("unusable record under '{key}': {message}")]
    CorruptRecord { key: String, message: String },

    #[error("OS keyring unavailable: {message}")]
    KeyringUnavailable { message: String },
}

/// Key/value storage for secrets, keyed by plain strings.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Value under `key`, or `None` when nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store `secret` under `key`, replacing what was there.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Open the secure local store.
///
/// With `prefer_keyring` the OS keyring is used when it can be reached.
/// Otherwise, or when it cannot, a [`MemoryStore`] is returned and a warning
/// logged: sessions kept there are gone after a restart.
pub fn create_store(prefer_keyring: bool) -> Box<dyn SecretStore> {
    if prefer_keyring {
        if let Some(store) = open_keyring() {
            return store;
        }
    }

    tracing::debug!("Keeping the session in memory only");
    Box::new(MemoryStore::new())
}

#[cfg(feature = "keyring-store")]
fn open_keyring() -> Option<Box<dyn SecretStore>> {
    match KeyringStore::try_new(KEYRING_SERVICE) {
        Ok(store) => {
            tracing::info!("Keeping the session in the OS keyring");
            Some(Box::new(store))
        }
        Err(e) => {
            tracing::warn!("{}; the session will not survive a restart", e);
            None
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn open_keyring() -> Option<Box<dyn SecretStore>> {
    tracing::warn!(
        "Built without keyring-store (service '{}'); the session will not survive a restart",
        KEYRING_SERVICE
    );
    None
}
