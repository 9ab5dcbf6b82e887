//! OS keyring backend.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// Account every entry is filed under; the key goes into the service name.
const ENTRY_USER: &str = "gymsession";

/// Store backed by the platform keyring (Keychain, Secret Service,
/// Credential Manager).
///
/// Key `k` lives in the entry with service `{service_name}/{k}`.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Open the keyring, failing with [`StoreError::KeyringUnavailable`] when
    /// the platform has none or it does not hand back what was written.
    ///
    /// The check writes a throwaway entry through one handle, reads it
    /// through another, then deletes it. keyring's mock backend accepts the
    /// write and returns nothing on the second handle, so it is rejected here.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let check_service = format!("{}/availability-check", service_name);
        let expected = format!("gymsession-{}", std::process::id());

        let written = Entry::new(&check_service, ENTRY_USER)
            .and_then(|entry| entry.set_password(&expected));
        let read_back = Entry::new(&check_service, ENTRY_USER)
            .and_then(|entry| entry.get_password());
        if let Ok(entry) = Entry::new(&check_service, ENTRY_USER) {
            let _ = entry.delete_credential();
        }

        match (written, read_back) {
            (Err(e), _) => Err(unavailable(e.to_string())),
            (Ok(()), Ok(value)) if value == expected => Ok(Self {
                service_name: service_name.to_string(),
            }),
            (Ok(()), Ok(_)) => Err(unavailable(
                "keyring returned a different value than was written".to_string(),
            )),
            (Ok(()), Err(keyring::Error::NoEntry)) => Err(unavailable(
                "keyring accepted a write but did not keep it".to_string(),
            )),
            (Ok(()), Err(e)) => Err(unavailable(e.to_string())),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&format!("{}/{}", self.service_name, key), ENTRY_USER)
            .map_err(|e| backend(format!("cannot open entry for '{}': {}", key, e)))
    }
}

fn backend(message: String) -> StoreError {
    StoreError::BackendError { message }
}

fn unavailable(message: String) -> StoreError {
    StoreError::KeyringUnavailable { message }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

// keyring calls are blocking but short; they run inline on the caller's task.
#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(Secret::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(backend(format!("cannot read '{}': {}", key, e))),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| backend(format!("cannot write '{}': {}", key, e)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(backend(format!("cannot delete '{}': {}", key, e))),
        }
    }
}
