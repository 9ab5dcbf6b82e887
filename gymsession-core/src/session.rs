//! The session model and its lifecycle.
//!
//! [`SessionModel`] owns the single local session. Every change goes through
//! it, and every change that must survive a restart is written to the
//! [`CredentialStore`] before it is committed in memory:
//!
//! ```text
//! Empty --sign-in--> Active --sign-out | renewal failure--> Empty
//! Empty --restore, record found--> Active
//! ```
//!
//! Each commit bumps an epoch counter. The request pipeline records the epoch
//! a request was sent with, which tells a stale 401 (credentials replaced
//! since) from one that needs a renewal.

use parking_lot::RwLock;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::credential_store::CredentialStore;
use crate::error::SessionError;
use crate::model::{ActiveSession, Credentials, RestorationStatus, Session, User, UserPatch};
use crate::store::Secret;

struct State {
    active: Option<ActiveSession>,
    epoch: u64,
}

/// Owner of the in-memory session and its durable copy.
pub struct SessionModel {
    state: RwLock<State>,
    store: CredentialStore,
    restoration: watch::Sender<RestorationStatus>,
    /// Serialises persistence so the durable copy follows commit order.
    writes: Mutex<()>,
}

impl SessionModel {
    /// Create an empty model whose restoration is pending.
    pub fn new(store: CredentialStore) -> Self {
        let (restoration, _) = watch::channel(RestorationStatus::Pending);
        Self {
            state: RwLock::new(State {
                active: None,
                epoch: 0,
            }),
            store,
            restoration,
            writes: Mutex::new(()),
        }
    }

    /// Load the persisted session once and settle the restoration status.
    ///
    /// Calls after the first return the settled status without touching the
    /// store. A record that cannot be read settles `Absent` and is reported
    /// as [`SessionError::Storage`].
    pub async fn restore(&self) -> Result<RestorationStatus, SessionError> {
        let _guard = self.writes.lock().await;

        let current = *self.restoration.borrow();
        if !current.is_pending() {
            return Ok(current);
        }

        match self.store.load().await {
            Ok(Some(stored)) => {
                let mut state = self.state.write();
                if state.active.is_none() {
                    tracing::info!("Restored session for user {}", stored.user.id);
                    state.active = Some(stored);
                    state.epoch += 1;
                }
                drop(state);
                self.settle(RestorationStatus::Restored);
                Ok(RestorationStatus::Restored)
            }
            Ok(None) => {
                tracing::debug!("No stored session to restore");
                self.settle(RestorationStatus::Absent);
                Ok(RestorationStatus::Absent)
            }
            Err(e) => {
                tracing::warn!("Stored session could not be restored: {}", e);
                self.settle(RestorationStatus::Absent);
                Err(e.into())
            }
        }
    }

    /// Move out of `Pending`. Has no effect once settled.
    pub(crate) fn settle(&self, status: RestorationStatus) {
        self.restoration.send_if_modified(|current| {
            if current.is_pending() && !status.is_pending() {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    pub fn restoration_status(&self) -> RestorationStatus {
        *self.restoration.borrow()
    }

    pub fn subscribe_restoration(&self) -> watch::Receiver<RestorationStatus> {
        self.restoration.subscribe()
    }

    /// Wait until restoration has settled, failing with
    /// [`SessionError::NotReady`] after `wait`.
    pub async fn wait_until_restored(&self, wait: Duration) -> Result<(), SessionError> {
        let mut changes = self.restoration.subscribe();
        let settled = tokio::time::timeout(wait, async {
            changes.wait_for(|s| !s.is_pending()).await.map(|_| ())
        })
        .await;

        match settled {
            Ok(Ok(())) => Ok(()),
            _ => Err(SessionError::NotReady),
        }
    }

    /// Replace the session with a signed-in user.
    ///
    /// The record is persisted first; memory only changes if that succeeds.
    pub async fn set_session(
        &self,
        user: User,
        credentials: Credentials,
    ) -> Result<(), SessionError> {
        let active = ActiveSession::new(user, credentials)?;

        let _guard = self.writes.lock().await;
        self.store.save(&active).await?;
        self.commit(Some(active));
        Ok(())
    }

    /// Remove the session, durable copy first.
    ///
    /// Clearing an empty session is a no-op that still succeeds.
    pub async fn clear_session(&self) -> Result<(), SessionError> {
        let _guard = self.writes.lock().await;
        self.store.clear().await?;
        self.commit(None);
        Ok(())
    }

    /// Remove the session from memory unconditionally, then from the store.
    ///
    /// Used for sign-out and forced expiry, which must never leave a user
    /// signed in locally. A store failure is logged, not returned.
    pub async fn force_clear(&self) {
        let _guard = self.writes.lock().await;
        self.commit(None);
        if let Err(e) = self.store.clear().await {
            tracing::warn!("Session cleared in memory but not in storage: {}", e);
        }
    }

    /// Forced sign-out of the session that existed at `expected_epoch`.
    ///
    /// Does nothing if the session has changed since, so a late failure can
    /// not sign out a newer session.
    pub(crate) async fn expire(&self, expected_epoch: u64) {
        let _guard = self.writes.lock().await;
        let current = self.state.read().epoch;
        if current != expected_epoch {
            tracing::debug!("Session changed since epoch {}, not expiring it", expected_epoch);
            return;
        }

        self.commit(None);
        if let Err(e) = self.store.clear().await {
            tracing::warn!("Expired session cleared in memory but not in storage: {}", e);
        }
        tracing::info!("Session expired and cleared");
    }

    /// Commit renewed credentials for the user signed in at `expected_epoch`.
    ///
    /// Fails with [`SessionError::SessionExpired`] when the session changed in
    /// the meantime (sign-out, another sign-in) so stale renewals are dropped.
    /// Only the credentials are replaced; the user is whatever is current.
    pub async fn renew_credentials(
        &self,
        expected_epoch: u64,
        credentials: Credentials,
    ) -> Result<(), SessionError> {
        credentials.validate()?;

        let _guard = self.writes.lock().await;
        let renewed = {
            let state = self.state.read();
            match &state.active {
                Some(active) if state.epoch == expected_epoch => ActiveSession {
                    user: active.user.clone(),
                    credentials,
                },
                _ => return Err(SessionError::SessionExpired),
            }
        };
        self.store.save(&renewed).await?;

        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(active) = state.active.as_mut() else {
            return Err(SessionError::SessionExpired);
        };
        active.credentials = renewed.credentials;
        state.epoch += 1;
        Ok(())
    }

    /// Apply `patch` to the signed-in user, persist, then commit.
    ///
    /// Memory only changes once the store has the updated record, so a failed
    /// save leaves the previous user in place. The epoch is not bumped: the
    /// credentials are unchanged and in-flight requests stay current.
    pub async fn update_user(&self, patch: &UserPatch) -> Result<User, SessionError> {
        let _guard = self.writes.lock().await;
        let updated = {
            let state = self.state.read();
            let active = state
                .active
                .as_ref()
                .ok_or_else(|| SessionError::validation("no signed-in user to update"))?;
            ActiveSession {
                user: active.user.apply(patch)?,
                credentials: active.credentials.clone(),
            }
        };

        if let Err(e) = self.store.save(&updated).await {
            tracing::warn!("Profile update not saved: {}", e);
            return Err(e.into());
        }

        if let Some(active) = self.state.write().active.as_mut() {
            active.user = updated.user.clone();
        }
        Ok(updated.user)
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.read().active.as_ref().map(|a| a.user.clone())
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active.is_some()
    }

    pub fn snapshot(&self) -> Session {
        Session::new(self.state.read().active.clone(), self.restoration_status())
    }

    /// Current access token and the epoch it belongs to.
    pub(crate) fn access_token(&self) -> Option<(Secret, u64)> {
        let state = self.state.read();
        state
            .active
            .as_ref()
            .map(|a| (a.credentials.access_token.clone(), state.epoch))
    }

    /// Current refresh token and the epoch it belongs to.
    pub(crate) fn refresh_token(&self) -> Option<(Secret, u64)> {
        let state = self.state.read();
        state
            .active
            .as_ref()
            .map(|a| (a.credentials.refresh_token.clone(), state.epoch))
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    fn commit(&self, active: Option<ActiveSession>) {
        let mut state = self.state.write();
        state.active = active;
        state.epoch += 1;
    }
}

impl std::fmt::Debug for SessionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SessionModel")
            .field("active", &state.active.is_some())
            .field("epoch", &state.epoch)
            .field("restoration", &self.restoration_status())
            .finish()
    }
}
