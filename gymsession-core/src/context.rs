//! The façade UI and business code depend on.
//!
//! [`SessionContext`] wires the session model, the credential store, the
//! request pipeline and the renewal coordinator together and exposes only:
//! sign-in, sign-out, profile update, the current user, the restoration flag,
//! and the pipeline itself for business requests.
//!
//! # Example
//!
//! ```rust,ignore
//! use gymsession_core::{SessionConfig, SessionContext, store::create_store};
//!
//! let context = SessionContext::connect(SessionConfig::default(), create_store(true).into())?;
//! context.restore().await?;
//!
//! if context.user().is_none() {
//!     context.sign_in("rodrigo@email.com", "secret123").await?;
//! }
//! ```

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::credential_store::CredentialStore;
use crate::error::SessionError;
use crate::model::{Credentials, RestorationStatus, Session, User, UserPatch};
use crate::pipeline::RequestPipeline;
use crate::renewal::RenewalCoordinator;
use crate::request::{ApiResponse, Method, RequestDescriptor};
use crate::session::SessionModel;
use crate::store::SecretStore;
use crate::transport::{HttpTransport, Transport};

/// Body of a successful sign-in.
#[derive(Debug, Deserialize)]
struct SignInResponse {
    user: User,
    token: String,
    refresh_token: String,
}

struct Inner {
    config: SessionConfig,
    session: Arc<SessionModel>,
    renewal: Arc<RenewalCoordinator>,
    pipeline: RequestPipeline,
}

/// Handle to the local session. Clones share the same session.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl SessionContext {
    /// Build a context on top of `store` and `transport`.
    ///
    /// The session starts empty with restoration pending; call
    /// [`restore`](Self::restore) once at startup.
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SecretStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let credentials = CredentialStore::with_key(store, config.store_key.clone());
        let session = Arc::new(SessionModel::new(credentials));
        let renewal = Arc::new(RenewalCoordinator::new(
            Arc::clone(&session),
            Arc::clone(&transport),
            config.refresh_path.clone(),
        ));
        let pipeline = RequestPipeline::new(
            Arc::clone(&session),
            transport,
            Arc::clone(&renewal),
            config.restoration_wait(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                session,
                renewal,
                pipeline,
            }),
        }
    }

    /// Validate `config` and build a context that talks HTTP to its base URL.
    pub fn connect(config: SessionConfig, store: Arc<dyn SecretStore>) -> Result<Self, SessionError> {
        let base_url = config.validate()?;
        let transport = HttpTransport::new(base_url, config.request_timeout())
            .map_err(|e| SessionError::unknown(e.to_string()))?;
        Ok(Self::new(config, store, Arc::new(transport)))
    }

    /// Load the persisted session. Settles [`is_session_restoring`](Self::is_session_restoring).
    pub async fn restore(&self) -> Result<RestorationStatus, SessionError> {
        self.inner.session.restore().await
    }

    /// Sign in and persist the resulting session.
    ///
    /// Bad credentials surface as [`SessionError::Api`] with the server's
    /// message; a transport failure as [`SessionError::Unknown`].
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), SessionError> {
        let request = RequestDescriptor::post(
            self.inner.config.sign_in_path.clone(),
            json!({ "email": email, "password": password }),
        )
        .unauthenticated();

        let response = self.inner.pipeline.execute(request).await?;
        let body: SignInResponse = response.json()?;

        let credentials = Credentials::new(body.token, body.refresh_token)
            .map_err(|e| SessionError::unknown(format!("malformed sign-in response: {}", e)))?;
        body.user
            .validate()
            .map_err(|e| SessionError::unknown(format!("malformed sign-in response: {}", e)))?;

        let user_id = body.user.id.clone();
        self.inner.session.set_session(body.user, credentials).await?;
        self.inner.session.settle(RestorationStatus::Restored);

        tracing::info!("Signed in as user {}", user_id);
        Ok(())
    }

    /// Sign out locally, whatever happens remotely.
    ///
    /// Requests waiting for a renewal fail with
    /// [`SessionError::SessionExpired`].
    pub async fn sign_out(&self) {
        if let Some(path) = &self.inner.config.sign_out_path {
            if self.inner.session.is_active() {
                let request = RequestDescriptor::new(Method::Post, path.clone());
                match self.inner.pipeline.send_once(&request).await {
                    Ok(response) if response.is_success() => {}
                    Ok(response) => {
                        tracing::warn!("Remote sign-out returned status {}", response.status)
                    }
                    Err(e) => tracing::warn!("Remote sign-out failed: {}", e),
                }
            }
        }

        self.inner.renewal.fail_pending();
        self.inner.session.force_clear().await;
        tracing::info!("Signed out");
    }

    /// Apply `patch` to the signed-in user and persist it.
    ///
    /// A patch that would make the user invalid fails with
    /// [`SessionError::Validation`] and changes nothing. The updated record is
    /// saved before memory changes, so a failed save keeps the previous user.
    pub async fn update_profile(&self, patch: UserPatch) -> Result<User, SessionError> {
        let updated = self.inner.session.update_user(&patch).await?;
        tracing::info!("Profile updated for user {}", updated.id);
        Ok(updated)
    }

    /// Execute a business request through the pipeline.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<ApiResponse, SessionError> {
        self.inner.pipeline.execute(request).await
    }

    /// The signed-in user, if any.
    pub fn user(&self) -> Option<User> {
        self.inner.session.current_user()
    }

    /// True until the persisted session has been loaded (or found absent).
    pub fn is_session_restoring(&self) -> bool {
        self.inner.session.restoration_status().is_pending()
    }

    pub fn restoration_status(&self) -> RestorationStatus {
        self.inner.session.restoration_status()
    }

    /// Receiver notified when restoration settles.
    pub fn restoration_changes(&self) -> watch::Receiver<RestorationStatus> {
        self.inner.session.subscribe_restoration()
    }

    pub fn snapshot(&self) -> Session {
        self.inner.session.snapshot()
    }

    /// Requests currently waiting for a renewal to finish.
    pub fn queued_requests(&self) -> usize {
        self.inner.renewal.queued()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("base_url", &self.inner.config.base_url)
            .field("pipeline", &self.inner.pipeline)
            .finish()
    }
}
