//! Single-flight renewal of expired credentials.
//!
//! Every request whose authenticated dispatch came back 401 becomes a
//! [`PendingRequest`]: its descriptor plus a oneshot channel for the result.
//! The first one to arrive while no renewal is running also spawns the
//! renewal task, so only one refresh-token exchange is ever in flight and the
//! initiating request is simply the head of the queue.
//!
//! When the exchange succeeds the renewed pair is committed through
//! [`SessionModel::renew_credentials`], the queue is taken as a whole and the
//! entries are replayed one by one in arrival order. A replay answered with
//! 401 again is terminal. When the exchange fails the session is cleared and
//! every entry fails with [`SessionError::SessionExpired`].

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::model::Credentials;
use crate::pipeline::dispatch;
use crate::request::{ApiResponse, RequestDescriptor};
use crate::session::SessionModel;
use crate::transport::Transport;

type Reply = oneshot::Sender<Result<ApiResponse, SessionError>>;

/// A request waiting for the outcome of a renewal.
struct PendingRequest {
    request: RequestDescriptor,
    reply: Reply,
}

enum Admission {
    Retry(RequestDescriptor),
    Queued(oneshot::Receiver<Result<ApiResponse, SessionError>>),
}

enum RenewalOutcome {
    Renewed,
    /// Sign-out or a new sign-in happened while the exchange ran.
    Superseded,
    Failed(SessionError),
}

#[derive(Default)]
struct RenewalState {
    in_progress: bool,
    queue: VecDeque<PendingRequest>,
}

/// Body of a successful refresh-token exchange.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    token: String,
    refresh_token: String,
}

/// Coordinates credential renewal for all in-flight requests.
pub struct RenewalCoordinator {
    session: Arc<SessionModel>,
    transport: Arc<dyn Transport>,
    refresh_path: String,
    state: Mutex<RenewalState>,
}

impl RenewalCoordinator {
    pub fn new(
        session: Arc<SessionModel>,
        transport: Arc<dyn Transport>,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            session,
            transport,
            refresh_path: refresh_path.into(),
            state: Mutex::new(RenewalState::default()),
        }
    }

    /// Recover a request whose dispatch at `sent_epoch` returned 401.
    ///
    /// Resolves with the replayed response, or with the error that ended it.
    pub async fn recover(
        self: &Arc<Self>,
        request: RequestDescriptor,
        sent_epoch: u64,
    ) -> Result<ApiResponse, SessionError> {
        let admission = {
            let mut state = self.state.lock();

            if !state.in_progress && self.session.epoch() != sent_epoch {
                Admission::Retry(request)
            } else {
                let (reply, receiver) = oneshot::channel();
                state.queue.push_back(PendingRequest { request, reply });

                if !state.in_progress {
                    state.in_progress = true;
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.renew(sent_epoch).await });
                }
                Admission::Queued(receiver)
            }
        };

        match admission {
            Admission::Retry(request) => {
                // The credentials were replaced after this request left, so
                // the 401 says nothing about the current ones.
                tracing::debug!("Retrying {} with newer credentials", request);
                self.replay(&request).await
            }
            Admission::Queued(receiver) => {
                receiver.await.unwrap_or(Err(SessionError::SessionExpired))
            }
        }
    }

    /// Number of requests waiting for the current renewal.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_renewing(&self) -> bool {
        self.state.lock().in_progress
    }

    /// Fail every waiting request with [`SessionError::SessionExpired`].
    ///
    /// Used on sign-out; a renewal still in flight will find the session gone
    /// and discard its result.
    pub fn fail_pending(&self) {
        let drained = std::mem::take(&mut self.state.lock().queue);
        if !drained.is_empty() {
            tracing::info!("Failing {} request(s) waiting for renewal", drained.len());
        }
        for pending in drained {
            let _ = pending.reply.send(Err(SessionError::SessionExpired));
        }
    }

    /// Renew the credentials a request was sent with at `started_at`.
    async fn renew(self: Arc<Self>, started_at: u64) {
        let outcome = match self.exchange(started_at).await {
            Ok(credentials) => {
                match self.session.renew_credentials(started_at, credentials).await {
                    Ok(()) => RenewalOutcome::Renewed,
                    Err(SessionError::SessionExpired) => RenewalOutcome::Superseded,
                    Err(e) => RenewalOutcome::Failed(e),
                }
            }
            Err(_) if self.session.epoch() != started_at => RenewalOutcome::Superseded,
            Err(e) => RenewalOutcome::Failed(e),
        };

        let superseded = matches!(outcome, RenewalOutcome::Superseded);
        let drained = {
            let mut state = self.state.lock();
            state.in_progress = false;
            std::mem::take(&mut state.queue)
        };

        match outcome {
            RenewalOutcome::Failed(e) => {
                tracing::warn!("Credential renewal failed, signing out: {}", e);
                self.session.expire(started_at).await;
                for pending in drained {
                    let _ = pending.reply.send(Err(SessionError::SessionExpired));
                }
            }
            RenewalOutcome::Renewed | RenewalOutcome::Superseded => {
                if superseded {
                    tracing::info!("Session changed during renewal, discarding its result");
                } else {
                    tracing::info!("Credentials renewed, replaying {} request(s)", drained.len());
                }
                for pending in drained {
                    let result = self.replay(&pending.request).await;
                    let _ = pending.reply.send(result);
                }
            }
        }
    }

    /// Exchange the refresh token of the session at `epoch` for a new pair.
    ///
    /// Nothing is sent when the session has changed since. Any failure,
    /// including a transport error, is reported as
    /// [`SessionError::SessionExpired`].
    async fn exchange(&self, epoch: u64) -> Result<Credentials, SessionError> {
        let refresh_token = match self.session.refresh_token() {
            Some((token, current)) if current == epoch => token,
            _ => return Err(SessionError::SessionExpired),
        };

        let request = RequestDescriptor::post(
            self.refresh_path.clone(),
            json!({ "refresh_token": refresh_token.expose() }),
        )
        .unauthenticated();

        tracing::debug!("Exchanging refresh token");
        let response = dispatch(self.transport.as_ref(), &request, None)
            .await
            .map_err(|e| {
                tracing::warn!("Refresh request failed: {}", e);
                SessionError::SessionExpired
            })?;

        if !response.is_success() {
            tracing::warn!(
                "Refresh token rejected with status {}: {}",
                response.status,
                response.error_message().unwrap_or_default()
            );
            return Err(SessionError::SessionExpired);
        }

        let body: RefreshResponse = response.json().map_err(|e| {
            tracing::warn!("Malformed refresh response: {}", e);
            SessionError::SessionExpired
        })?;
        let credentials = Credentials::new(body.token, body.refresh_token)
            .map_err(|_| SessionError::SessionExpired)?;

        Ok(credentials)
    }

    /// Dispatch `request` once more with the current access token.
    ///
    /// A second 401 ends the session.
    async fn replay(&self, request: &RequestDescriptor) -> Result<ApiResponse, SessionError> {
        let Some((token, epoch)) = self.session.access_token() else {
            return Err(SessionError::SessionExpired);
        };

        let response = dispatch(self.transport.as_ref(), request, Some(&token)).await?;
        if response.is_unauthorized() {
            tracing::warn!("{} still unauthorized after renewal, signing out", request);
            self.session.expire(epoch).await;
            return Err(SessionError::SessionExpired);
        }
        response.into_result()
    }
}

impl std::fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RenewalCoordinator")
            .field("refresh_path", &self.refresh_path)
            .field("in_progress", &state.in_progress)
            .field("queued", &state.queue.len())
            .finish()
    }
}
