//! The request pipeline every API call goes through.
//!
//! Authenticated requests wait for session restoration, carry the current
//! access token as a bearer credential, and hand a 401 over to the
//! [`RenewalCoordinator`] instead of failing. Nothing is retried except the
//! single replay that follows a renewal.

use std::sync::Arc;
use std::time::Duration;

use crate::error::SessionError;
use crate::renewal::RenewalCoordinator;
use crate::request::{ApiResponse, RequestDescriptor};
use crate::session::SessionModel;
use crate::store::Secret;
use crate::transport::Transport;

/// Send `request` once, mapping transport failures to
/// [`SessionError::Unknown`]. The status is not interpreted.
pub(crate) async fn dispatch(
    transport: &dyn Transport,
    request: &RequestDescriptor,
    bearer: Option<&Secret>,
) -> Result<ApiResponse, SessionError> {
    transport.send(request, bearer).await.map_err(|e| {
        tracing::debug!("{} failed without a response: {}", request, e);
        SessionError::unknown(e.to_string())
    })
}

/// Executes request descriptors against the API.
#[derive(Clone)]
pub struct RequestPipeline {
    session: Arc<SessionModel>,
    transport: Arc<dyn Transport>,
    renewal: Arc<RenewalCoordinator>,
    restoration_wait: Duration,
}

impl RequestPipeline {
    pub fn new(
        session: Arc<SessionModel>,
        transport: Arc<dyn Transport>,
        renewal: Arc<RenewalCoordinator>,
        restoration_wait: Duration,
    ) -> Self {
        Self {
            session,
            transport,
            renewal,
            restoration_wait,
        }
    }

    /// Execute `request` and classify the outcome.
    ///
    /// - success (2xx/3xx): the response
    /// - error status with a `{ "message" }` body: [`SessionError::Api`]
    /// - no response, or an unstructured error: [`SessionError::Unknown`]
    /// - 401 on an authenticated request: renewal, then one replay
    pub async fn execute(&self, request: RequestDescriptor) -> Result<ApiResponse, SessionError> {
        if !request.authenticated {
            return dispatch(self.transport.as_ref(), &request, None)
                .await?
                .into_result();
        }

        self.session
            .wait_until_restored(self.restoration_wait)
            .await?;

        let Some((token, epoch)) = self.session.access_token() else {
            tracing::debug!("{} needs a session but none is active", request);
            return Err(SessionError::SessionExpired);
        };

        let response = dispatch(self.transport.as_ref(), &request, Some(&token)).await?;
        if response.is_unauthorized() {
            tracing::debug!("{} returned 401, handing over to renewal", request);
            return self.renewal.recover(request, epoch).await;
        }
        response.into_result()
    }

    /// Send `request` with the current bearer, without renewal or
    /// classification. Used for best-effort calls such as a remote sign-out.
    pub(crate) async fn send_once(
        &self,
        request: &RequestDescriptor,
    ) -> Result<ApiResponse, SessionError> {
        let token = self.session.access_token().map(|(token, _)| token);
        dispatch(self.transport.as_ref(), request, token.as_ref()).await
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("session", &self.session)
            .field("renewal", &self.renewal)
            .field("restoration_wait", &self.restoration_wait)
            .finish()
    }
}
