//! Session layer configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::credential_store::DEFAULT_SESSION_KEY;
use crate::error::SessionError;

/// Where the API lives and how the session layer talks to it.
///
/// Every field has a default, so an empty TOML table is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the API.
    pub base_url: String,

    /// Timeout applied to every HTTP request.
    pub request_timeout_secs: u64,

    /// How long authenticated requests wait for session restoration.
    pub restoration_wait_secs: u64,

    /// Sign-in endpoint.
    pub sign_in_path: String,

    /// Refresh-token exchange endpoint.
    pub refresh_path: String,

    /// Remote sign-out endpoint, called best-effort when set.
    pub sign_out_path: Option<String>,

    /// Key of the session record in the secure local store.
    pub store_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333".to_string(),
            request_timeout_secs: 30,
            restoration_wait_secs: 10,
            sign_in_path: "/sessions".to_string(),
            refresh_path: "/sessions/refresh-token".to_string(),
            sign_out_path: None,
            store_key: DEFAULT_SESSION_KEY.to_string(),
        }
    }
}

impl SessionConfig {
    /// Config pointing at `base_url` with every other field defaulted.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Check the config and return the parsed base URL.
    pub fn validate(&self) -> Result<Url, SessionError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            SessionError::validation(format!("invalid base_url '{}': {}", self.base_url, e))
        })?;
        if url.cannot_be_a_base() {
            return Err(SessionError::validation(format!(
                "base_url '{}' cannot carry paths",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(SessionError::validation("request_timeout_secs must be positive"));
        }
        if self.restoration_wait_secs == 0 {
            return Err(SessionError::validation("restoration_wait_secs must be positive"));
        }
        if self.store_key.trim().is_empty() {
            return Err(SessionError::validation("store_key must not be empty"));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn restoration_wait(&self) -> Duration {
        Duration::from_secs(self.restoration_wait_secs)
    }
}
