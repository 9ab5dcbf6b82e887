//! Error taxonomy surfaced to UI and business code.

use thiserror::Error;

use crate::store::StoreError;

/// Message shown when nothing more specific is available.
pub const GENERIC_MESSAGE: &str = "Something went wrong. Try again later.";

/// Every failure the session layer reports.
///
/// The variant is decided where the failure is produced (response
/// classification, the credential store adapter, patch validation) and is
/// never re-derived later.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server rejected the request with a structured message.
    ///
    /// The message is meant to be shown verbatim.
    #[error("{message}")]
    Api { code: u16, message: String },

    /// Transport or parsing failure without a structured body.
    #[error("unexpected failure: {message}")]
    Unknown { message: String },

    /// The secure local store could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Credentials could not be renewed; the session has been cleared.
    #[error("session expired, sign in again")]
    SessionExpired,

    /// Local data would violate an invariant. Never sent to the server.
    #[error("invalid data: {message}")]
    Validation { message: String },

    /// An authenticated request waited too long for session restoration.
    #[error("session is still being restored")]
    NotReady,
}

impl SessionError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// HTTP status of an [`Api`](Self::Api) error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Text to show the user.
    ///
    /// Server messages and local validation messages are shown as they are;
    /// everything else falls back to `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::Validation { message } => message.clone(),
            Self::SessionExpired => "Your session expired. Sign in again.".to_string(),
            _ => fallback.to_string(),
        }
    }
}
