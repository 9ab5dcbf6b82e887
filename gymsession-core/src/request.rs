//! Request descriptors and responses passed through the pipeline.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::error::SessionError;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to (re-)dispatch a request.
///
/// The descriptor carries no credential; the pipeline attaches the current
/// access token on every dispatch, so a replay picks up renewed tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/exercises/bygroup/costas`.
    pub path: String,
    pub body: Option<Value>,
    pub authenticated: bool,
}

impl RequestDescriptor {
    /// An authenticated request without a body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Send without a bearer credential and never trigger renewal.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A response as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Error body the API sends alongside failure statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A response with a JSON body.
    pub fn json_body(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Decode the body as JSON; a body of the wrong shape is an
    /// [`SessionError::Unknown`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            SessionError::unknown(format!("unexpected response body (status {}): {}", self.status, e))
        })
    }

    /// Server-provided message of an error body, if there is one.
    pub fn error_message(&self) -> Option<String> {
        serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .map(|b| b.message)
            .filter(|m| !m.trim().is_empty())
    }

    /// Turn a non-success status into the matching error.
    ///
    /// Success statuses pass through. Failures with a structured body become
    /// [`SessionError::Api`]; anything else is [`SessionError::Unknown`].
    pub fn into_result(self) -> Result<ApiResponse, SessionError> {
        if self.is_success() {
            return Ok(self);
        }
        match self.error_message() {
            Some(message) => Err(SessionError::Api {
                code: self.status,
                message,
            }),
            None => Err(SessionError::unknown(format!(
                "request failed with status {}",
                self.status
            ))),
        }
    }
}
