//! HTTP transport boundary.
//!
//! [`Transport`] sends one request and returns whatever status came back; it
//! never interprets statuses. [`HttpTransport`] is the reqwest implementation.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::request::{ApiResponse, Method, RequestDescriptor};
use crate::store::Secret;

/// Error type for transport failures (no response was obtained).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the response could not be read.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request URL could not be built.
    #[error("invalid url: {message}")]
    InvalidUrl { message: String },
}

/// Sends a request to the API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatch `request`, attaching `bearer` as `Authorization: Bearer ...`
    /// when given.
    async fn send(
        &self,
        request: &RequestDescriptor,
        bearer: Option<&Secret>,
    ) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport rooted at a base URL.
///
/// Clone is cheap - reqwest::Client shares its connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append `path` to the base URL one segment at a time so every segment
    /// is percent-encoded.
    pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| TransportError::InvalidUrl {
                message: format!("{} cannot be a base url", self.base_url),
            })?;
            segments
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        bearer: Option<&Secret>,
    ) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token.expose());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!("Dispatching {}", request);
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        Ok(ApiResponse::new(status, body.to_vec()))
    }
}
