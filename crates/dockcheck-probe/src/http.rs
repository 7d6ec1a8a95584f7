//! Minimal blocking HTTP client seam.

use std::time::Duration;

use dockcheck_common::error::{HarnessError, Result};
use serde::de::DeserializeOwned;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx class.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the body is not the expected shape.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Blocking HTTP client.
///
/// A response with any status code is `Ok`; only transport failures
/// (connection refused, timeouts, malformed responses) are errors.
pub trait HttpClient: Send + Sync {
    /// Issues a `GET`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Http`] on transport failure.
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse>;

    /// Issues a `POST` with an optional JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Http`] on transport failure.
    fn post(
        &self,
        url: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`'s blocking client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { inner })
    }

    fn send(&self, url: &str, request: reqwest::blocking::RequestBuilder) -> Result<HttpResponse> {
        let response = request.send().map_err(|e| HarnessError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| HarnessError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(url, status, "response received");
        Ok(HttpResponse { status, body })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut request = self.inner.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.send(url, request)
    }

    fn post(
        &self,
        url: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let mut request = self.inner.post(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(url, request)
    }
}
