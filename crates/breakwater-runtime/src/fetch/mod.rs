//! Resilient HTTP fetch.
//!
//! [`ResilientFetch`] runs requests through a [`ResilientCall`]: transport
//! errors and 5xx responses are retried, 4xx responses fail immediately,
//! and an OPEN breaker rejects without touching the network.
//!
//! The HTTP client itself sits behind the [`Transport`] trait. The
//! `reqwest`-backed [`ReqwestTransport`] is available with the `http`
//! feature; tests plug in their own.

use async_trait::async_trait;
use breakwater_core::{Classify, RetryOverrides, RetrySettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::error::ResilienceError;
use crate::resilience::{ResilientCall, RetryPolicy};

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::ReqwestTransport;

/// Errors from a single fetch attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out")]
    TimedOut,

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Classify for FetchError {
    fn is_transport_failure(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn is_timeout(&self) -> bool {
        matches!(self, FetchError::TimedOut)
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything about a request except its URL.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self {
            method: Method::Post,
            ..Default::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, FetchError> {
        let body =
            serde_json::to_vec(value).map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        Ok(self.header("content-type", "application/json").body(body))
    }
}

/// A response as seen by the caller. Header names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Sends one HTTP request. Implementations should map connection problems
/// to [`FetchError::Transport`] and client-side timeouts to
/// [`FetchError::TimedOut`]; any response, whatever its status, is `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, request: &RequestOptions) -> Result<HttpResponse, FetchError>;
}

/// HTTP fetch guarded by a circuit breaker and retried with backoff.
#[derive(Clone)]
pub struct ResilientFetch {
    transport: Arc<dyn Transport>,
    call: ResilientCall,
    retry: RetrySettings,
}

impl fmt::Debug for ResilientFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientFetch")
            .field("call", &self.call)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ResilientFetch {
    /// `retry` is the base that per-request overrides are merged onto.
    pub fn new(transport: Arc<dyn Transport>, call: ResilientCall, retry: RetrySettings) -> Self {
        Self {
            transport,
            call,
            retry,
        }
    }

    pub fn call(&self) -> &ResilientCall {
        &self.call
    }

    /// Retry policy with `overrides` merged onto this fetch's base
    /// settings, ready for a custom predicate or observer.
    pub fn retry_policy(
        &self,
        overrides: &RetryOverrides,
    ) -> Result<RetryPolicy<FetchError>, ResilienceError<FetchError>> {
        let settings = overrides.apply_to(&self.retry).map_err(|e| {
            ResilienceError::Operation(FetchError::InvalidRequest(e.to_string()))
        })?;
        Ok(RetryPolicy::new(settings))
    }

    /// Fetch `url`, treating any status >= 400 as a failure.
    pub async fn fetch(
        &self,
        url: &str,
        request: &RequestOptions,
        overrides: &RetryOverrides,
    ) -> Result<HttpResponse, ResilienceError<FetchError>> {
        let policy = self.retry_policy(overrides)?;
        self.fetch_with_policy(url, request, &policy).await
    }

    /// Like [`fetch`](Self::fetch) with a caller-built policy, for a custom
    /// retry condition or `on_retry` observer.
    pub async fn fetch_with_policy(
        &self,
        url: &str,
        request: &RequestOptions,
        policy: &RetryPolicy<FetchError>,
    ) -> Result<HttpResponse, ResilienceError<FetchError>> {
        tracing::debug!(
            breaker = %self.call.breaker().name(),
            method = %request.method,
            url,
            "Resilient fetch"
        );
        self.call
            .execute(|| self.send_checked(url, request), policy)
            .await
    }

    /// Fetch `url` and decode the body as JSON.
    ///
    /// Decoding happens after the resilient call, so a malformed body is
    /// neither retried nor counted against the breaker.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        request: &RequestOptions,
        overrides: &RetryOverrides,
    ) -> Result<T, ResilienceError<FetchError>> {
        let policy = self.retry_policy(overrides)?;
        self.fetch_json_with_policy(url, request, &policy).await
    }

    /// [`fetch_json`](Self::fetch_json) with a caller-built policy.
    pub async fn fetch_json_with_policy<T: DeserializeOwned>(
        &self,
        url: &str,
        request: &RequestOptions,
        policy: &RetryPolicy<FetchError>,
    ) -> Result<T, ResilienceError<FetchError>> {
        let request = if request.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("accept")) {
            request.clone()
        } else {
            request.clone().header("accept", "application/json")
        };

        let response = self.fetch_with_policy(url, &request, policy).await?;
        response.json().map_err(ResilienceError::Operation)
    }

    async fn send_checked(
        &self,
        url: &str,
        request: &RequestOptions,
    ) -> Result<HttpResponse, FetchError> {
        let response = self.transport.send(url, request).await?;
        if response.status >= 400 {
            return Err(FetchError::Status {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(response)
    }
}
