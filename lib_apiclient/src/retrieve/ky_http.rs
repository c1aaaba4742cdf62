//! # HTTP Retrieval Utilities
//!
//! The transport seam of the client. [`HttpTransport`] executes one fully-resolved
//! request; [`ReqwestTransport`] is the production implementation, an asynchronous
//! wrapper around `reqwest` with optional exponential-backoff retries supplied by
//! `reqwest-middleware`.
//!
//! Non-2xx responses are returned as data (`success == false`), never raised here;
//! the dispatch layer decides what is an error.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::errors::{ApiError, ClientError, ClientResult};

/// Header map used throughout the client. Ordered by name, which keeps cache keys
/// deterministic regardless of insertion order.
pub type Headers = BTreeMap<String, String>;

/// Merges `source` into `target` with lowercased names, so a later stage replaces
/// an earlier header whatever its spelling.
pub fn merge_headers<I>(target: &mut Headers, source: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in source {
        target.insert(name.to_ascii_lowercase(), value);
    }
}

/// A fully-resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    /// Serialized JSON body, if any.
    pub body: Option<String>,
}

/// The raw answer of the server.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// The numeric HTTP status code.
    pub status: u16,
    /// The canonical reason phrase for `status`.
    pub status_text: String,
    /// The headers returned by the server.
    pub headers: Headers,
    /// The raw response body.
    pub body: String,
}

impl HttpResponse {
    /// Indicates if the status code was in the 2xx range.
    pub fn success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes HTTP requests on behalf of a collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> ClientResult<HttpResponse>;
}

/// Tuning knobs for [`ReqwestTransport`].
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Per-request timeout. `None` leaves requests unbounded; callers cancel through
    /// `RequestParams::cancel` instead.
    pub timeout: Option<Duration>,
    /// Transient-failure retries. Zero (the default) disables the retry middleware.
    pub retries: u32,
    pub user_agent: Option<String>,
}

/// Production transport built on `reqwest` + `reqwest-middleware`.
pub struct ReqwestTransport {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
}

impl ReqwestTransport {
    /// Creates a transport with default options (no timeout, no retries).
    pub fn new() -> ClientResult<Self> {
        Self::with_options(TransportOptions::default())
    }

    pub fn with_options(options: TransportOptions) -> ClientResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(agent) = &options.user_agent {
            let mut defaults = HeaderMap::new();
            let value = HeaderValue::from_str(agent)
                .map_err(|e| ClientError::config(format!("Invalid user agent: {}", e)))?;
            defaults.insert(USER_AGENT, value);
            builder = builder.default_headers(defaults);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::config(format!("Failed to build HTTP client: {}", e)))?;

        let mut middleware = ClientBuilder::new(client);
        if options.retries > 0 {
            // Configure an exponential backoff policy for transient failures
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.retries);
            middleware = middleware.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self { inner: middleware.build() })
    }
}

/// Converts the ordered header map into a `reqwest` header map.
pub(crate) fn to_header_map(headers: &Headers) -> ClientResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let h_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::config(format!("Invalid header name '{}': {}", name, e)))?;
        let h_value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::config(format!("Invalid value for header '{}': {}", name, e)))?;
        map.insert(h_name, h_value);
    }
    Ok(map)
}

/// Converts a `reqwest` header map back into the ordered form, dropping non-UTF-8 values.
pub(crate) fn from_header_map(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        // 1. Build the request against the absolute URL
        let mut req = self
            .inner
            .request(request.method.clone(), request.url.as_str())
            .headers(to_header_map(&request.headers)?);

        // 2. Attach the serialized body if present
        if let Some(body) = request.body {
            req = req.body(body);
        }

        // 3. Execute and capture response metadata
        let response: reqwest::Response = req
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("{} {} failed: {}", request.method, request.url, e)))?;
        let status = response.status();
        let headers = from_header_map(response.headers());

        // 4. Read the body as text; the dispatch layer decides how to decode it
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(format!("Failed to read response body: {}", e)))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
