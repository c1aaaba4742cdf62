//! Per-call parameters shared by every verb.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::retrieve::ky_http::Headers;

/// Path values, search parameters, extra headers, cache control and cancellation
/// for one call.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    /// Values for `{placeholder}`s in the path template.
    pub path: BTreeMap<String, String>,
    /// Query-string pairs, appended in order.
    pub search: Vec<(String, String)>,
    /// Caller headers; override every other header stage.
    pub headers: Headers,
    /// Read/write the response cache. `None` picks the verb's default.
    pub cache: Option<bool>,
    /// Cancels the in-flight request when triggered.
    pub cancel: Option<CancellationToken>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path.insert(name.into(), value.to_string());
        self
    }

    pub fn with_search(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.search.push((name.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
