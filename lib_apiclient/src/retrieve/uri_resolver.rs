//! # URI Resolver
//!
//! Turns a path template such as `/posts/{postId}/comments` plus path and search
//! parameters into a concrete URL. Templates are validated strictly: absolute URLs
//! belong in the collection's `baseUrl` and query strings in the `search`
//! parameter, never in the template itself. Every `{placeholder}` must be satisfied.

use std::collections::BTreeMap;

use url::form_urlencoded;

use crate::configs::hooks::UriHook;
use crate::collection::params::RequestParams;
use crate::errors::{ClientError, ClientResult};

/// Resolves templates against an optional base URL.
#[derive(Debug, Clone, Default)]
pub struct UriResolver {
    base_url: String,
}

impl UriResolver {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.unwrap_or_default().trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves `path` into `baseUrl + path?search`.
    ///
    /// # Errors
    /// Returns a `ConfigurationError` when the template embeds `://` or `?`, or when a
    /// placeholder has no value in `params.path`.
    pub fn resolve(
        &self,
        path: &str,
        processor: Option<&UriHook>,
        params: &RequestParams,
    ) -> ClientResult<String> {
        let resolved = resolve_path(path, processor, params)?;
        Ok(format!("{}{}", self.base_url, resolved))
    }
}

/// Resolves a template into a path plus optional query string, without a base URL.
pub fn resolve_path(
    path: &str,
    processor: Option<&UriHook>,
    params: &RequestParams,
) -> ClientResult<String> {
    // 1. Absolute URLs are never allowed inside a template
    if path.contains("://") {
        return Err(ClientError::config(format!(
            "Path '{}' must not contain an absolute URL; use baseUrl instead",
            path
        )));
    }

    // 2. Let the processor rewrite the template first
    let processed = match processor {
        Some(hook) => hook.apply(path, params),
        None => path.to_string(),
    };

    // 3. Query strings go through the search parameter
    if processed.contains('?') {
        return Err(ClientError::config(format!(
            "Path '{}' must not contain a query string; pass search parameters instead",
            processed
        )));
    }

    // 4. Substitute placeholders, then normalize
    let substituted = substitute_placeholders(&processed, &params.path)?;
    let mut url = collapse_slashes(substituted.trim());

    // 5. Append the encoded search parameters
    if !params.search.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.search.iter())
            .finish();
        url.push('?');
        url.push_str(&query);
    }

    Ok(url)
}

/// Replaces every `{name}` with the percent-encoded `values[name]`. A missing value is an error.
pub fn substitute_placeholders(template: &str, values: &BTreeMap<String, String>) -> ClientResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            ClientError::config(format!("Unterminated placeholder in path '{}'", template))
        })?;
        let name = &after[..close];
        match values.get(name) {
            Some(value) => out.push_str(&encode_segment(value)),
            None => {
                return Err(ClientError::config(format!(
                    "Missing path parameter '{}' for path '{}'",
                    name, template
                )))
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Percent-encodes one path segment, so `/` and `?` in a value stay inside it.
fn encode_segment(value: &str) -> String {
    // `byte_serialize` writes a space as `+` and a literal `+` as `%2B`
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Collapses runs of `/` into a single slash.
pub fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if !previous_slash {
                out.push(ch);
            }
            previous_slash = true;
        } else {
            out.push(ch);
            previous_slash = false;
        }
    }
    out
}
