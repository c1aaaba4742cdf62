//! # API Response Envelope
//!
//! The contract every verb returns: decoded data plus transaction metadata.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{ClientResult, ValidationError};
use crate::retrieve::ky_http::{Headers, HttpResponse};

/// A standardized container for API responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T = Value> {
    pub data: T,
    /// Metadata lifted out of a `{data, meta}` / `{data, pagination}` envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
    /// `Some(true)` when served from the response cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, status: u16, status_text: impl Into<String>, headers: Headers) -> Self {
        Self {
            data,
            meta: None,
            status,
            status_text: status_text.into(),
            headers,
            timestamp: Utc::now(),
            cache: None,
        }
    }

    /// Replaces the data, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            data: f(self.data),
            meta: self.meta,
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            timestamp: self.timestamp,
            cache: self.cache,
        }
    }
}

impl ApiResponse<Value> {
    /// Wraps a raw HTTP response. JSON bodies are decoded, an empty body becomes
    /// `null`, and anything else is kept as a JSON string.
    pub fn from_http(raw: HttpResponse) -> Self {
        let data = decode_body(&raw.body);
        Self::new(data, raw.status, raw.status_text, raw.headers)
    }

    /// Lifts nested `data` out of a `{data, meta | pagination}` envelope.
    pub fn unwrap_envelope(mut self) -> Self {
        if let Value::Object(map) = &mut self.data {
            if let Some(inner) = map.remove("data") {
                let meta = map.remove("meta").or_else(|| map.remove("pagination"));
                if meta.is_some() {
                    self.meta = meta;
                }
                self.data = inner;
            }
        }
        self
    }

    /// Deserializes the data into `U`.
    ///
    /// # Errors
    /// Returns a `ValidationError` when the payload does not match `U`.
    pub fn into_typed<U: DeserializeOwned>(self) -> ClientResult<ApiResponse<U>> {
        let data: U = serde_json::from_value(self.data.clone()).map_err(|e| {
            ValidationError::new(format!("Response does not match the expected shape: {}", e))
        })?;
        Ok(self.map(|_| data))
    }
}

fn decode_body(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn raw(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            status_text: "OK".into(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    #[test]
    fn decodes_json_empty_and_text_bodies() {
        assert_eq!(ApiResponse::from_http(raw(r#"{"a":1}"#)).data, json!({"a": 1}));
        assert_eq!(ApiResponse::from_http(raw("")).data, Value::Null);
        assert_eq!(ApiResponse::from_http(raw("pong")).data, json!("pong"));
    }

    #[test]
    fn envelope_unwrapping_prefers_meta_then_pagination() {
        let res = ApiResponse::from_http(raw(r#"{"data":[1,2],"meta":{"total":2}}"#)).unwrap_envelope();
        assert_eq!(res.data, json!([1, 2]));
        assert_eq!(res.meta, Some(json!({"total": 2})));

        let res = ApiResponse::from_http(raw(r#"{"data":[1],"pagination":{"page":1}}"#)).unwrap_envelope();
        assert_eq!(res.meta, Some(json!({"page": 1})));

        let res = ApiResponse::from_http(raw(r#"{"items":[1]}"#)).unwrap_envelope();
        assert_eq!(res.data, json!({"items": [1]}));
        assert!(res.meta.is_none());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Post {
        id: u32,
        title: String,
    }

    #[test]
    fn typed_conversion_reports_shape_mismatch_as_validation() {
        let ok = ApiResponse::from_http(raw(r#"{"id":1,"title":"hi"}"#))
            .into_typed::<Post>()
            .unwrap();
        assert_eq!(ok.data, Post { id: 1, title: "hi".into() });

        let err = ApiResponse::from_http(raw(r#"{"id":"x"}"#))
            .into_typed::<Post>()
            .unwrap_err();
        assert!(err.is_validation());
    }
}
