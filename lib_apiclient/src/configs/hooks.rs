//! # Function-or-Value Hooks
//!
//! Collection and operation configs accept hooks that are either a static value or
//! a transform computed per call. The dispatch pipeline evaluates both shapes the
//! same way, so callers never type-check at runtime.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::collection::params::RequestParams;
use crate::collection::response::ApiResponse;
use crate::errors::ClientResult;
use crate::retrieve::ky_http::Headers;

type HeadersFn = dyn Fn(&RequestParams) -> ClientResult<Headers> + Send + Sync;
type DataFn = dyn Fn(Value, &RequestParams) -> ClientResult<Value> + Send + Sync;
type ResponseFn = dyn Fn(ApiResponse) -> ClientResult<ApiResponse> + Send + Sync;
type UriFn = dyn Fn(&str, &RequestParams) -> String + Send + Sync;

/// Produces request headers. Stages are chained global → operation → caller,
/// later stages overriding earlier keys.
#[derive(Clone)]
pub enum HeadersHook {
    Static(Headers),
    Computed(Arc<HeadersFn>),
}

impl HeadersHook {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&RequestParams) -> ClientResult<Headers> + Send + Sync + 'static,
    {
        HeadersHook::Computed(Arc::new(f))
    }

    pub fn evaluate(&self, params: &RequestParams) -> ClientResult<Headers> {
        match self {
            HeadersHook::Static(headers) => Ok(headers.clone()),
            HeadersHook::Computed(f) => f(params),
        }
    }
}

impl fmt::Debug for HeadersHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadersHook::Static(h) => f.debug_tuple("Static").field(h).finish(),
            HeadersHook::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

impl<'de> Deserialize<'de> for HeadersHook {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Headers::deserialize(deserializer).map(HeadersHook::Static)
    }
}

/// Produces or transforms the request body.
///
/// A static object is merged on top of the incoming body; any other static value
/// replaces it. A computed hook receives the body produced by earlier stages.
#[derive(Clone)]
pub enum DataHook {
    Static(Value),
    Computed(Arc<DataFn>),
}

impl DataHook {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(Value, &RequestParams) -> ClientResult<Value> + Send + Sync + 'static,
    {
        DataHook::Computed(Arc::new(f))
    }

    pub fn apply(&self, data: Value, params: &RequestParams) -> ClientResult<Value> {
        match self {
            DataHook::Static(Value::Object(overrides)) => match data {
                Value::Object(mut base) => {
                    for (k, v) in overrides {
                        base.insert(k.clone(), v.clone());
                    }
                    Ok(Value::Object(base))
                }
                _ => Ok(Value::Object(overrides.clone())),
            },
            DataHook::Static(value) => Ok(value.clone()),
            DataHook::Computed(f) => f(data, params),
        }
    }
}

impl fmt::Debug for DataHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataHook::Static(v) => f.debug_tuple("Static").field(v).finish(),
            DataHook::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

impl<'de> Deserialize<'de> for DataHook {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(DataHook::Static)
    }
}

/// Post-processes a response. Response hooks only come in the computed form.
#[derive(Clone)]
pub struct ResponseHook(Arc<ResponseFn>);

impl ResponseHook {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ApiResponse) -> ClientResult<ApiResponse> + Send + Sync + 'static,
    {
        ResponseHook(Arc::new(f))
    }

    pub fn apply(&self, response: ApiResponse) -> ClientResult<ApiResponse> {
        (self.0)(response)
    }
}

impl fmt::Debug for ResponseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseHook(<fn>)")
    }
}

/// Rewrites a path template before placeholder substitution
/// (e.g. a request whose URI depends on its parameters).
#[derive(Clone)]
pub enum UriHook {
    Static(String),
    Computed(Arc<UriFn>),
}

impl UriHook {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&str, &RequestParams) -> String + Send + Sync + 'static,
    {
        UriHook::Computed(Arc::new(f))
    }

    pub fn apply(&self, path: &str, params: &RequestParams) -> String {
        match self {
            UriHook::Static(uri) => uri.clone(),
            UriHook::Computed(f) => f(path, params),
        }
    }
}

impl fmt::Debug for UriHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UriHook::Static(s) => f.debug_tuple("Static").field(s).finish(),
            UriHook::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

impl<'de> Deserialize<'de> for UriHook {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(UriHook::Static)
    }
}
