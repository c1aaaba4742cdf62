//! # Client Error Taxonomy
//!
//! Every failure surfaced by this crate is one of three kinds:
//!
//! - **`ConfigurationError`**: a setup bug (unknown operation, duplicate collection,
//!   unresolved path parameter, malformed template). Never retried.
//! - **`ApiError`**: a runtime failure (non-2xx status, transport exception, a
//!   real-time publish against a closed connection). Tagged with the
//!   `"collection:operation"` address that produced it.
//! - **`ValidationError`**: raised by user-supplied data/response hooks that reject
//!   a payload, or when a response cannot be decoded into the requested type.

use std::collections::BTreeMap;
use thiserror::Error;

/// Static/programmer errors in collection or operation setup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Configuration error: {message}")]
pub struct ConfigurationError {
    /// Human-readable description of the misconfiguration.
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Runtime / network failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("API call `{operation}` failed: {message}")]
pub struct ApiError {
    /// The `"collection:operation"` address of the failing call.
    pub operation: String,
    /// HTTP status code, when the server answered.
    pub status: Option<u16>,
    /// HTTP reason phrase, when the server answered.
    pub status_text: Option<String>,
    pub message: String,
    /// Raw response body of a failed request, kept for diagnostics.
    pub body: Option<String>,
}

impl ApiError {
    /// An error raised below the dispatch layer, before the operation is known.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            operation: String::new(),
            status: None,
            status_text: None,
            message: message.into(),
            body: None,
        }
    }

    pub fn http_status(status: u16, status_text: impl Into<String>, body: Option<String>) -> Self {
        let status_text = status_text.into();
        Self {
            operation: String::new(),
            status: Some(status),
            message: format!("HTTP {} {}", status, status_text),
            status_text: Some(status_text),
            body,
        }
    }

    /// Tags the error with the originating operation address.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }
}

/// Payload rejected by a processing hook.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Validation error: {message}")]
pub struct ValidationError {
    pub message: String,
    /// Field-level feedback, keyed by field name.
    pub fields: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, problem: impl Into<String>) -> Self {
        self.fields.insert(field.into(), problem.into());
        self
    }
}

/// Errors that can occur anywhere in the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ClientError {
    /// Shorthand for a `ConfigurationError`.
    pub fn config(message: impl Into<String>) -> Self {
        ClientError::Configuration(ConfigurationError::new(message))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ClientError::Configuration(_))
    }

    pub fn is_api(&self) -> bool {
        matches!(self, ClientError::Api(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }

    /// Re-tags API errors with the operation address; other kinds pass through.
    pub fn for_operation(self, operation: &str) -> Self {
        match self {
            ClientError::Api(err) => ClientError::Api(err.with_operation(operation)),
            other => other,
        }
    }
}

/// Result alias used across the crate.
pub type ClientResult<T> = Result<T, ClientError>;
