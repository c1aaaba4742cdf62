//! # Data Retrieval Module
//!
//! The network-facing half of the client: the HTTP transport seam and the
//! path-template resolver that every operation goes through before a request
//! is issued.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: The [`ky_http::HttpTransport`] trait and its `reqwest`-based
//!   implementation with optional retry middleware.
//! - **`uri_resolver`**: Template validation, placeholder substitution and search
//!   parameter encoding.

#![forbid(unsafe_code)]

/// Generic HTTP transport with optional retry middleware.
pub mod ky_http;
/// Path template resolution.
pub mod uri_resolver;

pub use ky_http::{Headers, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportOptions};
pub use uri_resolver::UriResolver;
