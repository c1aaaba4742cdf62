//! # Manager Module
//!
//! Named-collection registry and `"collection:operation"` router.

#![forbid(unsafe_code)]

pub mod api_manager;

pub use api_manager::{parse_api_name, ApiManager, ApiName};
