//! # Configuration Modules
//!
//! This module aggregates the declarative collection configuration, the hook types
//! that customize each dispatch stage, and (behind `config-files`) the on-disk loader.

/// Collection and operation configuration structures.
pub mod collection_config;

/// Static-or-computed hook types for headers, bodies, responses and URIs.
pub mod hooks;

/// Loads collection configurations from JSON / JSON5 files.
#[cfg(feature = "config-files")]
pub mod loader;

pub use collection_config::*;
pub use hooks::{DataHook, HeadersHook, ResponseHook, UriHook};
