//! # Logging Setup
//!
//! Installs the global `tracing` subscriber used by the binaries. The library itself
//! only emits events; applications embedding it may install their own subscriber
//! instead.

use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, EnvFilter};

use crate::errors::{ClientError, ClientResult};

/// Initializes console logging.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, events are written as
/// one JSON object per line.
///
/// # Errors
/// Returns a `ConfigurationError` when the level is not a valid filter or a global
/// subscriber is already installed.
pub fn init_tracing(level: &str, json: bool) -> ClientResult<()> {
    // Create environment filter from log level
    let env_filter: EnvFilter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ClientError::config(format!("Invalid log level '{}': {}", level, e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry.with(fmt::layer().json().with_target(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|e| ClientError::config(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::debug!(level, json, "Logging initialized");
    Ok(())
}
