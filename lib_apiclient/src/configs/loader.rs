//! # Config File Loader
//!
//! Reads collection configurations from disk. Files ending in `.json5` are parsed
//! with the JSON5 grammar, everything else as strict JSON. A file may hold one
//! collection object or an array of them.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::configs::collection_config::ApiCollectionConfig;
use crate::errors::{ClientError, ClientResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum CollectionFile {
    Many(Vec<ApiCollectionConfig>),
    One(Box<ApiCollectionConfig>),
}

/// Loads every collection declared in `path`.
pub fn load_collections(path: &Path) -> ClientResult<Vec<ApiCollectionConfig>> {
    let content = fs::read_to_string(path).map_err(|e| {
        ClientError::config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let is_json5 = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json5"));

    let parsed: CollectionFile = if is_json5 {
        json5::from_str(&content).map_err(|e| {
            ClientError::config(format!("Invalid JSON5 in {}: {}", path.display(), e))
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| {
            ClientError::config(format!("Invalid JSON in {}: {}", path.display(), e))
        })?
    };

    let collections = match parsed {
        CollectionFile::Many(list) => list,
        CollectionFile::One(single) => vec![*single],
    };

    tracing::debug!(
        file = %path.display(),
        count = collections.len(),
        "Loaded collection configs"
    );
    Ok(collections)
}
