//! # Operation Tables and Convention-Based Synthesis
//!
//! Each collection keeps one [`OperationTable`] per operation kind. Entries are
//! resolved from their string-or-object form when the collection is built; dynamic
//! collections additionally synthesize a config the first time an unknown name is
//! looked up and memoize it, so synthesis happens at most once per name.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use crate::configs::collection_config::{
    CommandConfig, ConfigEntry, FromPath, QueryConfig, RequestConfig, SocketConfig, TransportKind,
};
use crate::errors::{ClientError, ClientResult, ConfigurationError};

/// The four operation maps of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigType {
    Command,
    Query,
    Socket,
    Request,
}

impl ConfigType {
    /// Key of the operation map in a collection config.
    pub fn map_name(&self) -> &'static str {
        match self {
            ConfigType::Command => "commands",
            ConfigType::Query => "queries",
            ConfigType::Socket => "sockets",
            ConfigType::Request => "requests",
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.map_name())
    }
}

impl FromStr for ConfigType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "command" | "commands" => Ok(ConfigType::Command),
            "query" | "queries" => Ok(ConfigType::Query),
            "socket" | "sockets" => Ok(ConfigType::Socket),
            "request" | "requests" => Ok(ConfigType::Request),
            other => Err(ConfigurationError::new(format!("Unknown config type '{}'", other)).into()),
        }
    }
}

/// Operation configs that can be derived from naming conventions.
pub trait Synthesize: Sized {
    const CONFIG_TYPE: ConfigType;

    fn synthesize(collection: &str, name: &str) -> Self;
}

impl Synthesize for QueryConfig {
    const CONFIG_TYPE: ConfigType = ConfigType::Query;

    fn synthesize(collection: &str, name: &str) -> Self {
        let path = format!("/{}.{}/", collection, name);
        QueryConfig {
            meta: Some(format!("/_meta{}", path)),
            item: Some(format!("{}{{_id}}", path)),
            path,
            ..Default::default()
        }
    }
}

impl Synthesize for CommandConfig {
    const CONFIG_TYPE: ConfigType = ConfigType::Command;

    fn synthesize(collection: &str, name: &str) -> Self {
        CommandConfig::from_path(format!("/{}:{}/{{resource}}/{{_id}}", collection, name))
    }
}

impl Synthesize for SocketConfig {
    const CONFIG_TYPE: ConfigType = ConfigType::Socket;

    fn synthesize(collection: &str, name: &str) -> Self {
        SocketConfig::new(format!("/{}:{}/", collection, name), TransportKind::Websocket)
    }
}

impl Synthesize for RequestConfig {
    const CONFIG_TYPE: ConfigType = ConfigType::Request;

    fn synthesize(collection: &str, name: &str) -> Self {
        RequestConfig::new(format!("/{}:{}", collection, name), "GET")
    }
}

/// Name → resolved config, with memoized synthesis for dynamic collections.
pub struct OperationTable<T> {
    collection: String,
    dynamic: bool,
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: FromPath + Synthesize> OperationTable<T> {
    /// Resolves every declared entry into its canonical struct.
    pub fn new(collection: &str, dynamic: bool, declared: BTreeMap<String, ConfigEntry<T>>) -> Self {
        let entries = declared
            .into_iter()
            .map(|(name, entry)| (name, Arc::new(entry.resolve())))
            .collect();
        Self {
            collection: collection.to_string(),
            dynamic,
            entries: RwLock::new(entries),
        }
    }

    /// Looks up `name`, synthesizing and memoizing a config when the collection is dynamic.
    ///
    /// # Errors
    /// Returns a `ConfigurationError` for unknown names on static collections.
    pub fn get(&self, name: &str) -> ClientResult<Arc<T>> {
        if let Some(found) = self.entries.read().expect("Operation table lock poisoned").get(name) {
            return Ok(Arc::clone(found));
        }
        if !self.dynamic {
            return Err(ConfigurationError::new(format!(
                "No {} configuration named '{}' in collection '{}'",
                T::CONFIG_TYPE,
                name,
                self.collection
            ))
            .into());
        }

        let mut entries = self.entries.write().expect("Operation table lock poisoned");
        let config = entries.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(
                collection = %self.collection,
                config_type = %T::CONFIG_TYPE,
                operation = name,
                "Synthesized dynamic configuration"
            );
            Arc::new(T::synthesize(&self.collection, name))
        });
        Ok(Arc::clone(config))
    }

    /// Names currently known, declared or synthesized.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .expect("Operation table lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
