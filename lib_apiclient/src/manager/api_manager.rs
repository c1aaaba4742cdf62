//! # API Manager
//!
//! Registry of named collections with a default-collection fallback. Every verb
//! takes an address `"collection:operation"` or a bare `"operation"` routed to the
//! default collection. Addresses split on the first colon only, so operation names
//! may contain colons themselves.
//!
//! The manager is an ordinary value owned by the application and passed by
//! reference; there is no process-wide instance.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::collection::api_collection::ApiCollection;
use crate::collection::params::RequestParams;
use crate::collection::response::ApiResponse;
use crate::configs::collection_config::ApiCollectionConfig;
use crate::errors::{ClientError, ClientResult};
use crate::realtime::{MessageHandler, Unsubscribe};
use crate::retrieve::ky_http::{HttpTransport, ReqwestTransport};

/// A parsed `"collection:operation"` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiName {
    /// `None` routes to the default collection.
    pub collection: Option<String>,
    pub operation: String,
}

/// Splits an address on its first colon.
pub fn parse_api_name(address: &str) -> ApiName {
    match address.split_once(':') {
        Some((collection, operation)) => ApiName {
            collection: Some(collection.to_string()),
            operation: operation.to_string(),
        },
        None => ApiName {
            collection: None,
            operation: address.to_string(),
        },
    }
}

#[derive(Default)]
struct Registry {
    collections: HashMap<String, Arc<ApiCollection>>,
    default: Option<String>,
}

/// Named-collection registry and router.
pub struct ApiManager {
    registry: RwLock<Registry>,
    transport: Arc<dyn HttpTransport>,
}

impl ApiManager {
    /// Creates a manager whose collections share one `reqwest` transport.
    pub fn new() -> ClientResult<Self> {
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new()?)))
    }

    /// Creates a manager whose collections share `transport`.
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            transport,
        }
    }

    /// Builds and registers a collection. The first registered collection becomes
    /// the default.
    ///
    /// # Errors
    /// Returns a `ConfigurationError` for an empty or duplicate name.
    pub fn register(&self, config: ApiCollectionConfig) -> ClientResult<Arc<ApiCollection>> {
        let collection = ApiCollection::with_transport(config, Arc::clone(&self.transport));
        self.register_collection(collection)
    }

    /// Registers an already-built collection (e.g. one with a custom connection factory).
    pub fn register_collection(&self, collection: ApiCollection) -> ClientResult<Arc<ApiCollection>> {
        let name = collection.name().to_string();
        if name.trim().is_empty() {
            return Err(ClientError::config("Collection name must not be empty"));
        }
        if name.contains(':') {
            return Err(ClientError::config(format!(
                "Collection name '{}' must not contain ':'",
                name
            )));
        }

        let mut registry = self.registry.write().expect("Manager lock poisoned");
        if registry.collections.contains_key(&name) {
            return Err(ClientError::config(format!(
                "Collection '{}' is already registered",
                name
            )));
        }
        let collection = Arc::new(collection);
        registry.collections.insert(name.clone(), Arc::clone(&collection));
        if registry.default.is_none() {
            registry.default = Some(name.clone());
        }
        tracing::info!(collection = %name, base_url = %collection.base_url(), "Registered API collection");
        Ok(collection)
    }

    /// Makes `name` the collection bare operation names route to.
    pub fn set_default_collection(&self, name: &str) -> ClientResult<()> {
        let mut registry = self.registry.write().expect("Manager lock poisoned");
        if !registry.collections.contains_key(name) {
            return Err(ClientError::config(format!("Unknown collection '{}'", name)));
        }
        registry.default = Some(name.to_string());
        Ok(())
    }

    pub fn default_collection(&self) -> Option<String> {
        self.registry.read().expect("Manager lock poisoned").default.clone()
    }

    /// Returns the named collection, or the default one when `name` is `None`.
    ///
    /// # Errors
    /// Returns a `ConfigurationError` for an unknown name, or when no name is given
    /// and no default is set.
    pub fn get_collection(&self, name: Option<&str>) -> ClientResult<Arc<ApiCollection>> {
        let registry = self.registry.read().expect("Manager lock poisoned");
        let name = match name {
            Some(n) => n.to_string(),
            None => registry
                .default
                .clone()
                .ok_or_else(|| ClientError::config("No default collection configured"))?,
        };
        registry
            .collections
            .get(&name)
            .cloned()
            .ok_or_else(|| ClientError::config(format!("Unknown collection '{}'", name)))
    }

    /// Registered collection names, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        let registry = self.registry.read().expect("Manager lock poisoned");
        let mut names: Vec<String> = registry.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every collection and the default, disconnecting their sockets.
    pub fn clear(&self) {
        let drained: Vec<Arc<ApiCollection>> = {
            let mut registry = self.registry.write().expect("Manager lock poisoned");
            registry.default = None;
            registry.collections.drain().map(|(_, c)| c).collect()
        };
        for collection in &drained {
            collection.disconnect_all();
        }
        tracing::debug!(count = drained.len(), "Cleared API collections");
    }

    fn route(&self, address: &str) -> ClientResult<(Arc<ApiCollection>, String)> {
        let ApiName { collection, operation } = parse_api_name(address);
        let collection = self.get_collection(collection.as_deref())?;
        Ok((collection, operation))
    }

    pub async fn query(&self, address: &str, params: RequestParams) -> ClientResult<ApiResponse> {
        let (collection, operation) = self.route(address)?;
        collection.query(&operation, params).await
    }

    pub async fn query_item(&self, address: &str, item_id: &str, params: RequestParams) -> ClientResult<ApiResponse> {
        let (collection, operation) = self.route(address)?;
        collection.query_item(&operation, item_id, params).await
    }

    pub async fn query_meta(&self, address: &str, params: RequestParams) -> ClientResult<ApiResponse> {
        let (collection, operation) = self.route(address)?;
        collection.query_meta(&operation, params).await
    }

    pub async fn send(&self, address: &str, data: Option<Value>, params: RequestParams) -> ClientResult<ApiResponse> {
        let (collection, operation) = self.route(address)?;
        collection.send(&operation, data, params).await
    }

    pub async fn request(&self, address: &str, data: Option<Value>, params: RequestParams) -> ClientResult<ApiResponse> {
        let (collection, operation) = self.route(address)?;
        collection.request(&operation, data, params).await
    }

    /// `address` names the socket; `channel` the logical channel on it.
    pub async fn subscribe(&self, address: &str, channel: &str, handler: MessageHandler) -> ClientResult<Unsubscribe> {
        let (collection, socket) = self.route(address)?;
        collection.subscribe(&socket, channel, handler).await
    }

    pub async fn publish(&self, address: &str, channel: &str, message: Value) -> ClientResult<()> {
        let (collection, socket) = self.route(address)?;
        collection.publish(&socket, channel, message).await
    }
}
