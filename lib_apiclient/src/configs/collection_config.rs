//! # Collection Configuration
//!
//! Declarative description of one named API: its base URL, global hooks, and the
//! four operation maps (`commands`, `queries`, `sockets`, `requests`). Entries may be
//! written as a bare path string or as a full object; both deserialize into
//! [`ConfigEntry`] and are resolved to canonical structs when the collection is
//! registered.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::configs::hooks::{DataHook, HeadersHook, ResponseHook, UriHook};
use crate::retrieve::ky_http::Headers;

/// Default number of reconnect attempts before a real-time connection gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Base delay for the exponential reconnect backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// An operation entry: either a bare path or a full config object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigEntry<T> {
    Path(String),
    Full(T),
}

impl<T: FromPath> ConfigEntry<T> {
    /// Normalizes the entry into its canonical struct.
    pub fn resolve(self) -> T {
        match self {
            ConfigEntry::Path(path) => T::from_path(path),
            ConfigEntry::Full(config) => config,
        }
    }
}

impl<T> From<&str> for ConfigEntry<T> {
    fn from(path: &str) -> Self {
        ConfigEntry::Path(path.to_string())
    }
}

impl<T> From<String> for ConfigEntry<T> {
    fn from(path: String) -> Self {
        ConfigEntry::Path(path)
    }
}

/// Builds an operation config from nothing but its path.
pub trait FromPath {
    fn from_path(path: String) -> Self;
}

/// POST-style mutation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfig {
    pub path: String,
    #[serde(default)]
    pub uri: Option<UriHook>,
    #[serde(default)]
    pub headers: Option<HeadersHook>,
    #[serde(default)]
    pub data: Option<DataHook>,
    #[serde(skip)]
    pub response: Option<ResponseHook>,
}

impl FromPath for CommandConfig {
    fn from_path(path: String) -> Self {
        Self { path, ..Default::default() }
    }
}

impl From<CommandConfig> for ConfigEntry<CommandConfig> {
    fn from(config: CommandConfig) -> Self {
        ConfigEntry::Full(config)
    }
}

/// GET with derived metadata (`meta`) and single-item (`item`) paths.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    pub path: String,
    #[serde(default)]
    pub meta: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub headers: Option<HeadersHook>,
    #[serde(skip)]
    pub response: Option<ResponseHook>,
    #[serde(skip)]
    pub item_response: Option<ResponseHook>,
}

impl QueryConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self::from_path(path.into())
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }

    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    /// Metadata path, `/_meta/<path>` unless overridden.
    pub fn meta_path(&self) -> String {
        self.meta
            .clone()
            .unwrap_or_else(|| format!("/_meta/{}", self.path))
    }

    /// Single-item path, `<path>/{_id}` unless overridden.
    pub fn item_path(&self) -> String {
        self.item
            .clone()
            .unwrap_or_else(|| format!("{}/{{_id}}", self.path))
    }
}

impl FromPath for QueryConfig {
    fn from_path(path: String) -> Self {
        Self { path, ..Default::default() }
    }
}

impl From<QueryConfig> for ConfigEntry<QueryConfig> {
    fn from(config: QueryConfig) -> Self {
        ConfigEntry::Full(config)
    }
}

/// Real-time transport selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
    Sse,
}

/// Real-time channel group served over one physical connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketConfig {
    pub path: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Handshake headers sent when the connection is opened.
    #[serde(default)]
    pub header: Option<Headers>,
    /// Replays subscribe frames for every active channel after a reconnect.
    #[serde(default = "default_true")]
    pub resubscribe_on_reconnect: bool,
    #[serde(default = "default_max_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub reconnect_base_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_base_delay() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

impl SocketConfig {
    pub fn new(path: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            path: path.into(),
            transport,
            header: None,
            resubscribe_on_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
        }
    }
}

impl FromPath for SocketConfig {
    fn from_path(path: String) -> Self {
        Self::new(path, TransportKind::Websocket)
    }
}

impl From<SocketConfig> for ConfigEntry<SocketConfig> {
    fn from(config: SocketConfig) -> Self {
        ConfigEntry::Full(config)
    }
}

/// Arbitrary HTTP verb.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub uri: Option<UriHook>,
    #[serde(default)]
    pub headers: Option<HeadersHook>,
    #[serde(default)]
    pub data: Option<DataHook>,
    #[serde(skip)]
    pub response: Option<ResponseHook>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestConfig {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            uri: None,
            headers: None,
            data: None,
            response: None,
        }
    }
}

impl FromPath for RequestConfig {
    fn from_path(path: String) -> Self {
        Self::new(path, default_method())
    }
}

impl From<RequestConfig> for ConfigEntry<RequestConfig> {
    fn from(config: RequestConfig) -> Self {
        ConfigEntry::Full(config)
    }
}

/// Full description of one named API collection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCollectionConfig {
    /// Unique name within an [`crate::manager::ApiManager`].
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Synthesizes missing operation configs from naming conventions.
    #[serde(default)]
    pub dynamic: bool,
    /// Logs every dispatched call at INFO instead of DEBUG.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub process_headers: Option<HeadersHook>,
    #[serde(skip)]
    pub process_data: Option<DataHook>,
    #[serde(skip)]
    pub process_response: Option<ResponseHook>,
    #[serde(default)]
    pub commands: BTreeMap<String, ConfigEntry<CommandConfig>>,
    #[serde(default)]
    pub queries: BTreeMap<String, ConfigEntry<QueryConfig>>,
    #[serde(default)]
    pub sockets: BTreeMap<String, ConfigEntry<SocketConfig>>,
    #[serde(default)]
    pub requests: BTreeMap<String, ConfigEntry<RequestConfig>>,
}

impl ApiCollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_process_headers(mut self, hook: HeadersHook) -> Self {
        self.process_headers = Some(hook);
        self
    }

    pub fn with_process_data(mut self, hook: DataHook) -> Self {
        self.process_data = Some(hook);
        self
    }

    pub fn with_process_response(mut self, hook: ResponseHook) -> Self {
        self.process_response = Some(hook);
        self
    }

    pub fn with_command(mut self, name: &str, entry: impl Into<ConfigEntry<CommandConfig>>) -> Self {
        self.commands.insert(name.to_string(), entry.into());
        self
    }

    pub fn with_query(mut self, name: &str, entry: impl Into<ConfigEntry<QueryConfig>>) -> Self {
        self.queries.insert(name.to_string(), entry.into());
        self
    }

    pub fn with_socket(mut self, name: &str, entry: impl Into<ConfigEntry<SocketConfig>>) -> Self {
        self.sockets.insert(name.to_string(), entry.into());
        self
    }

    pub fn with_request(mut self, name: &str, entry: impl Into<ConfigEntry<RequestConfig>>) -> Self {
        self.requests.insert(name.to_string(), entry.into());
        self
    }
}
