//! # API Collection
//!
//! The per-named-API façade. Every HTTP verb runs the same pipeline:
//!
//! 1. look up the operation config (synthesizing it for dynamic collections);
//! 2. resolve the URL from `baseUrl` + the path template;
//! 3. chain headers `processHeaders → operation headers → caller headers`;
//! 4. chain the body `caller data → processData → operation data`;
//! 5. serve from / write to the response cache when enabled;
//! 6. execute through the [`HttpTransport`];
//! 7. run `processResponse → operation response hook` (or unwrap the default query
//!    envelope when the operation has no hook of its own).
//!
//! Transport and HTTP-status failures come back as `ApiError` tagged with the
//! `"collection:operation"` address; configuration and validation errors pass
//! through untouched.
//!
//! Real-time sockets get exactly one connection per socket name, created lazily on
//! the first `subscribe`/`publish` and reused afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::response_cache::{generate_cache_key, CacheStats, EvictionPolicy, ResponseCache};
use crate::collection::dynamic::{ConfigType, OperationTable};
use crate::collection::params::RequestParams;
use crate::collection::response::ApiResponse;
use crate::configs::collection_config::{
    ApiCollectionConfig, CommandConfig, QueryConfig, RequestConfig, SocketConfig, TransportKind,
};
use crate::configs::hooks::{DataHook, HeadersHook, ResponseHook, UriHook};
use crate::errors::{ApiError, ClientError, ClientResult, ValidationError};
use crate::realtime::{
    ConnectionState, DefaultRtcConnectionFactory, MessageHandler, ReconnectPolicy, RtcConnection,
    RtcConnectionFactory, RtcOptions, Unsubscribe,
};
use crate::retrieve::ky_http::{merge_headers, Headers, HttpRequest, HttpTransport, ReqwestTransport};
use crate::retrieve::uri_resolver::UriResolver;

const CONTENT_TYPE: &str = "content-type";
const APPLICATION_JSON: &str = "application/json";

/// One resolved HTTP call, ready for the pipeline.
struct Call<'a> {
    operation: &'a str,
    method: Method,
    path: String,
    uri: Option<&'a UriHook>,
    headers: Option<&'a HeadersHook>,
    /// Adds `content-type: application/json`.
    json: bool,
    body: Option<Value>,
    response: Option<&'a ResponseHook>,
    unwrap_envelope: bool,
    cache: bool,
}

/// A named group of operations sharing a base URL and hooks.
pub struct ApiCollection {
    config: ApiCollectionConfig,
    resolver: UriResolver,
    commands: OperationTable<CommandConfig>,
    queries: OperationTable<QueryConfig>,
    sockets: OperationTable<SocketConfig>,
    requests: OperationTable<RequestConfig>,
    transport: Arc<dyn HttpTransport>,
    rtc_factory: Arc<dyn RtcConnectionFactory>,
    connections: Mutex<HashMap<String, Arc<dyn RtcConnection>>>,
    cache: ResponseCache,
}

impl ApiCollection {
    /// Builds a collection over a fresh `reqwest` transport.
    pub fn new(config: ApiCollectionConfig) -> ClientResult<Self> {
        Ok(Self::with_transport(config, Arc::new(ReqwestTransport::new()?)))
    }

    /// Builds a collection over the given transport. Operation entries are resolved here.
    pub fn with_transport(mut config: ApiCollectionConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let name = config.name.clone();
        let dynamic = config.dynamic;
        Self {
            resolver: UriResolver::new(config.base_url.as_deref()),
            commands: OperationTable::new(&name, dynamic, std::mem::take(&mut config.commands)),
            queries: OperationTable::new(&name, dynamic, std::mem::take(&mut config.queries)),
            sockets: OperationTable::new(&name, dynamic, std::mem::take(&mut config.sockets)),
            requests: OperationTable::new(&name, dynamic, std::mem::take(&mut config.requests)),
            config,
            transport,
            rtc_factory: Arc::new(DefaultRtcConnectionFactory),
            connections: Mutex::new(HashMap::new()),
            cache: ResponseCache::new(),
        }
    }

    /// Replaces the factory used to open real-time connections.
    pub fn with_rtc_factory(mut self, factory: Arc<dyn RtcConnectionFactory>) -> Self {
        self.rtc_factory = factory;
        self
    }

    /// Replaces the unbounded response cache with one using `policy`.
    pub fn with_cache_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.cache = ResponseCache::with_policy(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Collection-level settings. Operation maps are held in resolved form and are
    /// exposed through [`ApiCollection::operation_names`].
    pub fn config(&self) -> &ApiCollectionConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        self.resolver.base_url()
    }

    /// Known operation names of one kind, including synthesized ones.
    pub fn operation_names(&self, kind: ConfigType) -> Vec<String> {
        match kind {
            ConfigType::Command => self.commands.names(),
            ConfigType::Query => self.queries.names(),
            ConfigType::Socket => self.sockets.names(),
            ConfigType::Request => self.requests.names(),
        }
    }

    fn address(&self, operation: &str) -> String {
        format!("{}:{}", self.config.name, operation)
    }

    // ---- HTTP verbs ------------------------------------------------------

    /// Executes a command: always POST with a JSON body.
    pub async fn send(&self, name: &str, data: Option<Value>, params: RequestParams) -> ClientResult<ApiResponse> {
        let config = self.commands.get(name)?;
        let body = self.resolve_data(data, config.data.as_ref(), &params)?;
        let call = Call {
            operation: name,
            method: Method::POST,
            path: config.path.clone(),
            uri: config.uri.as_ref(),
            headers: config.headers.as_ref(),
            json: true,
            body: (!body.is_null()).then_some(body),
            response: config.response.as_ref(),
            unwrap_envelope: false,
            cache: false,
        };
        self.execute(call, &params).await
    }

    /// GET against the query path. The cache is off unless `params.cache` is set.
    pub async fn query(&self, name: &str, params: RequestParams) -> ClientResult<ApiResponse> {
        let config = self.queries.get(name)?;
        let call = Call {
            operation: name,
            method: Method::GET,
            path: config.path.clone(),
            uri: None,
            headers: config.headers.as_ref(),
            json: false,
            body: None,
            response: config.response.as_ref(),
            unwrap_envelope: true,
            cache: params.cache.unwrap_or(false),
        };
        self.execute(call, &params).await
    }

    /// [`ApiCollection::query`] with the data decoded into `T`.
    pub async fn query_as<T: DeserializeOwned>(&self, name: &str, params: RequestParams) -> ClientResult<ApiResponse<T>> {
        self.query(name, params).await?.into_typed()
    }

    /// GET against the item path with `{_id}` bound to `item_id`.
    pub async fn query_item(&self, name: &str, item_id: &str, params: RequestParams) -> ClientResult<ApiResponse> {
        let config = self.queries.get(name)?;
        let params = params.with_path_param("_id", item_id);
        let call = Call {
            operation: name,
            method: Method::GET,
            path: config.item_path(),
            uri: None,
            headers: config.headers.as_ref(),
            json: false,
            body: None,
            response: config.item_response.as_ref().or(config.response.as_ref()),
            unwrap_envelope: true,
            cache: params.cache.unwrap_or(false),
        };
        self.execute(call, &params).await
    }

    /// GET against the metadata path. The cache is on unless `params.cache` is `Some(false)`.
    pub async fn query_meta(&self, name: &str, params: RequestParams) -> ClientResult<ApiResponse> {
        let config = self.queries.get(name)?;
        let call = Call {
            operation: name,
            method: Method::GET,
            path: config.meta_path(),
            uri: None,
            headers: config.headers.as_ref(),
            json: false,
            body: None,
            response: None,
            unwrap_envelope: false,
            cache: params.cache.unwrap_or(true),
        };
        self.execute(call, &params).await
    }

    /// Executes a request with its configured method. A body is attached only for
    /// POST/PUT/PATCH and only when the resolved data is non-empty.
    pub async fn request(&self, name: &str, data: Option<Value>, params: RequestParams) -> ClientResult<ApiResponse> {
        let config = self.requests.get(name)?;
        let method = parse_method(&config.method)?;
        let takes_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
        let body = if takes_body {
            Some(self.resolve_data(data, config.data.as_ref(), &params)?).filter(|v| !is_empty(v))
        } else {
            None
        };
        let call = Call {
            operation: name,
            method,
            path: config.path.clone(),
            uri: config.uri.as_ref(),
            headers: config.headers.as_ref(),
            json: body.is_some(),
            body,
            response: config.response.as_ref(),
            unwrap_envelope: false,
            cache: false,
        };
        self.execute(call, &params).await
    }

    // ---- Pipeline --------------------------------------------------------

    async fn execute(&self, call: Call<'_>, params: &RequestParams) -> ClientResult<ApiResponse> {
        let address = self.address(call.operation);
        self.run(call, params, &address)
            .await
            .map_err(|e| e.for_operation(&address))
    }

    async fn run(&self, call: Call<'_>, params: &RequestParams, address: &str) -> ClientResult<ApiResponse> {
        // 1. Resolve the URL
        let url = self.resolver.resolve(&call.path, call.uri, params)?;

        // 2. Chain the headers
        let mut headers = Headers::new();
        if call.json {
            headers.insert(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string());
        }
        merge_headers(&mut headers, self.resolve_headers(call.headers, params)?);

        // 3. Serve from the cache
        let cache_key = call.cache.then(|| generate_cache_key(&url, &headers));
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key) {
                self.trace(address, &call.method, &url, "Served from cache");
                return Ok(hit);
            }
        }

        // 4. Serialize the body
        let body = match &call.body {
            Some(value) => Some(serde_json::to_string(value).map_err(|e| {
                ValidationError::new(format!("Request body is not serializable: {}", e))
            })?),
            None => None,
        };

        // 5. Execute, honouring the caller's cancellation token
        self.trace(address, &call.method, &url, "Dispatching request");
        let request = HttpRequest {
            method: call.method.clone(),
            url: url.clone(),
            headers,
            body,
        };
        let raw = match &params.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ApiError::transport("request cancelled").into()),
                res = self.transport.execute(request) => res?,
            },
            None => self.transport.execute(request).await?,
        };

        if !raw.success() {
            if self.config.debug {
                tracing::warn!(operation = address, url = %url, status = raw.status, "Request failed");
            }
            let status_text = raw.status_text.clone();
            return Err(ApiError::http_status(raw.status, status_text, Some(raw.body)).into());
        }

        // 6. Response hooks
        let mut response = ApiResponse::from_http(raw);
        if let Some(hook) = &self.config.process_response {
            response = hook.apply(response)?;
        }
        response = match call.response {
            Some(hook) => hook.apply(response)?,
            None if call.unwrap_envelope => response.unwrap_envelope(),
            None => response,
        };
        self.trace(address, &call.method, &url, "Request completed");

        if let Some(key) = cache_key {
            self.cache.insert(key, &response);
        }
        Ok(response)
    }

    fn resolve_headers(&self, operation: Option<&HeadersHook>, params: &RequestParams) -> ClientResult<Headers> {
        let mut headers = Headers::new();
        for hook in [self.config.process_headers.as_ref(), operation].into_iter().flatten() {
            merge_headers(&mut headers, hook.evaluate(params)?);
        }
        merge_headers(&mut headers, params.headers.clone());
        Ok(headers)
    }

    fn resolve_data(&self, data: Option<Value>, operation: Option<&DataHook>, params: &RequestParams) -> ClientResult<Value> {
        let mut body = data.unwrap_or(Value::Null);
        for hook in [self.config.process_data.as_ref(), operation].into_iter().flatten() {
            body = hook.apply(body, params)?;
        }
        Ok(body)
    }

    fn trace(&self, address: &str, method: &Method, url: &str, message: &str) {
        if self.config.debug {
            tracing::info!(operation = address, method = %method, url = url, "{}", message);
        } else {
            tracing::debug!(operation = address, method = %method, url = url, "{}", message);
        }
    }

    // ---- Cache -----------------------------------------------------------

    pub fn clear_metadata_cache(&self) {
        self.cache.clear();
    }

    pub fn get_metadata_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ---- Real-time -------------------------------------------------------

    /// Returns the connection for `socket`, creating it on first use.
    fn connection(&self, socket: &str) -> ClientResult<Arc<dyn RtcConnection>> {
        let mut connections = self.connections.lock().expect("Connections lock poisoned");
        if let Some(conn) = connections.get(socket) {
            return Ok(Arc::clone(conn));
        }

        let config = self.sockets.get(socket)?;
        let url = self.resolver.resolve(&config.path, None, &RequestParams::default())?;
        let options = RtcOptions {
            reconnect: ReconnectPolicy {
                max_attempts: config.max_reconnect_attempts,
                base_delay: std::time::Duration::from_millis(config.reconnect_base_delay_ms),
            },
            resubscribe_on_reconnect: config.resubscribe_on_reconnect,
        };
        let conn = self.rtc_factory.create(
            config.transport,
            &url,
            config.header.clone().unwrap_or_default(),
            options,
        )?;
        tracing::debug!(operation = %self.address(socket), url = %url, "Created real-time connection");
        connections.insert(socket.to_string(), Arc::clone(&conn));
        Ok(conn)
    }

    /// Connects when the connection is idle. A connection that is already
    /// reconnecting is left to its own backoff.
    async fn ensure_connected(&self, socket: &str, conn: &Arc<dyn RtcConnection>) -> ClientResult<()> {
        if conn.state() == ConnectionState::Disconnected {
            conn.connect().await.map_err(|e| e.for_operation(&self.address(socket)))?;
        }
        Ok(())
    }

    /// Registers `handler` on `channel` of `socket`, connecting first if needed.
    pub async fn subscribe(&self, socket: &str, channel: &str, handler: MessageHandler) -> ClientResult<Unsubscribe> {
        let conn = self.connection(socket)?;
        self.ensure_connected(socket, &conn).await?;
        Ok(conn.subscribe(channel, handler))
    }

    /// Publishes `message` on `channel` of `socket`, connecting first if needed.
    /// SSE sockets are receive-only and fail without opening the stream.
    pub async fn publish(&self, socket: &str, channel: &str, message: Value) -> ClientResult<()> {
        let conn = self.connection(socket)?;
        if self.sockets.get(socket)?.transport != TransportKind::Sse {
            self.ensure_connected(socket, &conn).await?;
        }
        conn.publish(channel, message)
            .map_err(|e: ClientError| e.for_operation(&self.address(socket)))
    }

    /// State of an opened socket, `None` if it was never used.
    pub fn connection_state(&self, socket: &str) -> Option<ConnectionState> {
        self.connections
            .lock()
            .expect("Connections lock poisoned")
            .get(socket)
            .map(|c| c.state())
    }

    /// Disconnects every opened socket. Connections stay registered and reconnect on
    /// the next `subscribe`/`publish`.
    pub fn disconnect_all(&self) {
        let connections: Vec<Arc<dyn RtcConnection>> = self
            .connections
            .lock()
            .expect("Connections lock poisoned")
            .values()
            .cloned()
            .collect();
        for conn in connections {
            conn.disconnect();
        }
    }
}

impl fmt::Debug for ApiCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCollection")
            .field("name", &self.config.name)
            .field("base_url", &self.resolver.base_url())
            .field("dynamic", &self.config.dynamic)
            .finish_non_exhaustive()
    }
}

impl Drop for ApiCollection {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

fn parse_method(method: &str) -> ClientResult<Method> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ClientError::config(format!("Invalid HTTP method '{}'", method)))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
