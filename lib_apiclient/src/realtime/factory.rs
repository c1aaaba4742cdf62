//! Builds real-time connections from a socket's declared transport.

use std::sync::Arc;

use crate::configs::collection_config::TransportKind;
use crate::errors::{ClientError, ClientResult};
use crate::realtime::{RtcConnection, RtcOptions, SseConnection, WebSocketConnection};
use crate::retrieve::ky_http::Headers;

/// Creates the physical connection behind a socket operation.
///
/// Swap in a custom factory to route sockets through a different transport, or to
/// hand out test doubles.
#[cfg_attr(test, mockall::automock)]
pub trait RtcConnectionFactory: Send + Sync {
    fn create(
        &self,
        transport: TransportKind,
        url: &str,
        headers: Headers,
        options: RtcOptions,
    ) -> ClientResult<Arc<dyn RtcConnection>>;
}

/// WebSocket and SSE over the crate's own implementations.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRtcConnectionFactory;

impl RtcConnectionFactory for DefaultRtcConnectionFactory {
    fn create(
        &self,
        transport: TransportKind,
        url: &str,
        headers: Headers,
        options: RtcOptions,
    ) -> ClientResult<Arc<dyn RtcConnection>> {
        match transport {
            TransportKind::Websocket => {
                let url = websocket_url(url)?;
                Ok(Arc::new(WebSocketConnection::new(url, headers, options)))
            }
            TransportKind::Sse => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ClientError::config(format!("SSE endpoint must be http(s): '{}'", url)));
                }
                Ok(Arc::new(SseConnection::new(url, headers, options)))
            }
        }
    }
}

/// Maps an http(s) URL onto its ws(s) counterpart; ws(s) URLs pass through.
pub fn websocket_url(url: &str) -> ClientResult<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        return Ok(format!("wss://{}", rest));
    }
    if let Some(rest) = url.strip_prefix("http://") {
        return Ok(format!("ws://{}", rest));
    }
    if url.starts_with("ws://") || url.starts_with("wss://") {
        return Ok(url.to_string());
    }
    Err(ClientError::config(format!("WebSocket endpoint needs an absolute URL: '{}'", url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ConnectionState;

    #[test]
    fn http_schemes_become_websocket_schemes() {
        assert_eq!(websocket_url("https://api.test/a").unwrap(), "wss://api.test/a");
        assert_eq!(websocket_url("http://localhost:80/ws").unwrap(), "ws://localhost:80/ws");
        assert_eq!(websocket_url("ws://h/x").unwrap(), "ws://h/x");
        assert!(websocket_url("/relative").unwrap_err().is_configuration());
    }

    #[test]
    fn default_factory_builds_disconnected_connections() {
        let factory = DefaultRtcConnectionFactory;
        let ws = factory
            .create(TransportKind::Websocket, "http://h/ws", Headers::new(), RtcOptions::default())
            .unwrap();
        assert_eq!(ws.state(), ConnectionState::Disconnected);

        let sse = factory
            .create(TransportKind::Sse, "http://h/events", Headers::new(), RtcOptions::default())
            .unwrap();
        assert!(!sse.is_connected());
    }

    #[test]
    fn sse_rejects_non_http_urls() {
        let err = DefaultRtcConnectionFactory
            .create(TransportKind::Sse, "ws://h/events", Headers::new(), RtcOptions::default())
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
