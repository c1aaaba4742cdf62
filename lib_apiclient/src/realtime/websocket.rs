//! # WebSocket Connection
//!
//! A bidirectional real-time transport. One socket carries every channel:
//!
//! - outbound control frames: `{"type": "subscribe" | "unsubscribe" | "publish", "channel", "message"?}`
//! - inbound data frames: `{"channel", "message"}`, fanned out to the channel's handlers.
//!
//! A background driver task owns the socket. When the socket drops unexpectedly the
//! driver reconnects with exponential backoff and, if enabled, replays a subscribe
//! frame for every channel that still has handlers. Channels first subscribed while
//! no session was live are always announced once the next session opens.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::errors::{ApiError, ClientError, ClientResult};
use crate::realtime::channels::{ChannelRegistry, MessageHandler, Unsubscribe};
use crate::realtime::reconnect::{ConnectionState, Lifecycle, ReconnectState};
use crate::realtime::{RtcConnection, RtcOptions};
use crate::retrieve::ky_http::Headers;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum FrameType {
    Subscribe,
    Unsubscribe,
    Publish,
}

/// Outbound control frame.
#[derive(Debug, Serialize)]
pub(crate) struct ControlFrame<'a> {
    #[serde(rename = "type")]
    pub kind: FrameType,
    pub channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a Value>,
}

impl<'a> ControlFrame<'a> {
    pub fn encode(kind: FrameType, channel: &'a str, message: Option<&'a Value>) -> String {
        let frame = ControlFrame { kind, channel, message };
        // Plain strings and JSON values always serialize
        serde_json::to_string(&frame).unwrap_or_default()
    }
}

/// Inbound data frame.
#[derive(Debug, Deserialize)]
pub(crate) struct ChannelEnvelope {
    pub channel: Option<String>,
    #[serde(default)]
    pub message: Value,
}

struct Shared {
    channels: ChannelRegistry,
    lifecycle: Lifecycle,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    /// Channels whose subscribe frame has not reached the current session.
    pending: Mutex<HashSet<String>>,
}

impl Shared {
    fn is_connected(&self) -> bool {
        self.lifecycle.state() == ConnectionState::Connected
    }

    /// Queues a text frame for the driver. Fails when no session is live.
    fn send_text(&self, text: String) -> ClientResult<()> {
        // State is checked before taking the outbound lock; `activate` nests them the other way
        if !self.is_connected() {
            return Err(ApiError::transport("WebSocket is not connected").into());
        }
        let outbound = self.outbound.lock().expect("Outbound lock poisoned");
        match outbound.as_ref() {
            Some(tx) => tx
                .send(WsMessage::Text(text.into()))
                .map_err(|_| ApiError::transport("WebSocket session has ended").into()),
            None => Err(ApiError::transport("WebSocket is not connected").into()),
        }
    }

    fn send_control(&self, kind: FrameType, channel: &str) -> bool {
        match self.send_text(ControlFrame::encode(kind, channel, None)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(channel, error = %e, "Control frame not sent");
                false
            }
        }
    }

    fn mark_pending(&self, channels: impl IntoIterator<Item = String>) {
        self.pending.lock().expect("Pending lock poisoned").extend(channels);
    }

    /// Sends a subscribe frame for every pending channel that still has handlers.
    /// Frames that cannot be sent stay pending for the next session.
    fn flush_pending(&self) {
        let pending: Vec<String> = self.pending.lock().expect("Pending lock poisoned").drain().collect();
        for channel in pending {
            if self.channels.contains(&channel) && !self.send_control(FrameType::Subscribe, &channel) {
                self.mark_pending([channel]);
            }
        }
    }

    fn dispatch_frame(&self, text: &str) {
        match serde_json::from_str::<ChannelEnvelope>(text) {
            Ok(ChannelEnvelope { channel: Some(channel), message }) => {
                let delivered = self.channels.dispatch(&channel, &message);
                tracing::trace!(channel = %channel, delivered, "WebSocket frame dispatched");
            }
            Ok(_) => tracing::debug!("WebSocket frame without channel ignored"),
            Err(e) => tracing::debug!(error = %e, "Unparseable WebSocket frame ignored"),
        }
    }
}

/// Real-time connection over a single WebSocket.
pub struct WebSocketConnection {
    url: String,
    headers: Headers,
    options: RtcOptions,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl WebSocketConnection {
    pub fn new(url: impl Into<String>, headers: Headers, options: RtcOptions) -> Self {
        Self {
            url: url.into(),
            headers,
            options,
            shared: Arc::new(Shared {
                channels: ChannelRegistry::new(),
                lifecycle: Lifecycle::new(),
                outbound: Mutex::new(None),
                pending: Mutex::new(HashSet::new()),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Channels that currently have at least one handler.
    pub fn channels(&self) -> Vec<String> {
        self.shared.channels.channels()
    }
}

/// Performs the WebSocket handshake with the configured headers.
async fn open_socket(url: &str, headers: &Headers) -> ClientResult<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::config(format!("Invalid WebSocket URL '{}': {}", url, e)))?;
    for (name, value) in headers {
        let h_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::config(format!("Invalid header name '{}': {}", name, e)))?;
        let h_value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::config(format!("Invalid value for header '{}': {}", name, e)))?;
        request.headers_mut().insert(h_name, h_value);
    }
    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| ApiError::transport(format!("WebSocket connect to {} failed: {}", url, e)))?;
    Ok(stream)
}

/// How a session ended.
enum SessionEnd {
    Cancelled,
    Lost(String),
}

/// Pumps one live socket until it closes or the token is cancelled.
async fn run_session(
    shared: &Shared,
    stream: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<WsMessage>,
    token: &CancellationToken,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = write.close().await;
                return SessionEnd::Cancelled;
            }
            Some(msg) = outbound.recv() => {
                if let Err(e) = write.send(msg).await {
                    return SessionEnd::Lost(format!("send failed: {}", e));
                }
            }
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch_frame(text.as_str()),
                Some(Ok(WsMessage::Binary(bin))) => match std::str::from_utf8(&bin) {
                    Ok(text) => shared.dispatch_frame(text),
                    Err(_) => tracing::debug!(len = bin.len(), "Non-UTF-8 binary frame ignored"),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    return SessionEnd::Lost("closed by remote host".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
            }
        }
    }
}

/// Owns the socket for the lifetime of one `connect()`, reconnecting on loss.
async fn drive(
    shared: Weak<Shared>,
    url: String,
    headers: Headers,
    options: RtcOptions,
    mut stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    token: CancellationToken,
) {
    let mut backoff = ReconnectState::new(options.reconnect);

    loop {
        let end = {
            let Some(strong) = shared.upgrade() else { return };
            run_session(&strong, stream, &mut outbound, &token).await
        };
        let reason = match end {
            SessionEnd::Cancelled => return,
            SessionEnd::Lost(reason) => reason,
        };
        let Some(strong) = shared.upgrade() else { return };
        *strong.outbound.lock().expect("Outbound lock poisoned") = None;
        tracing::warn!(url = %url, reason = %reason, "WebSocket connection lost");

        // Reconnect loop: exits with a fresh stream or returns for good
        stream = loop {
            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    url = %url,
                    attempts = backoff.attempts(),
                    "WebSocket reconnect attempts exhausted; giving up"
                );
                strong.lifecycle.set_state_for(&token, ConnectionState::Disconnected);
                return;
            };
            strong.lifecycle.set_state_for(&token, ConnectionState::Reconnecting);
            tracing::warn!(
                url = %url,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Scheduling WebSocket reconnect"
            );

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let attempt = tokio::select! {
                _ = token.cancelled() => return,
                res = open_socket(&url, &headers) => res,
            };
            match attempt {
                Ok(s) => break s,
                Err(e) => tracing::warn!(url = %url, error = %e, "WebSocket reconnect failed"),
            }
        };

        backoff.reset();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound = rx;
        let installed = strong.lifecycle.activate(&token, || {
            *strong.outbound.lock().expect("Outbound lock poisoned") = Some(tx);
        });
        if !installed {
            return;
        }
        tracing::info!(url = %url, "WebSocket reconnected");

        // Without replay only channels the lost session never heard of are announced
        if options.resubscribe_on_reconnect {
            strong.mark_pending(strong.channels.channels());
        }
        strong.flush_pending();
    }
}

#[async_trait]
impl RtcConnection for WebSocketConnection {
    async fn connect(&self) -> ClientResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.shared.is_connected() {
            return Ok(());
        }

        let token = self.shared.lifecycle.begin();
        tracing::info!(url = %self.url, "Connecting WebSocket");

        let stream = match open_socket(&self.url, &self.headers).await {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.lifecycle.set_state_for(&token, ConnectionState::Disconnected);
                tracing::error!(url = %self.url, error = %e, "WebSocket connect failed");
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let installed = self.shared.lifecycle.activate(&token, || {
            *self.shared.outbound.lock().expect("Outbound lock poisoned") = Some(tx);
        });
        if !installed {
            return Err(ApiError::transport("WebSocket was disconnected while connecting").into());
        }

        // Flush subscriptions recorded before the socket was open
        self.shared.mark_pending(self.shared.channels.channels());
        self.shared.flush_pending();

        tokio::spawn(drive(
            Arc::downgrade(&self.shared),
            self.url.clone(),
            self.headers.clone(),
            self.options,
            stream,
            rx,
            token,
        ));
        tracing::info!(url = %self.url, "WebSocket connected");
        Ok(())
    }

    fn disconnect(&self) {
        self.shared.lifecycle.end();
        *self.shared.outbound.lock().expect("Outbound lock poisoned") = None;
        self.shared.channels.clear();
        self.shared.pending.lock().expect("Pending lock poisoned").clear();
        tracing::info!(url = %self.url, "WebSocket disconnected");
    }

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Unsubscribe {
        let (id, first) = self.shared.channels.add(channel, handler);
        // Recorded before the state check, so a session activating meanwhile flushes it
        if first {
            self.shared.mark_pending([channel.to_string()]);
            if self.shared.is_connected() {
                self.shared.flush_pending();
            }
        }

        let shared = Arc::downgrade(&self.shared);
        let channel = channel.to_string();
        Unsubscribe::new(move || {
            let Some(shared) = shared.upgrade() else { return };
            if shared.channels.remove(&channel, id) {
                let never_sent = shared.pending.lock().expect("Pending lock poisoned").remove(&channel);
                if !never_sent && shared.is_connected() {
                    shared.send_control(FrameType::Unsubscribe, &channel);
                }
            }
        })
    }

    fn publish(&self, channel: &str, message: Value) -> ClientResult<()> {
        self.shared
            .send_text(ControlFrame::encode(FrameType::Publish, channel, Some(&message)))
    }

    fn state(&self) -> ConnectionState {
        self.shared.lifecycle.state()
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.shared.lifecycle.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::channels::handler;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn control_frames_match_wire_format() {
        let sub = ControlFrame::encode(FrameType::Subscribe, "news", None);
        assert_eq!(serde_json::from_str::<Value>(&sub).unwrap(), json!({"type": "subscribe", "channel": "news"}));

        let msg = json!({"text": "hi"});
        let publish = ControlFrame::encode(FrameType::Publish, "chat", Some(&msg));
        assert_eq!(
            serde_json::from_str::<Value>(&publish).unwrap(),
            json!({"type": "publish", "channel": "chat", "message": {"text": "hi"}})
        );
    }

    #[test]
    fn publish_fails_when_not_connected() {
        let conn = WebSocketConnection::new("ws://127.0.0.1:1/ws", Headers::new(), RtcOptions::default());
        let err = conn.publish("chat", json!("hello")).unwrap_err();
        assert!(err.is_api());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn inbound_frames_reach_every_channel_handler() {
        let conn = WebSocketConnection::new("ws://127.0.0.1:1/ws", Headers::new(), RtcOptions::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let h2 = Arc::clone(&hits);
        let _a = conn.subscribe("news", handler(move |_| { h1.fetch_add(1, Ordering::SeqCst); }));
        let _b = conn.subscribe("news", handler(move |_| { h2.fetch_add(10, Ordering::SeqCst); }));

        conn.shared.dispatch_frame(r#"{"channel":"news","message":{"id":1}}"#);
        conn.shared.dispatch_frame(r#"{"channel":"other","message":1}"#);
        conn.shared.dispatch_frame("not json");
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn subscriptions_before_connect_are_recorded_and_released() {
        let conn = WebSocketConnection::new("ws://127.0.0.1:1/ws", Headers::new(), RtcOptions::default());
        let a = conn.subscribe("news", handler(|_| {}));
        let b = conn.subscribe("news", handler(|_| {}));
        assert_eq!(conn.channels(), vec!["news".to_string()]);
        a.unsubscribe();
        assert_eq!(conn.channels(), vec!["news".to_string()]);
        b.unsubscribe();
        assert!(conn.channels().is_empty());
    }

    fn sent_frame(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Option<Value> {
        match rx.try_recv().ok()? {
            WsMessage::Text(text) => serde_json::from_str(text.as_str()).ok(),
            _ => None,
        }
    }

    #[test]
    fn channels_added_between_sessions_are_announced_without_replay() {
        let conn = WebSocketConnection::new("ws://127.0.0.1:1/ws", Headers::new(), RtcOptions::default());
        let shared = &conn.shared;
        let token = shared.lifecycle.begin();

        let (tx, mut first) = mpsc::unbounded_channel();
        assert!(shared.lifecycle.activate(&token, || *shared.outbound.lock().unwrap() = Some(tx)));
        let _news = conn.subscribe("news", handler(|_| {}));
        assert_eq!(sent_frame(&mut first), Some(json!({"type": "subscribe", "channel": "news"})));

        // Session lost: nothing can be sent until the next one opens
        *shared.outbound.lock().unwrap() = None;
        shared.lifecycle.set_state_for(&token, ConnectionState::Reconnecting);
        let _sports = conn.subscribe("sports", handler(|_| {}));
        assert_eq!(sent_frame(&mut first), None);

        let (tx, mut second) = mpsc::unbounded_channel();
        assert!(shared.lifecycle.activate(&token, || *shared.outbound.lock().unwrap() = Some(tx)));
        shared.flush_pending();
        assert_eq!(sent_frame(&mut second), Some(json!({"type": "subscribe", "channel": "sports"})));
        assert_eq!(sent_frame(&mut second), None);
    }

    #[test]
    fn releasing_a_never_announced_channel_sends_nothing() {
        let conn = WebSocketConnection::new("ws://127.0.0.1:1/ws", Headers::new(), RtcOptions::default());
        let sub = conn.subscribe("news", handler(|_| {}));
        assert!(conn.shared.pending.lock().unwrap().contains("news"));
        sub.unsubscribe();
        assert!(conn.shared.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_connect_returns_api_error_and_stays_disconnected() {
        let conn = WebSocketConnection::new("ws://127.0.0.1:1/ws", Headers::new(), RtcOptions::default());
        let err = conn.connect().await.unwrap_err();
        assert!(err.is_api());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_clears_subscriptions() {
        let conn = WebSocketConnection::new("ws://127.0.0.1:1/ws", Headers::new(), RtcOptions::default());
        let _sub = conn.subscribe("news", handler(|_| {}));
        conn.disconnect();
        assert!(conn.channels().is_empty());
        assert!(!conn.is_connected());
    }
}
