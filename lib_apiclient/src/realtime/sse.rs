//! # Server-Sent Events Connection
//!
//! One-way real-time transport over a long-lived `text/event-stream` response.
//! Routing rules:
//!
//! - a named event (`event: prices`) is delivered to the channel of that name;
//! - an unnamed event whose JSON data carries a `channel` field is delivered to that
//!   channel with its `message` field as payload;
//! - anything else goes to the `"default"` channel.
//!
//! Publishing is not possible on this transport and always fails.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{ApiError, ClientResult};
use crate::realtime::channels::{ChannelRegistry, MessageHandler, Unsubscribe};
use crate::realtime::reconnect::{ConnectionState, Lifecycle, ReconnectState};
use crate::realtime::{RtcConnection, RtcOptions, DEFAULT_CHANNEL};
use crate::retrieve::ky_http::{to_header_map, Headers};

/// One parsed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, `"message"` when the stream gave none.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser. Feed it raw chunks in arrival order.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn flush(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

/// Maps an event onto `(channel, message)`.
pub fn route_event(event: &SseEvent) -> (String, Value) {
    let parsed: Value = serde_json::from_str(&event.data).unwrap_or_else(|_| Value::String(event.data.clone()));
    if event.event != "message" {
        return (event.event.clone(), parsed);
    }
    if let Value::Object(map) = &parsed {
        if let Some(Value::String(channel)) = map.get("channel") {
            let message = map.get("message").cloned().unwrap_or(Value::Null);
            return (channel.clone(), message);
        }
    }
    (DEFAULT_CHANNEL.to_string(), parsed)
}

struct Shared {
    channels: ChannelRegistry,
    lifecycle: Lifecycle,
}

impl Shared {
    fn deliver(&self, event: &SseEvent) {
        let (channel, message) = route_event(event);
        let delivered = self.channels.dispatch(&channel, &message);
        tracing::trace!(channel = %channel, delivered, "SSE event dispatched");
    }
}

/// Real-time connection over Server-Sent Events.
pub struct SseConnection {
    url: String,
    headers: Headers,
    options: RtcOptions,
    client: reqwest::Client,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl SseConnection {
    pub fn new(url: impl Into<String>, headers: Headers, options: RtcOptions) -> Self {
        Self {
            url: url.into(),
            headers,
            options,
            client: reqwest::Client::new(),
            shared: Arc::new(Shared {
                channels: ChannelRegistry::new(),
                lifecycle: Lifecycle::new(),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn channels(&self) -> Vec<String> {
        self.shared.channels.channels()
    }
}

/// Opens the event stream and checks the status.
async fn open_stream(client: &reqwest::Client, url: &str, headers: &Headers) -> ClientResult<reqwest::Response> {
    let response = client
        .get(url)
        .headers(to_header_map(headers)?)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| ApiError::transport(format!("SSE connect to {} failed: {}", url, e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::http_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            None,
        )
        .into());
    }
    Ok(response)
}

/// Reads one stream until it ends. `Ok` means the token was cancelled; `Err` carries
/// the reason the stream was lost.
async fn run_session(shared: &Shared, response: reqwest::Response, token: &CancellationToken) -> Result<(), String> {
    let mut stream = Box::pin(response.bytes_stream());
    let mut parser = SseParser::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.push(&bytes) {
                        shared.deliver(&event);
                    }
                }
                Some(Err(e)) => return Err(e.to_string()),
                None => return Err("stream ended by server".to_string()),
            }
        }
    }
}

async fn drive(
    shared: Weak<Shared>,
    client: reqwest::Client,
    url: String,
    headers: Headers,
    options: RtcOptions,
    mut response: reqwest::Response,
    token: CancellationToken,
) {
    let mut backoff = ReconnectState::new(options.reconnect);

    loop {
        let end = {
            let Some(strong) = shared.upgrade() else { return };
            run_session(&strong, response, &token).await
        };
        let reason = match end {
            Ok(()) => return,
            Err(reason) => reason,
        };
        let Some(strong) = shared.upgrade() else { return };
        tracing::warn!(url = %url, reason = %reason, "SSE connection lost");

        response = loop {
            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    url = %url,
                    attempts = backoff.attempts(),
                    "SSE reconnect attempts exhausted; giving up"
                );
                strong.lifecycle.set_state_for(&token, ConnectionState::Disconnected);
                return;
            };
            strong.lifecycle.set_state_for(&token, ConnectionState::Reconnecting);
            tracing::warn!(
                url = %url,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Scheduling SSE reconnect"
            );

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let attempt = tokio::select! {
                _ = token.cancelled() => return,
                res = open_stream(&client, &url, &headers) => res,
            };
            match attempt {
                Ok(r) => break r,
                Err(e) => tracing::warn!(url = %url, error = %e, "SSE reconnect failed"),
            }
        };

        backoff.reset();
        if !strong.lifecycle.activate(&token, || {}) {
            return;
        }
        tracing::info!(url = %url, "SSE reconnected");
    }
}

#[async_trait]
impl RtcConnection for SseConnection {
    async fn connect(&self) -> ClientResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let token = self.shared.lifecycle.begin();
        tracing::info!(url = %self.url, "Connecting SSE stream");

        let response = match open_stream(&self.client, &self.url, &self.headers).await {
            Ok(r) => r,
            Err(e) => {
                self.shared.lifecycle.set_state_for(&token, ConnectionState::Disconnected);
                tracing::error!(url = %self.url, error = %e, "SSE connect failed");
                return Err(e);
            }
        };

        if !self.shared.lifecycle.activate(&token, || {}) {
            return Err(ApiError::transport("SSE stream was disconnected while connecting").into());
        }

        tokio::spawn(drive(
            Arc::downgrade(&self.shared),
            self.client.clone(),
            self.url.clone(),
            self.headers.clone(),
            self.options,
            response,
            token,
        ));
        Ok(())
    }

    fn disconnect(&self) {
        self.shared.lifecycle.end();
        self.shared.channels.clear();
        tracing::info!(url = %self.url, "SSE stream disconnected");
    }

    /// Named events need no server round-trip; removing the last handler only drops
    /// the bookkeeping and later events for that name are discarded.
    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Unsubscribe {
        let (id, _) = self.shared.channels.add(channel, handler);
        let shared = Arc::downgrade(&self.shared);
        let channel = channel.to_string();
        Unsubscribe::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.channels.remove(&channel, id);
            }
        })
    }

    fn publish(&self, _channel: &str, _message: Value) -> ClientResult<()> {
        Err(ApiError::transport("SSE does not support publishing").into())
    }

    fn state(&self) -> ConnectionState {
        self.shared.lifecycle.state()
    }
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        self.shared.lifecycle.end();
    }
}
