//! # Real-Time Connection Subsystem
//!
//! One physical connection per socket, many logical channels on top of it.
//!
//! ## Contained Modules:
//!
//! - **`channels`**: `channel → {handler}` bookkeeping and the `Unsubscribe` handle.
//! - **`reconnect`**: the connection lifecycle states and exponential backoff.
//! - **`websocket`**: bidirectional transport speaking JSON control frames.
//! - **`sse`**: one-way Server-Sent Events transport.
//! - **`factory`**: picks an implementation from a socket's declared transport.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ClientResult;

pub mod channels;
pub mod factory;
pub mod reconnect;
pub mod sse;
pub mod websocket;

pub use channels::{handler, ChannelRegistry, MessageHandler, Unsubscribe};
pub use factory::{DefaultRtcConnectionFactory, RtcConnectionFactory};
pub use reconnect::{ConnectionState, ReconnectPolicy, ReconnectState};
pub use sse::SseConnection;
pub use websocket::WebSocketConnection;

/// Channel used by messages that name no channel of their own.
pub const DEFAULT_CHANNEL: &str = "default";

/// Per-connection behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcOptions {
    pub reconnect: ReconnectPolicy,
    /// Replays a subscribe frame for every active channel after a reconnect.
    pub resubscribe_on_reconnect: bool,
}

impl Default for RtcOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            resubscribe_on_reconnect: true,
        }
    }
}

/// A physical real-time connection multiplexing logical channels.
#[async_trait]
pub trait RtcConnection: Send + Sync {
    /// Opens the transport. A no-op when already connected.
    async fn connect(&self) -> ClientResult<()>;

    /// Tears down the transport, drops every subscription and cancels any pending
    /// reconnect.
    fn disconnect(&self);

    /// Registers `handler` on `channel`.
    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Unsubscribe;

    /// Sends `message` on `channel`.
    fn publish(&self, channel: &str, message: Value) -> ClientResult<()>;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState;
}
