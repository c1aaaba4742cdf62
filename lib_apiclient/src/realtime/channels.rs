//! # Channel Bookkeeping
//!
//! Logical pub/sub channels multiplexed over one physical connection. Each channel
//! maps to the set of handlers registered for it; a channel entry exists iff it has
//! at least one handler. Handler identity is a per-registry id, so the same closure
//! registered twice is two independent subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Callback invoked with every message delivered on a channel.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Wraps a closure as a [`MessageHandler`].
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    channels: HashMap<String, HashMap<u64, MessageHandler>>,
}

/// Thread-safe map of `channel → {handler}`.
#[derive(Default)]
pub struct ChannelRegistry {
    inner: Mutex<Inner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` on `channel`. Returns its id and whether this was the
    /// channel's first handler.
    pub fn add(&self, channel: &str, handler: MessageHandler) -> (u64, bool) {
        let mut inner = self.inner.lock().expect("Channel registry lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        let handlers = inner.channels.entry(channel.to_string()).or_default();
        let first = handlers.is_empty();
        handlers.insert(id, handler);
        (id, first)
    }

    /// Removes one handler. Returns `true` when that emptied (and removed) the channel.
    pub fn remove(&self, channel: &str, id: u64) -> bool {
        let mut inner = self.inner.lock().expect("Channel registry lock poisoned");
        let Some(handlers) = inner.channels.get_mut(channel) else {
            return false;
        };
        if handlers.remove(&id).is_none() {
            return false;
        }
        if handlers.is_empty() {
            inner.channels.remove(channel);
            return true;
        }
        false
    }

    /// Delivers `message` to every handler of `channel`. Returns the handler count.
    ///
    /// Handlers run outside the registry lock so they may subscribe or unsubscribe.
    pub fn dispatch(&self, channel: &str, message: &Value) -> usize {
        let handlers: Vec<MessageHandler> = {
            let inner = self.inner.lock().expect("Channel registry lock poisoned");
            match inner.channels.get(channel) {
                Some(h) => h.values().cloned().collect(),
                None => return 0,
            }
        };
        for h in &handlers {
            h(message.clone());
        }
        handlers.len()
    }

    pub fn channels(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("Channel registry lock poisoned");
        let mut names: Vec<String> = inner.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.inner
            .lock()
            .expect("Channel registry lock poisoned")
            .channels
            .contains_key(channel)
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .expect("Channel registry lock poisoned")
            .channels
            .get(channel)
            .map_or(0, HashMap::len)
    }

    pub fn clear(&self) {
        self.inner.lock().expect("Channel registry lock poisoned").channels.clear();
    }
}

/// Removes one subscription. Consumed on use, so a subscription is released at most once.
#[must_use = "dropping an Unsubscribe keeps the subscription alive"]
pub struct Unsubscribe {
    release: Box<dyn FnOnce() + Send + Sync>,
}

impl Unsubscribe {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self { release: Box::new(release) }
    }

    pub fn unsubscribe(self) {
        (self.release)()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unsubscribe")
    }
}
