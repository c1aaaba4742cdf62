//! # Response Cache
//!
//! In-memory cache for query and metadata responses, keyed by resolved URL plus the
//! sorted request headers. Entries never expire under the default [`Unbounded`]
//! policy; they live until [`ResponseCache::clear`]. Other policies can be injected
//! through the [`EvictionPolicy`] trait.
//!
//! Concurrent misses on the same key are not coalesced: both callers fetch and the
//! last write wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::collection::response::ApiResponse;
use crate::retrieve::ky_http::Headers;

/// Builds the cache key for a request.
///
/// With no headers the key is the URL itself; otherwise it is the URL followed by
/// the JSON of the headers sorted by name, so insertion order never matters.
pub fn generate_cache_key<I, K, V>(url: &str, headers: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let sorted: Headers = headers
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    if sorted.is_empty() {
        return url.to_string();
    }
    // A BTreeMap<String, String> always serializes
    let json = serde_json::to_string(&sorted).unwrap_or_default();
    format!("{}:{}", url, json)
}

/// A stored response and its insertion time.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: ApiResponse,
    pub inserted_at: Instant,
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub entries: Vec<String>,
}

/// Decides when entries leave the cache.
pub trait EvictionPolicy: Send + Sync {
    /// Whether `entry` must be treated as a miss at `now`.
    fn is_expired(&self, _entry: &CacheEntry, _now: Instant) -> bool {
        false
    }

    /// Called after every insert; may remove entries from `entries`.
    fn after_insert(&self, _entries: &mut HashMap<String, CacheEntry>) {}
}

/// No expiry, no eviction.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {}

/// Keeps at most `max_entries`, evicting the oldest first.
#[derive(Debug, Clone, Copy)]
pub struct CapacityPolicy {
    pub max_entries: usize,
}

impl EvictionPolicy for CapacityPolicy {
    fn after_insert(&self, entries: &mut HashMap<String, CacheEntry>) {
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    tracing::trace!(key = %key, "Evicting oldest cache entry");
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Entries older than `ttl` are misses and are purged on access.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub ttl: Duration,
}

impl EvictionPolicy for TtlPolicy {
    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }
}

/// Thread-safe response cache.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    policy: Arc<dyn EvictionPolicy>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    /// Unbounded cache.
    pub fn new() -> Self {
        Self::with_policy(Arc::new(Unbounded))
    }

    pub fn with_policy(policy: Arc<dyn EvictionPolicy>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Returns the stored response verbatim, or `None` on a miss.
    pub fn get(&self, key: &str) -> Option<ApiResponse> {
        let mut entries = self.entries.lock().expect("Cache lock poisoned");
        let expired = match entries.get(key) {
            Some(entry) => self.policy.is_expired(entry, Instant::now()),
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|e| e.response.clone())
    }

    /// Stores `response` annotated with `cache: true`.
    pub fn insert(&self, key: String, response: &ApiResponse) {
        let mut stored = response.clone();
        stored.cache = Some(true);
        let mut entries = self.entries.lock().expect("Cache lock poisoned");
        entries.insert(
            key,
            CacheEntry {
                response: stored,
                inserted_at: Instant::now(),
            },
        );
        self.policy.after_insert(&mut entries);
    }

    /// Empties the cache unconditionally.
    pub fn clear(&self) {
        self.entries.lock().expect("Cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("Cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().expect("Cache lock poisoned");
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: keys.len(),
            entries: keys,
        }
    }
}
