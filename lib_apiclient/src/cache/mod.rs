//! # Cache Module
//!
//! Response caching for queries and query metadata.

/// Keyed response cache with pluggable eviction.
pub mod response_cache;

pub use response_cache::{
    generate_cache_key, CacheEntry, CacheStats, CapacityPolicy, EvictionPolicy, ResponseCache,
    TtlPolicy, Unbounded,
};
