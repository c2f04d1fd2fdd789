//! # Cache Module
//!
//! Small concurrent caches used by the resolver.
//!
//! - [`lru_cache::TtlCache`]: `DashMap`-backed map with a time-to-live and a
//!   capacity bound (least recently accessed entry is evicted first).
//! - [`SearchCache`]: maps free-text searches to the canonical reference the
//!   provider returned, so repeated requests skip the provider search.
//!
//! Configured through `SEARCH_CACHE_SIZE` and `SEARCH_CACHE_TTL_SECS`.

pub mod lru_cache;

use lru_cache::TtlCache;
use std::time::Duration;
use tracing::debug;

/// Cache de búsquedas: texto normalizado -> referencia canónica.
#[derive(Debug, Clone)]
pub struct SearchCache {
    entries: TtlCache<String, String>,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: TtlCache::new(capacity, ttl),
        }
    }

    pub fn get(&self, query: &str) -> Option<String> {
        let hit = self.entries.get(&normalize(query));
        if hit.is_some() {
            debug!("🎯 Cache hit para búsqueda: {}", query);
        }
        hit
    }

    pub fn put(&self, query: &str, reference: impl Into<String>) {
        self.entries.insert(normalize(query), reference.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
