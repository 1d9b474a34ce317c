//! Query cache: TTL plus write-generation invalidation.
//!
//! Every successful store write bumps a shared generation counter; entries
//! created under an older generation are stale regardless of TTL. This is
//! the wholesale-invalidation policy — correct by construction, and cheap
//! because the generation check is one atomic load.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::SearchResponse;

struct CacheEntry {
    response: SearchResponse,
    created: Instant,
    generation: u64,
}

pub(crate) struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    generation: Arc<AtomicU64>,
}

impl QueryCache {
    /// `ttl` of zero disables the cache entirely (used by tests to compare
    /// cached and cold results).
    pub(crate) fn new(ttl: Duration, generation: Arc<AtomicU64>) -> Self {
        Self { entries: DashMap::new(), ttl, generation }
    }

    pub(crate) fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub(crate) fn get(&self, key: &str) -> Option<SearchResponse> {
        if !self.enabled() {
            return None;
        }
        let current = self.generation.load(Ordering::Acquire);
        if let Some(entry) = self.entries.get(key) {
            if entry.generation == current && entry.created.elapsed() < self.ttl {
                return Some(entry.response.clone());
            }
        }
        // Stale by age or by write; drop it so the map does not grow.
        self.entries.remove(key);
        None
    }

    pub(crate) fn insert(&self, key: String, response: SearchResponse) {
        if !self.enabled() {
            return;
        }
        let entry = CacheEntry {
            response,
            created: Instant::now(),
            generation: self.generation.load(Ordering::Acquire),
        };
        self.entries.insert(key, entry);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> SearchResponse {
        SearchResponse { hits: vec![], total_found: 0 }
    }

    #[test]
    fn hit_within_ttl_and_generation() {
        let generation = Arc::new(AtomicU64::new(0));
        let cache = QueryCache::new(Duration::from_secs(60), Arc::clone(&generation));
        cache.insert("k".into(), response());
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn write_generation_invalidates() {
        let generation = Arc::new(AtomicU64::new(0));
        let cache = QueryCache::new(Duration::from_secs(60), Arc::clone(&generation));
        cache.insert("k".into(), response());
        generation.fetch_add(1, Ordering::Release);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0, "stale entries are evicted on lookup");
    }

    #[test]
    fn zero_ttl_disables() {
        let generation = Arc::new(AtomicU64::new(0));
        let cache = QueryCache::new(Duration::ZERO, generation);
        cache.insert("k".into(), response());
        assert!(cache.get("k").is_none());
    }
}
