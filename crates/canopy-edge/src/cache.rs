//! Edge response cache.
//!
//! Entries expire on `tokio::time::Instant` so paused-clock tests can walk
//! past a TTL without sleeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::message::EdgeResponse;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry {
    response: EdgeResponse,
    expires_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    capacity: usize,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<EdgeResponse> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a response. Zero TTLs and non-2xx responses are not stored.
    pub fn insert(&self, key: CacheKey, response: EdgeResponse, ttl: Duration) {
        if ttl.is_zero() || !response.is_success() {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let now = Instant::now();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                debug!(capacity = self.capacity, "response cache full, skipping insert");
                return;
            }
        }
        entries.insert(
            key,
            Entry {
                response,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let dropped = entries.len();
        entries.clear();
        debug!(dropped, "invalidated response cache");
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(body: &str) -> EdgeResponse {
        EdgeResponse::new(200, body)
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("GET /a");
        cache.insert(key.clone(), ok("a"), Duration::from_secs(10));
        assert_eq!(cache.get(&key).unwrap().body, b"a");

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn skips_zero_ttl_and_errors() {
        let cache = ResponseCache::new();
        cache.insert(CacheKey::new("a"), ok("a"), Duration::ZERO);
        cache.insert(
            CacheKey::new("b"),
            EdgeResponse::new(500, "boom"),
            Duration::from_secs(60),
        );
        cache.insert(CacheKey::new("c"), EdgeResponse::not_found(), Duration::from_secs(60));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_all_clears() {
        let cache = ResponseCache::new();
        cache.insert(CacheKey::new("a"), ok("a"), Duration::from_secs(60));
        cache.insert(CacheKey::new("b"), ok("b"), Duration::from_secs(60));
        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.get(&CacheKey::new("a")).is_none());
    }

    #[test]
    fn respects_capacity() {
        let cache = ResponseCache::with_capacity(1);
        cache.insert(CacheKey::new("a"), ok("a"), Duration::from_secs(60));
        cache.insert(CacheKey::new("b"), ok("b"), Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&CacheKey::new("a")).is_some());
    }
}
