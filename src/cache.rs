// src/cache.rs

use axum::body::Bytes;
use axum::http::HeaderMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::debug;

/// Seconds since the epoch. Used instead of `Instant` because expiry is a wall-clock
/// concept shared across cache entries, compared only in-process.
#[must_use]
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// A cached origin response, keyed by `CacheKey` in `CacheStore`.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    /// Ordered to preserve the origin's header order through filtering.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub expires_at: i64,
}

impl CachedResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<axum::http::HeaderName>(),
                value.parse::<axum::http::HeaderValue>(),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct UrlStats {
    pub hits: u64,
    pub misses: u64,
}

/// Derives the cache key for a request: the target normalized to `/` when empty, with
/// any header named in `Vary` appended as `|name=value` in the order `Vary` lists them.
#[must_use]
pub fn make_cache_key(path_and_query: &str, request_headers: &HeaderMap) -> String {
    let target = if path_and_query.is_empty() {
        "/"
    } else {
        path_and_query
    };
    let mut key = target.to_string();

    let Some(vary) = request_headers.get(axum::http::header::VARY) else {
        return key;
    };
    let Ok(vary) = vary.to_str() else {
        return key;
    };

    for raw_name in vary.split(',') {
        let name = raw_name.trim_matches(|c: char| c == ' ' || c == '\t');
        if name.is_empty() {
            continue;
        }
        if let Some(value) = request_headers.get(name).and_then(|v| v.to_str().ok()) {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
    }
    key
}

struct Inner {
    map: HashMap<String, CachedResponse>,
    /// Front = most recently used, back = least recently used.
    order: VecDeque<String>,
    /// Min-heap on `expires_at`, tolerant of tombstones (see `check_expired_head`).
    heap: BinaryHeap<Reverse<(i64, String)>>,
    url_stats: HashMap<String, UrlStats>,
}

impl Inner {
    fn promote(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_front(key.to_string());
    }
}

/// Bounded, thread-safe cache: LRU eviction on overflow, TTL expiry resolved lazily
/// from a min-heap, plus per-URL and aggregate hit/miss accounting.
pub struct CacheStore {
    inner: RwLock<Inner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    compliant_misses: AtomicU64,
}

impl CacheStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                heap: BinaryHeap::new(),
                url_stats: HashMap::new(),
            }),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compliant_misses: AtomicU64::new(0),
        }
    }

    /// Returns the stored response, promoting `key` to the LRU front. Does not check
    /// expiry; callers decide what to do with a stale entry.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.write().await;
        let response = inner.map.get(key).cloned();
        if response.is_some() {
            inner.promote(key);
        }
        response
    }

    /// Membership test with no LRU side effect.
    pub async fn has(&self, key: &str) -> bool {
        self.inner.read().await.map.contains_key(key)
    }

    /// Inserts or replaces `key`. On overflow, evicts the LRU tail. Always pushes a
    /// fresh `(key, expires_at)` onto the expiry heap; superseded heap entries become
    /// tombstones, discarded lazily by `check_expired_head`.
    pub async fn put(&self, key: String, response: CachedResponse) {
        let mut inner = self.inner.write().await;
        let expires_at = response.expires_at;

        if inner.map.contains_key(&key) {
            inner.map.insert(key.clone(), response);
            inner.promote(&key);
        } else {
            if inner.order.len() >= self.capacity {
                if let Some(evicted) = inner.order.pop_back() {
                    inner.map.remove(&evicted);
                    debug!(cache_key = %evicted, "evicted LRU tail");
                }
            }
            inner.map.insert(key.clone(), response);
            inner.order.push_front(key.clone());
        }

        inner.heap.push(Reverse((expires_at, key)));
    }

    /// Inspects the heap root. Pops and discards tombstones (key missing, or its
    /// `expires_at` no longer matches the live entry) until it finds a live root.
    /// Returns `false` if the store is empty or the live root is not yet expired;
    /// otherwise removes the entry and returns `true`. Callers loop on this until it
    /// returns `false`.
    pub async fn check_expired_head(&self) -> bool {
        let mut inner = self.inner.write().await;
        loop {
            let Some(&Reverse((expires_at, ref key))) = inner.heap.peek() else {
                return false;
            };
            let key = key.clone();

            match inner.map.get(&key) {
                Some(entry) if entry.expires_at == expires_at => {
                    if expires_at > now_secs() {
                        return false;
                    }
                    inner.heap.pop();
                    inner.map.remove(&key);
                    if let Some(pos) = inner.order.iter().position(|k| k == &key) {
                        inner.order.remove(pos);
                    }
                    return true;
                }
                _ => {
                    inner.heap.pop();
                }
            }
        }
    }

    /// Empties the map, LRU list, expiry heap, and per-URL counters. Aggregate
    /// counters are preserved.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.map.clear();
        inner.order.clear();
        inner.heap.clear();
        inner.url_stats.clear();
    }

    pub async fn record_hit(&self, key: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        inner.url_stats.entry(key.to_string()).or_default().hits += 1;
    }

    pub async fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        inner.url_stats.entry(key.to_string()).or_default().misses += 1;
    }

    pub fn record_compliant_miss(&self) {
        self.compliant_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn compliant_misses(&self) -> u64 {
        self.compliant_misses.load(Ordering::Relaxed)
    }

    pub async fn per_url_stats(&self) -> HashMap<String, UrlStats> {
        self.inner.read().await.url_stats.clone()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }
}
