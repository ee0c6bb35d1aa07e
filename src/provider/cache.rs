//! Bounded, TTL'd segment cache (spec.md §4.4). Uses the `lru` crate rather
//! than a hand-rolled `VecDeque` (grounded in `miquels-hls-server` and
//! `evanc577-livestream-dl`'s use of `lru::LruCache` for HLS segment
//! buffering), so the size bound (spec.md §8 invariant 4) holds by
//! construction instead of needing a manual evict-on-insert check.

use bytes::Bytes;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct SegmentCacheEntry {
    pub bytes: Bytes,
    pub stored_at: Instant,
    pub content_type: String,
}

/// Process-wide shared resource with internal locking (spec.md §3).
pub struct SegmentCache {
    inner: Mutex<lru::LruCache<String, SegmentCacheEntry>>,
    ttl: Duration,
}

impl SegmentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: Mutex::new(lru::LruCache::new(capacity)), ttl }
    }

    /// Returns `None` on miss or on an entry whose TTL has elapsed (an
    /// expired entry is evicted on the spot rather than returned stale,
    /// satisfying spec.md §8's TTL boundary: never returned after `T + TTL`).
    pub async fn get(&self, key: &str) -> Option<SegmentCacheEntry> {
        let mut cache = self.inner.lock().await;
        match cache.peek(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                let entry = entry.clone();
                cache.promote(key);
                Some(entry)
            }
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Inserts past capacity evicts the least-recently-used entry -- the
    /// `lru` crate's `put` already bounds the map to at most one insert past
    /// its configured size at any instant.
    pub async fn put(&self, key: String, bytes: Bytes, content_type: String) {
        let mut cache = self.inner.lock().await;
        cache.put(key, SegmentCacheEntry { bytes, stored_at: Instant::now(), content_type });
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Periodic janitor sweep (spec.md §4.4, every ~60s): drops any entry
    /// whose TTL has elapsed. Evicting eagerly here (rather than waiting for
    /// the next `get`) keeps memory flat even for segments nobody re-requests.
    pub async fn sweep_expired(&self) {
        let mut cache = self.inner.lock().await;
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            cache.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn respects_capacity_bound() {
        let cache = SegmentCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), Bytes::from_static(b"1"), "video/mp2t".into()).await;
        cache.put("b".into(), Bytes::from_static(b"2"), "video/mp2t".into()).await;
        cache.put("c".into(), Bytes::from_static(b"3"), "video/mp2t".into()).await;
        assert!(cache.len().await <= 2);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = SegmentCache::new(10, Duration::from_millis(10));
        cache.put("k".into(), Bytes::from_static(b"x"), "video/mp2t".into()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn sweep_expired_removes_stale_entries() {
        let cache = SegmentCache::new(10, Duration::from_millis(10));
        cache.put("k".into(), Bytes::from_static(b"x"), "video/mp2t".into()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.sweep_expired().await;
        assert_eq!(cache.len().await, 0);
    }
}
