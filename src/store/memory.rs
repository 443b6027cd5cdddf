//! In-process counter store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::CounterStore;
use crate::error::Result;
use crate::throttle::{RequestCounter, MAX_PERIOD};

/// Absolute expiry for an entry written at `now`, saturating far in the future.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(MAX_PERIOD))
        .unwrap_or(now)
}

/// A counter together with its absolute expiry.
#[derive(Debug, Clone)]
struct StoredCounter {
    counter: RequestCounter,
    expires_at: Instant,
}

impl StoredCounter {
    fn fresh(ttl: Duration, now: Instant) -> Self {
        Self {
            counter: RequestCounter::new(),
            expires_at: expiry(now, ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A concurrent in-memory counter store with per-entry expiry.
///
/// Uses [`DashMap`] so that get-or-create and increment hold the key's shard
/// lock for the whole read-modify-write. Expired entries are dropped lazily on
/// access and by [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, StoredCounter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());

        debug!(
            purged,
            remaining = self.entries.len(),
            "memory counter store cleanup complete"
        );
        purged
    }

    /// Spawn a Tokio task that purges expired entries every `interval`.
    ///
    /// The task holds only a weak reference and exits once the store is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.purge_expired();
                    }
                    None => break,
                }
                trace!("counter store cleanup tick completed");
            }
        })
    }

    fn live(&self, key: &str, now: Instant) -> Option<RequestCounter> {
        if let Some(stored) = self.entries.get(key) {
            if !stored.is_expired(now) {
                return Some(stored.counter.clone());
            }
        }

        self.entries.remove_if(key, |_, stored| stored.is_expired(now));
        None
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key, Instant::now()).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<RequestCounter>> {
        Ok(self.live(key, Instant::now()))
    }

    async fn get_or_create(&self, key: &str, ttl: Duration) -> Result<RequestCounter> {
        let now = Instant::now();
        let mut stored = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredCounter::fresh(ttl, now));

        if stored.is_expired(now) {
            *stored = StoredCounter::fresh(ttl, now);
        }

        Ok(stored.counter.clone())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<RequestCounter> {
        let now = Instant::now();
        let mut stored = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredCounter::fresh(ttl, now));

        if stored.is_expired(now) {
            *stored = StoredCounter::fresh(ttl, now);
        }

        stored.counter.total_requests += 1;
        Ok(stored.counter.clone())
    }

    async fn set(&self, key: &str, counter: &RequestCounter, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredCounter {
                counter: counter.clone(),
                expires_at: expiry(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_get_missing_key() {
        let store = MemoryCounterStore::new();
        assert!(tokio_test::block_on(store.get("missing")).unwrap().is_none());
        assert!(!tokio_test::block_on(store.exists("missing")).unwrap());
    }

    #[tokio::test]
    async fn test_get_or_create_creates_once() {
        let store = MemoryCounterStore::new();

        let first = store.get_or_create("key", TTL).await.unwrap();
        assert_eq!(first.total_requests, 0);
        assert!(!first.limit_exceeded);

        store.increment("key", TTL).await.unwrap();
        let second = store.get_or_create("key", TTL).await.unwrap();
        assert_eq!(second.total_requests, 1);
        assert_eq!(second.timestamp, first.timestamp);
    }

    #[tokio::test]
    async fn test_increment_counts_up() {
        let store = MemoryCounterStore::new();

        for expected in 1..=3 {
            let counter = store.increment("key", TTL).await.unwrap();
            assert_eq!(counter.total_requests, expected);
        }
        assert!(store.exists("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryCounterStore::new();
        store.increment("key", Duration::from_millis(50)).await.unwrap();
        store.increment("key", Duration::from_millis(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!store.exists("key").await.unwrap());
        let counter = store.increment("key", TTL).await.unwrap();
        assert_eq!(counter.total_requests, 1);
    }

    #[tokio::test]
    async fn test_set_replaces_expiry() {
        let store = MemoryCounterStore::new();
        let mut counter = store.increment("key", Duration::from_millis(50)).await.unwrap();
        counter.limit_exceeded = true;
        store.set("key", &counter, TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let stored = store.get("key").await.unwrap().unwrap();
        assert!(stored.limit_exceeded);
        assert_eq!(stored.total_requests, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryCounterStore::new();
        store.increment("key", TTL).await.unwrap();
        store.remove("key").await.unwrap();
        assert!(store.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_saturates() {
        let store = MemoryCounterStore::new();

        let counter = store.increment("key", Duration::MAX).await.unwrap();
        assert_eq!(counter.total_requests, 1);
        store.set("key", &counter, Duration::MAX).await.unwrap();
        assert!(store.exists("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryCounterStore::new();
        store.increment("short", Duration::from_millis(20)).await.unwrap();
        store.increment("long", TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_when_store_dropped() {
        let store = Arc::new(MemoryCounterStore::new());
        store.increment("short", Duration::from_millis(10)).await.unwrap();

        let handle = store.start_cleanup_task(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task should exit")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new());

        let tasks = (0..100).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.increment("shared", TTL).await.unwrap() })
        });
        join_all(tasks).await;

        let counter = store.get("shared").await.unwrap().unwrap();
        assert_eq!(counter.total_requests, 100);
    }
}
