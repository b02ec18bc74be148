//! In-flight-deduplicating promise caches.
//!
//! The prefetch paths must never clone cached values or issue duplicate
//! upstream requests for the same key. Each entry is a shared future:
//! concurrent callers await the same handle and receive `Arc`s of one
//! result. A failed future evicts its own entry so the next caller starts
//! fresh, while callers already holding the handle still observe the same
//! terminal error.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::ChainError;

pub type SharedOutcome<V> = Result<Arc<V>, Arc<ChainError>>;
pub type SharedPromise<V> = Shared<BoxFuture<'static, SharedOutcome<V>>>;

struct Entry<V> {
    promise: SharedPromise<V>,
    inserted_at: Instant,
    generation: u64,
}

/// Capacity- and TTL-bounded map from key to shared in-flight future.
pub struct PromiseCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
    generations: AtomicU64,
}

impl<K, V> PromiseCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration) -> Arc<Self> {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Arc::new(PromiseCache {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            generations: AtomicU64::new(0),
        })
    }

    /// Returns the live promise for `key`, starting `start` only when there
    /// is none (or the existing one has expired).
    pub fn get_or_start<F>(self: &Arc<Self>, key: K, start: F) -> SharedPromise<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, ChainError>>,
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return entry.promise.clone();
            }
            entries.pop(&key);
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cache = Arc::downgrade(self);
        let evict_key = key.clone();
        let fut = start();
        let promise: SharedPromise<V> = async move {
            match fut.await {
                Ok(value) => Ok(Arc::new(value)),
                Err(err) => {
                    // Self-evict so retries re-issue the request, but only
                    // if this entry is still the one in the map.
                    if let Some(cache) = cache.upgrade() {
                        cache.evict_generation(&evict_key, generation);
                    }
                    Err(Arc::new(err))
                }
            }
        }
        .boxed()
        .shared();

        entries.push(
            key,
            Entry {
                promise: promise.clone(),
                inserted_at: Instant::now(),
                generation,
            },
        );
        promise
    }

    pub fn evict(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    fn evict_generation(&self, key: &K, generation: u64) {
        let mut entries = self.entries.lock();
        if entries
            .peek(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.pop(key);
        }
    }

    /// Whether a live (unexpired) promise exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|entry| entry.inserted_at.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_start(
        calls: Arc<AtomicUsize>,
        result: Result<u64, ()>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u64, ChainError>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                result.map_err(|_| ChainError::Transport("boom".to_string()))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let cache: Arc<PromiseCache<u64, u64>> =
            PromiseCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get_or_start(1, counting_start(calls.clone(), Ok(42)));
        let second = cache.get_or_start(1, counting_start(calls.clone(), Ok(43)));

        let (a, b) = futures::join!(first, second);
        assert_eq!(*a.unwrap(), 42);
        assert_eq!(*b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_evict_so_the_next_caller_retries() {
        let cache: Arc<PromiseCache<u64, u64>> =
            PromiseCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = cache.get_or_start(1, counting_start(calls.clone(), Err(())));
        assert!(failing.await.is_err());
        assert!(!cache.contains(&1));

        let retried = cache.get_or_start(1, counting_start(calls.clone(), Ok(7)));
        assert_eq!(*retried.await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_restart() {
        let cache: Arc<PromiseCache<u64, u64>> = PromiseCache::new(10, Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_start(1, counting_start(calls.clone(), Ok(1)))
            .await
            .unwrap();
        cache
            .get_or_start(1, counting_start(calls.clone(), Ok(2)))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn capacity_eviction_does_not_break_held_promises() {
        let cache: Arc<PromiseCache<u64, u64>> =
            PromiseCache::new(1, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let held = cache.get_or_start(1, counting_start(calls.clone(), Ok(11)));
        // Pushing a second key evicts the first from the map.
        let _other = cache.get_or_start(2, counting_start(calls.clone(), Ok(22)));
        assert!(!cache.contains(&1));

        // The held handle still resolves to its own terminal state.
        assert_eq!(*held.await.unwrap(), 11);
    }

    #[tokio::test]
    async fn explicit_evict_removes_the_entry() {
        let cache: Arc<PromiseCache<u64, u64>> =
            PromiseCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = cache.get_or_start(1, counting_start(calls.clone(), Ok(1)));
        assert!(cache.contains(&1));
        cache.evict(&1);
        assert!(cache.is_empty());
    }
}
