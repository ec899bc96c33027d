//! Resolved-media cache
//!
//! Process-wide map from a reference's canonical string to its resolved
//! handle. Concurrent resolutions of the same reference join one in-flight
//! fetch, so fragments are downloaded at most once per reference. Fetches
//! run on their own task: a caller that stops waiting does not cancel the
//! download, and the result still lands in the cache.

mod lru;

pub use lru::LruCache;

use crate::config::CacheConfig;
use crate::error::FetchError;
use crate::media::ResourceHandle;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

type FetchOutcome = Result<ResourceHandle, FetchError>;

/// A fetch shared by every caller waiting on the same reference
struct InflightFetch {
    id: u64,
    outcome: Shared<BoxFuture<'static, FetchOutcome>>,
}

#[derive(Default)]
struct CacheState {
    ready: HashMap<String, ResourceHandle>,
    inflight: HashMap<String, InflightFetch>,
    lru: LruCache<String>,
    next_fetch_id: u64,
    hits: u64,
    misses: u64,
    joined: u64,
    evictions: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resolved entries held
    pub entries: usize,
    /// Fetches currently running
    pub inflight: usize,
    /// Approximate bytes held by resolved entries
    pub bytes: usize,
    /// Lookups answered from resolved entries
    pub hits: u64,
    /// Lookups that started a fetch
    pub misses: u64,
    /// Lookups that joined a running fetch
    pub joined: u64,
    /// Entries dropped to respect `max_entries`
    pub evictions: u64,
}

/// Cache of resolved media, shared by `Arc`
pub struct MediaCache {
    state: Mutex<CacheState>,
    /// 0 = unbounded
    max_entries: usize,
}

impl MediaCache {
    /// Create an empty cache
    pub fn new(config: &CacheConfig) -> Self {
        MediaCache {
            state: Mutex::new(CacheState::default()),
            max_entries: config.max_entries,
        }
    }

    /// Create an unbounded cache
    pub fn unbounded() -> Self {
        Self::new(&CacheConfig::default())
    }

    /// Resolved handle for `key`, if cached
    pub fn get(&self, key: &str) -> Option<ResourceHandle> {
        let mut state = self.state.lock();
        let handle = state.ready.get(key).cloned()?;
        state.hits += 1;
        if self.max_entries > 0 {
            state.lru.touch(&key.to_string());
        }
        Some(handle)
    }

    /// Whether `key` is resolved
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().ready.contains_key(key)
    }

    /// Store a resolved handle
    pub fn insert(&self, key: &str, handle: ResourceHandle) {
        let mut state = self.state.lock();
        self.insert_locked(&mut state, key, handle);
    }

    fn insert_locked(&self, state: &mut CacheState, key: &str, handle: ResourceHandle) {
        state.ready.insert(key.to_string(), handle);
        if self.max_entries == 0 {
            return;
        }

        state.lru.insert(key.to_string());
        while state.ready.len() > self.max_entries {
            match state.lru.pop_oldest() {
                Some(oldest) => {
                    state.ready.remove(&oldest);
                    state.evictions += 1;
                    debug!("Evicted {} from media cache", abbreviate(&oldest));
                }
                None => break,
            }
        }
    }

    /// Return the cached handle for `key`, or run `fetch` to produce it
    ///
    /// Only the first caller's `fetch` runs; later callers for the same key
    /// wait on that fetch. Failures are not cached.
    pub async fn get_or_resolve<F>(self: &Arc<Self>, key: &str, fetch: F) -> FetchOutcome
    where
        F: Future<Output = FetchOutcome> + Send + 'static,
    {
        let outcome = {
            let mut state = self.state.lock();

            if let Some(handle) = state.ready.get(key).cloned() {
                state.hits += 1;
                if self.max_entries > 0 {
                    state.lru.touch(&key.to_string());
                }
                return Ok(handle);
            }

            if let Some(running) = state.inflight.get(key) {
                let outcome = running.outcome.clone();
                state.joined += 1;
                debug!("Joining in-flight fetch for {}", abbreviate(key));
                outcome
            } else {
                state.misses += 1;
                state.next_fetch_id += 1;
                let id = state.next_fetch_id;

                let cache = Arc::clone(self);
                let owned_key = key.to_string();
                let task = tokio::spawn(async move {
                    // A panicking fetch must still release its in-flight slot
                    let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(panic) => Err(FetchError::Aborted(panic_message(panic.as_ref()))),
                    };
                    cache.complete(&owned_key, id, &outcome);
                    outcome
                });

                let outcome = async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(FetchError::Aborted(e.to_string())),
                    }
                }
                .boxed()
                .shared();

                state.inflight.insert(
                    key.to_string(),
                    InflightFetch {
                        id,
                        outcome: outcome.clone(),
                    },
                );
                outcome
            }
        };

        outcome.await
    }

    /// Record the outcome of fetch `id` unless it was invalidated meanwhile
    fn complete(&self, key: &str, id: u64, outcome: &FetchOutcome) {
        let mut state = self.state.lock();
        if state.inflight.get(key).map(|f| f.id) != Some(id) {
            debug!("Discarding result of invalidated fetch for {}", abbreviate(key));
            return;
        }
        state.inflight.remove(key);

        match outcome {
            Ok(handle) => self.insert_locked(&mut state, key, handle.clone()),
            Err(e) => warn!("Resolution of {} failed: {}", abbreviate(key), e),
        }
    }

    /// Drop `key` and abandon any running fetch's claim to it
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.lru.remove(&key.to_string());
        let had_inflight = state.inflight.remove(key).is_some();
        state.ready.remove(key).is_some() || had_inflight
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.ready.clear();
        state.inflight.clear();
        state.lru.clear();
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.ready.len(),
            inflight: state.inflight.len(),
            bytes: state.ready.values().map(|h| h.size_hint()).sum(),
            hits: state.hits,
            misses: state.misses,
            joined: state.joined,
            evictions: state.evictions,
        }
    }
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("fetch panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("fetch panicked: {}", msg)
    } else {
        "fetch panicked".to_string()
    }
}

/// Shorten inline payload keys for log lines
fn abbreviate(key: &str) -> &str {
    match key.char_indices().nth(48) {
        Some((end, _)) => &key[..end],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn url(s: &str) -> ResourceHandle {
        ResourceHandle::Url(s.to_string())
    }

    #[tokio::test]
    async fn test_resolves_once_then_hits() {
        let cache = Arc::new(MediaCache::unbounded());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let handle = cache
                .get_or_resolve("k", async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(url("resolved"))
                })
                .await
                .unwrap();
            assert_eq!(handle, url("resolved"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Arc::new(MediaCache::unbounded());
        let calls = Arc::new(AtomicUsize::new(0));

        let waits = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_resolve("k", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(url("v"))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(waits).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref() == Ok(&url("v"))));
        assert_eq!(cache.stats().joined, 7);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = Arc::new(MediaCache::unbounded());

        let err = cache
            .get_or_resolve("k", async { Err(FetchError::NotFound("k".to_string())) })
            .await;
        assert!(err.is_err());
        assert!(!cache.contains("k"));

        let ok = cache.get_or_resolve("k", async { Ok(url("v")) }).await;
        assert_eq!(ok, Ok(url("v")));
    }

    #[tokio::test]
    async fn test_panicking_fetch_releases_key() {
        let cache = Arc::new(MediaCache::unbounded());

        let corrupt = true;
        let panicking = async move {
            if corrupt {
                panic!("corrupt manifest");
            }
            Ok(url("unreachable"))
        };
        let first = cache.get_or_resolve("k", panicking).await;
        match first {
            Err(FetchError::Aborted(msg)) => assert!(msg.contains("corrupt manifest")),
            other => panic!("expected Aborted, got {:?}", other),
        }
        assert_eq!(cache.stats().inflight, 0);
        assert!(!cache.contains("k"));

        let second = cache.get_or_resolve("k", async { Ok(url("repaired")) }).await;
        assert_eq!(second, Ok(url("repaired")));
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_populates_cache() {
        let cache = Arc::new(MediaCache::unbounded());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let waiting = cache.get_or_resolve("k", async move {
            let _ = rx.await;
            Ok(url("late"))
        });
        // Poll once so the fetch is registered, then detach the caller
        let _ = tokio::time::timeout(Duration::from_millis(10), waiting).await;
        assert_eq!(cache.stats().inflight, 1);

        tx.send(()).unwrap();
        for _ in 0..50 {
            if cache.contains("k") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.get("k"), Some(url("late")));
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_discards_result() {
        let cache = Arc::new(MediaCache::unbounded());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_resolve("k", async move {
                        let _ = rx.await;
                        Ok(url("stale"))
                    })
                    .await
            })
        };
        while cache.stats().inflight == 0 {
            tokio::task::yield_now().await;
        }

        assert!(cache.invalidate("k"));
        tx.send(()).unwrap();

        assert_eq!(pending.await.unwrap(), Ok(url("stale")));
        assert!(!cache.contains("k"));
    }

    #[test]
    fn test_bounded_cache_evicts_oldest() {
        let cache = MediaCache::new(&CacheConfig { max_entries: 2 });

        cache.insert("a", url("1"));
        cache.insert("b", url("2"));
        assert!(cache.get("a").is_some()); // a is now most recent
        cache.insert("c", url("3"));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_unbounded_cache_keeps_everything() {
        let cache = MediaCache::unbounded();
        for i in 0..100 {
            cache.insert(&i.to_string(), url("x"));
        }
        assert_eq!(cache.stats().entries, 100);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
