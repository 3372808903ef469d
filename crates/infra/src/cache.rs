//! Versioned snapshot cache with single-flight rebuilds.
//!
//! Readers get an `Arc` to an immutable snapshot and never block on a lock
//! while holding it. Invalidation removes the slot; the next reader rebuilds
//! and in-flight readers keep the snapshot they already hold. Concurrent misses
//! on the same key share one build.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;

/// Immutable, versioned value installed by a cache rebuild.
#[derive(Debug)]
pub struct Snapshot<V> {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    value: V,
}

impl<V> Snapshot<V> {
    pub fn value(&self) -> &V {
        &self.value
    }
}

impl<V> Deref for Snapshot<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
    pub version: u64,
    pub hits: u64,
    pub misses: u64,
    pub rebuilds: u64,
    pub invalidations: u64,
}

type Slot<V> = Arc<OnceCell<Arc<Snapshot<V>>>>;

pub struct SnapshotCache<K, V> {
    name: &'static str,
    slots: Mutex<HashMap<K, Slot<V>>>,
    version: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    rebuilds: AtomicU64,
    invalidations: AtomicU64,
}

impl<K, V> std::fmt::Debug for SnapshotCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("name", &self.name)
            .field("version", &self.version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K, V> SnapshotCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the current snapshot for `key`, building it on a miss.
    ///
    /// Only one `build` runs per key at a time; other callers wait for its
    /// result. A failed build installs nothing, so the next caller retries.
    pub async fn get_or_build<F, Fut, E>(&self, key: &K, build: F) -> Result<Arc<Snapshot<V>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key.clone()).or_default().clone()
        };

        if let Some(snapshot) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(snapshot));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let snapshot = slot
            .get_or_try_init(|| async {
                self.rebuilds.fetch_add(1, Ordering::Relaxed);
                let value = build().await?;
                let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Arc::new(Snapshot {
                    version,
                    built_at: Utc::now(),
                    value,
                }))
            })
            .await?;
        Ok(Arc::clone(snapshot))
    }

    /// Current snapshot for `key` without building.
    pub fn peek(&self, key: &K) -> Option<Arc<Snapshot<V>>> {
        let slots = self.slots.lock();
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Drop the slot for `key` if it still holds `snapshot`.
    ///
    /// Used for values not worth keeping; it does not count as an invalidation.
    pub fn discard(&self, key: &K, snapshot: &Arc<Snapshot<V>>) {
        let mut slots = self.slots.lock();
        let current = slots
            .get(key)
            .and_then(|slot| slot.get())
            .is_some_and(|held| Arc::ptr_eq(held, snapshot));
        if current {
            slots.remove(key);
        }
    }

    pub fn invalidate(&self, key: &K) {
        let removed = self.slots.lock().remove(key);
        if removed.is_some() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn invalidate_all(&self) {
        let removed = {
            let mut slots = self.slots.lock();
            std::mem::take(&mut *slots)
        };
        self.invalidations
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count();
        CacheStats {
            name: self.name,
            entries,
            version: self.version.load(Ordering::SeqCst),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn second_read_returns_the_same_snapshot() {
        let cache: SnapshotCache<(), Vec<u32>> = SnapshotCache::new("test");
        let a = cache
            .get_or_build(&(), || async { Ok::<_, ()>(vec![1, 2, 3]) })
            .await
            .unwrap();
        let b = cache
            .get_or_build(&(), || async { Ok::<_, ()>(vec![9]) })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b.value(), vec![1, 2, 3]);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.rebuilds), (1, 1, 1));
    }

    #[tokio::test]
    async fn invalidation_forces_a_new_version() {
        let cache: SnapshotCache<u8, &'static str> = SnapshotCache::new("test");
        let old = cache.get_or_build(&1, || async { Ok::<_, ()>("old") }).await.unwrap();

        cache.invalidate(&1);
        assert!(cache.peek(&1).is_none());

        let new = cache.get_or_build(&1, || async { Ok::<_, ()>("new") }).await.unwrap();
        assert!(new.version > old.version);
        assert_eq!(**old, "old");
        assert_eq!(**new, "new");
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn failed_build_is_not_cached() {
        let cache: SnapshotCache<(), u32> = SnapshotCache::new("test");
        let err = cache
            .get_or_build(&(), || async { Err::<u32, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(cache.peek(&()).is_none());

        let ok = cache.get_or_build(&(), || async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(**ok, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_build() {
        let cache = Arc::new(SnapshotCache::<(), usize>::new("test"));
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build(&(), || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(42)
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut snapshots = Vec::new();
        for handle in handles {
            snapshots.push(handle.await.unwrap());
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
    }

    #[tokio::test]
    async fn discard_only_removes_the_snapshot_it_was_given() {
        let cache: SnapshotCache<u8, u8> = SnapshotCache::new("test");
        let stale = cache.get_or_build(&1, || async { Ok::<_, ()>(1) }).await.unwrap();
        cache.invalidate(&1);
        let fresh = cache.get_or_build(&1, || async { Ok::<_, ()>(2) }).await.unwrap();

        cache.discard(&1, &stale);
        assert!(cache.peek(&1).is_some_and(|s| Arc::ptr_eq(&s, &fresh)));

        cache.discard(&1, &fresh);
        assert!(cache.peek(&1).is_none());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn invalidate_all_clears_every_key() {
        let cache: SnapshotCache<u8, u8> = SnapshotCache::new("test");
        for k in 0..3 {
            cache.get_or_build(&k, || async move { Ok::<_, ()>(k) }).await.unwrap();
        }
        assert_eq!(cache.stats().entries, 3);

        cache.invalidate_all();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().invalidations, 3);
    }
}
