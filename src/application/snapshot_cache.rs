use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use uuid::Uuid;

use crate::{
    app_error::AppResult,
    domain::entities::snapshot::{SubscriptionSnapshot, UsageSnapshot},
};

struct CacheEntry<V> {
    data: V,
    fetched_at: Instant,
}

struct Slots<V> {
    entries: HashMap<Uuid, CacheEntry<V>>,
    /// Last invalidation per account, kept for one TTL.
    invalidated: HashMap<Uuid, Instant>,
}

/// Read-through TTL cache keyed by account id.
///
/// A fetch that started before the account's latest invalidation does not
/// store its (possibly stale) result. Invalidating one account never blocks
/// fills for another.
pub struct SnapshotCache<V> {
    ttl: Duration,
    slots: Mutex<Slots<V>>,
}

impl<V: Clone> SnapshotCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                invalidated: HashMap::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Slots<V>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached value if it is younger than the TTL.
    pub fn get(&self, account_id: Uuid) -> Option<V> {
        self.lock()
            .entries
            .get(&account_id)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.data.clone())
    }

    pub fn insert(&self, account_id: Uuid, data: V) {
        self.lock().entries.insert(
            account_id,
            CacheEntry {
                data,
                fetched_at: Instant::now(),
            },
        );
    }

    pub async fn get_or_fetch<F, Fut>(&self, account_id: Uuid, fetch: F) -> AppResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<V>>,
    {
        if let Some(hit) = self.get(account_id) {
            return Ok(hit);
        }

        let started = Instant::now();
        let data = fetch().await?;

        let mut slots = self.lock();
        let raced = slots
            .invalidated
            .get(&account_id)
            .is_some_and(|at| *at >= started);
        // Invalidation marks only live for one TTL, so a slower fetch can no
        // longer prove it is current.
        if raced || started.elapsed() >= self.ttl {
            tracing::debug!(%account_id, "Skipping cache fill that raced an invalidation");
        } else {
            slots.entries.insert(
                account_id,
                CacheEntry {
                    data: data.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(data)
    }

    pub fn invalidate(&self, account_id: Uuid) {
        let mut slots = self.lock();
        slots.invalidated.insert(account_id, Instant::now());
        slots.entries.remove(&account_id);
    }

    /// Drop expired entries and invalidation marks. Returns how many entries were removed.
    pub fn sweep(&self) -> usize {
        let mut slots = self.lock();
        let before = slots.entries.len();
        slots
            .entries
            .retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        slots.invalidated.retain(|_, at| at.elapsed() < self.ttl);
        before - slots.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

/// The two caches in front of the ledger: full snapshots and usage-only reads.
pub struct SnapshotCaches {
    pub snapshots: SnapshotCache<SubscriptionSnapshot>,
    pub usage: SnapshotCache<UsageSnapshot>,
}

impl SnapshotCaches {
    pub fn new(snapshot_ttl: Duration, usage_ttl: Duration) -> Self {
        Self {
            snapshots: SnapshotCache::new(snapshot_ttl),
            usage: SnapshotCache::new(usage_ttl),
        }
    }

    pub fn invalidate(&self, account_id: Uuid) {
        self.snapshots.invalidate(account_id);
        self.usage.invalidate(account_id);
    }

    pub fn sweep(&self) -> usize {
        self.snapshots.sweep() + self.usage.sweep()
    }
}

impl Default for SnapshotCaches {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn hit_within_ttl_skips_fetch() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_fetch(id, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7u32)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let cache = SnapshotCache::new(Duration::ZERO);
        let id = Uuid::new_v4();
        cache.insert(id, 1u32);

        assert_eq!(cache.get(id), None);
        let value = cache.get_or_fetch(id, || async { Ok(2u32) }).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn fetch_errors_are_not_cached() {
        let cache: SnapshotCache<u32> = SnapshotCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        let result = cache
            .get_or_fetch(id, || async { Err(AppError::Database("down".into())) })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidation_during_fetch_prevents_stale_fill() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        let value = cache
            .get_or_fetch(id, || async {
                // A writer commits and invalidates while this read is in flight.
                cache.invalidate(id);
                Ok(1u32)
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(cache.get(id), None);
    }

    #[tokio::test]
    async fn invalidating_another_account_does_not_block_fill() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        let filled = Uuid::new_v4();
        let written = Uuid::new_v4();

        cache
            .get_or_fetch(filled, || async {
                cache.invalidate(written);
                Ok(3u32)
            })
            .await
            .unwrap();

        assert_eq!(cache.get(filled), Some(3));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = SnapshotCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.insert(id, 5u32);
        cache.invalidate(id);
        assert_eq!(cache.get(id), None);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let expired = SnapshotCache::new(Duration::ZERO);
        expired.insert(Uuid::new_v4(), 1u32);
        expired.insert(Uuid::new_v4(), 2u32);
        assert_eq!(expired.sweep(), 2);
        assert!(expired.is_empty());

        let fresh = SnapshotCache::new(Duration::from_secs(60));
        fresh.insert(Uuid::new_v4(), 1u32);
        assert_eq!(fresh.sweep(), 0);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn caches_invalidate_both_views() {
        let caches = SnapshotCaches::default();
        let id = Uuid::new_v4();
        let snapshot = SubscriptionSnapshot::default_for(id);
        caches.usage.insert(id, snapshot.usage());
        caches.snapshots.insert(id, snapshot);

        caches.invalidate(id);
        assert!(caches.snapshots.get(id).is_none());
        assert!(caches.usage.get(id).is_none());
    }
}
