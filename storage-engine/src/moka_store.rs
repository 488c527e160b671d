use crate::VersionedStore;
use async_trait::async_trait;
use bytes::Bytes;
use cachet::domain::{CacheEntry, CasResult, CheckValue};
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::Op;
use shared::{Result, TtlMs};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct StoredValue {
    data: Bytes,
    cas: CheckValue,
    ttl: Option<Duration>,
}

/// Each entry expires after its own TTL; `None` never expires.
struct PerEntryTtl;

impl Expiry<Bytes, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &Bytes,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &Bytes,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Moka-based versioned store with per-entry TTL
/// Provides lock-free reads and per-key atomic check-and-set
pub struct MokaStore {
    cache: Cache<Bytes, StoredValue>,
    versions: Arc<AtomicU64>,
}

impl MokaStore {
    /// Create a new unbounded store
    pub fn new_unbounded() -> Self {
        Self::new(None)
    }

    /// Create a new store holding at most `max_entries`
    pub fn new_bounded(max_entries: u64) -> Self {
        Self::new(Some(max_entries))
    }

    pub fn new(max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name("cachet").expire_after(PerEntryTtl);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
            versions: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_version(&self) -> CheckValue {
        self.versions.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for MokaStore {
    fn default() -> Self {
        Self::new_unbounded()
    }
}

#[async_trait]
impl VersionedStore for MokaStore {
    async fn get(&self, key: &Bytes) -> Result<Option<CacheEntry>> {
        // Either doesn't exist or TTL expired
        Ok(self
            .cache
            .get(key)
            .await
            .map(|stored| CacheEntry::new(stored.data, stored.cas)))
    }

    async fn set(&self, key: Bytes, data: Bytes, ttl: TtlMs) -> Result<CheckValue> {
        let cas = self.next_version();
        let value = StoredValue {
            data,
            cas,
            ttl: ttl.as_duration(),
        };
        self.cache.insert(key, value).await;
        Ok(cas)
    }

    async fn cas(
        &self,
        key: Bytes,
        expected: CheckValue,
        data: Bytes,
        ttl: TtlMs,
    ) -> Result<CasResult> {
        let mut outcome = CasResult::NotFound;

        // The compute closure runs under moka's per-key lock, so the check
        // and the replacement are atomic with respect to other writers.
        self.cache
            .entry(key)
            .and_compute_with(|current| {
                let op = match current {
                    None => Op::Nop,
                    Some(entry) if entry.value().cas != expected => {
                        outcome = CasResult::Exists;
                        Op::Nop
                    }
                    Some(_) => {
                        outcome = CasResult::Stored;
                        Op::Put(StoredValue {
                            data,
                            cas: self.next_version(),
                            ttl: ttl.as_duration(),
                        })
                    }
                };
                std::future::ready(op)
            })
            .await;

        Ok(outcome)
    }

    async fn delete(&self, key: &Bytes) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }
}

impl Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .field("last_version", &self.versions.load(Ordering::SeqCst))
            .finish()
    }
}
