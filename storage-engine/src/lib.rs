pub mod moka_store;

use async_trait::async_trait;
use bytes::Bytes;
use cachet::domain::{CacheEntry, CasResult, CheckValue};
use shared::{Result, TtlMs};

pub use moka_store::MokaStore;

/// Port for the server-side storage backend.
///
/// Every write assigns the entry a fresh check value; `cas` only replaces an
/// entry whose current check value equals `expected`.
#[async_trait]
pub trait VersionedStore: Send + Sync + 'static {
    async fn get(&self, key: &Bytes) -> Result<Option<CacheEntry>>;
    async fn set(&self, key: Bytes, data: Bytes, ttl: TtlMs) -> Result<CheckValue>;
    async fn cas(
        &self,
        key: Bytes,
        expected: CheckValue,
        data: Bytes,
        ttl: TtlMs,
    ) -> Result<CasResult>;
    async fn delete(&self, key: &Bytes) -> Result<bool>;
}
