#![deny(clippy::all)]

use crate::domain::{CacheEntry, CasResult, CheckValue, StorageOptions};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::Result;
use std::sync::Arc;

// Ports are the pluggable seams between the store and its collaborators

/// Port for the remote cache connection.
/// Keys arrive here already prefixed.
#[async_trait]
pub trait CacheClient: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    /// Like `get`, but also returns the entry's check value.
    async fn gets(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn set(&self, key: &str, value: Bytes, options: StorageOptions) -> Result<()>;
    async fn cas(
        &self,
        key: &str,
        check_value: CheckValue,
        value: Bytes,
        options: StorageOptions,
    ) -> Result<CasResult>;
    /// Returns true when an entry existed and was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Releases the connection. Called at most once per client by the store.
    async fn dispose(&self);
}

/// Port for creating the connection on first use.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn CacheClient>>;
}

/// Hands out a client that was built elsewhere.
pub struct SharedClient(pub Arc<dyn CacheClient>);

#[async_trait]
impl ClientFactory for SharedClient {
    async fn connect(&self) -> Result<Arc<dyn CacheClient>> {
        Ok(self.0.clone())
    }
}

/// Port for turning values into cache payloads and back.
pub trait Serializer: Send + Sync + 'static {
    fn serialize<V: Serialize + ?Sized>(&self, value: &V) -> Result<Bytes>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}
