//! Typed cache store with check-and-set updates over a remote cache.

pub mod client;
pub mod domain;
pub mod ports;
pub mod protocol;
pub mod serializer;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientOptions, TcpCacheClient, TcpClientFactory};
pub use domain::{CacheEntry, CasResult, CheckResult, CheckValue, StorageOptions};
pub use ports::{CacheClient, ClientFactory, Serializer, SharedClient};
pub use serializer::JsonSerializer;
pub use store::CacheStore;

// Re-export Bytes for convenience
pub use bytes::Bytes;
