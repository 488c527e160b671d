use crate::client::{ClientOptions, TcpClientFactory};
use crate::domain::{CasResult, CheckResult, CheckValue, StorageOptions};
use crate::ports::{CacheClient, ClientFactory, Serializer, SharedClient};
use crate::serializer::JsonSerializer;
use futures::future::try_join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::Config;
use shared::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace};

/// `None` marks a store that was disposed before it ever connected.
type Handle = Option<Arc<dyn CacheClient>>;

/// Typed facade over a remote cache.
///
/// Every key is namespaced with the configured prefix before it reaches the
/// transport. The connection is created on the first operation and shared by
/// all later ones; constructing a store never touches the network.
pub struct CacheStore<S = JsonSerializer> {
    client: OnceCell<Handle>,
    factory: Arc<dyn ClientFactory>,
    serializer: S,
    prefix: String,
    disposed: AtomicBool,
}

impl CacheStore<JsonSerializer> {
    /// Connects to the default cache address with the default pool settings.
    /// The key prefix comes from the environment.
    pub fn new() -> Self {
        Self::with_factory(
            Arc::new(TcpClientFactory::new(ClientOptions::default())),
            JsonSerializer,
            Config::from_env().prefix,
        )
    }

    /// Connects to the host and port named in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_factory(
            Arc::new(TcpClientFactory::new(ClientOptions::with_address(
                config.address(),
            ))),
            JsonSerializer,
            config.prefix.clone(),
        )
    }

    /// Uses a client that was built elsewhere, e.g. one shared between stores.
    pub fn with_client(client: Arc<dyn CacheClient>) -> Self {
        Self::with_factory(
            Arc::new(SharedClient(client)),
            JsonSerializer,
            Config::from_env().prefix,
        )
    }
}

impl Default for CacheStore<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> CacheStore<S> {
    pub fn with_factory(
        factory: Arc<dyn ClientFactory>,
        serializer: S,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client: OnceCell::new(),
            factory,
            serializer,
            prefix: prefix.into(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Stores `value` under `key`. A zero `expires_in` keeps the entry until
    /// it is removed or evicted.
    pub async fn set<V>(&self, key: &str, value: &V, expires_in: Duration) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let payload = self.serializer.serialize(value)?;
        let key = self.prefixed(key);
        trace!("set {} ({} bytes, ttl {:?})", key, payload.len(), expires_in);

        self.client()
            .await?
            .set(&key, payload, StorageOptions::from_ttl(expires_in))
            .await
    }

    /// Reads `key`. A miss is `Ok(None)`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let client = self.client().await?;
        self.read(client.as_ref(), key).await
    }

    /// Reads every key concurrently. All reads are issued before any is
    /// awaited; the first transport failure fails the whole batch.
    ///
    /// Every requested key is present in the result, mapped to `None` on a miss.
    pub async fn get_many<T, I, K>(&self, keys: I) -> Result<HashMap<String, Option<T>>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<String> = keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .filter(|k| seen.insert(k.clone()))
            .collect();

        let client = self.client().await?;
        debug!("Fetching {} key(s) concurrently", unique.len());

        let reads = unique
            .iter()
            .map(|key| self.read::<T>(client.as_ref(), key));
        let values = try_join_all(reads).await?;

        Ok(unique.into_iter().zip(values).collect())
    }

    /// Removes `key`. Returns false when nothing was stored under it.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let key = self.prefixed(key);
        self.client().await?.delete(&key).await
    }

    /// Stores `value` only if the entry still carries `check_value`.
    ///
    /// Returns false when the entry changed since it was read or no longer
    /// exists; callers retry their read-modify-write cycle on false.
    pub async fn set_with_check<V>(
        &self,
        key: &str,
        check_value: CheckValue,
        value: &V,
        expires_in: Duration,
    ) -> Result<bool>
    where
        V: Serialize + ?Sized,
    {
        let payload = self.serializer.serialize(value)?;
        let key = self.prefixed(key);

        let outcome = self
            .client()
            .await?
            .cas(&key, check_value, payload, StorageOptions::from_ttl(expires_in))
            .await?;

        match outcome {
            CasResult::Stored => Ok(true),
            CasResult::Exists => {
                debug!("CAS on {} lost: check value {} is stale", key, check_value);
                Ok(false)
            }
            CasResult::NotFound => {
                debug!("CAS on {} lost: entry no longer exists", key);
                Ok(false)
            }
        }
    }

    /// Like [`set_with_check`](Self::set_with_check), taking the token from a
    /// prior [`get_with_check`](Self::get_with_check).
    ///
    /// Fails with [`Error::MissingCheckValue`] when that read was a miss.
    pub async fn set_checked<T, V>(
        &self,
        key: &str,
        previous: &CheckResult<T>,
        value: &V,
        expires_in: Duration,
    ) -> Result<bool>
    where
        V: Serialize + ?Sized,
    {
        let check_value = previous.check_value.ok_or(Error::MissingCheckValue)?;
        self.set_with_check(key, check_value, value, expires_in)
            .await
    }

    /// Reads `key` together with its check value.
    pub async fn get_with_check<T: DeserializeOwned>(&self, key: &str) -> Result<CheckResult<T>> {
        let key = self.prefixed(key);

        match self.client().await?.gets(&key).await? {
            Some(entry) => {
                let value = self.serializer.deserialize(&entry.data)?;
                Ok(CheckResult::found(value, entry.cas))
            }
            None => Ok(CheckResult::missing()),
        }
    }

    /// Releases the connection if one was ever made. Safe to call repeatedly.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Seals an unused cell, or waits for an in-flight connect to finish.
        let handle = self.client.get_or_init(|| async { None }).await;

        match handle {
            Some(client) => {
                client.dispose().await;
                info!("Cache store disposed");
            }
            None => debug!("Cache store disposed before first use"),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn read<T: DeserializeOwned>(
        &self,
        client: &dyn CacheClient,
        key: &str,
    ) -> Result<Option<T>> {
        match client.get(&self.prefixed(key)).await? {
            Some(bytes) => Ok(Some(self.serializer.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn client(&self) -> Result<Arc<dyn CacheClient>> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let handle = self
            .client
            .get_or_try_init(|| async {
                if self.is_disposed() {
                    return Ok(None);
                }
                info!("Opening cache connection");
                self.factory.connect().await.map(Some)
            })
            .await?;

        handle.clone().ok_or(Error::Disposed)
    }
}

impl<S> std::fmt::Debug for CacheStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("prefix", &self.prefix)
            .field("connected", &matches!(self.client.get(), Some(Some(_))))
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}
