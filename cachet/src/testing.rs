//! In-memory stand-ins for the transport, used by the store tests.

use crate::domain::{CacheEntry, CasResult, CheckValue, StorageOptions};
use crate::ports::{CacheClient, ClientFactory};
use async_trait::async_trait;
use bytes::Bytes;
use shared::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Barrier, Notify};

/// Records every call and keeps entries with server-style check values.
#[derive(Default)]
pub(crate) struct FakeClient {
    entries: Mutex<HashMap<String, CacheEntry>>,
    options: Mutex<HashMap<String, StorageOptions>>,
    calls: Mutex<Vec<(&'static str, String)>>,
    failing: Mutex<HashSet<String>>,
    next_cas: AtomicU64,
    disposals: AtomicUsize,
    read_barrier: Option<Arc<Barrier>>,
}

impl FakeClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every `get` waits on `barrier` before answering.
    pub(crate) fn with_read_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.read_barrier = Some(barrier);
        self
    }

    pub(crate) fn insert(&self, key: &str, data: &'static str) {
        let cas = self.bump();
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), CacheEntry::new(data, cas));
    }

    pub(crate) fn fail_reads_of(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<(&'static str, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn reads(&self) -> usize {
        self.calls().iter().filter(|(op, _)| *op == "get").count()
    }

    pub(crate) fn last_options(&self, key: &str) -> Option<StorageOptions> {
        self.options.lock().unwrap().get(key).copied()
    }

    pub(crate) fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    fn record(&self, op: &'static str, key: &str) {
        self.calls.lock().unwrap().push((op, key.to_string()));
    }

    fn bump(&self) -> CheckValue {
        self.next_cas.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn store(&self, key: &str, value: Bytes, options: StorageOptions) {
        let cas = self.bump();
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), CacheEntry::new(value, cas));
        self.options.lock().unwrap().insert(key.to_string(), options);
    }
}

#[async_trait]
impl CacheClient for FakeClient {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.record("get", key);

        if let Some(barrier) = &self.read_barrier {
            barrier.wait().await;
        }

        if self.failing.lock().unwrap().contains(key) {
            return Err(Error::Transport(format!("read of {} failed", key)));
        }

        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|entry| entry.data.clone()))
    }

    async fn gets(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.record("gets", key);
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes, options: StorageOptions) -> Result<()> {
        self.record("set", key);
        self.store(key, value, options);
        Ok(())
    }

    async fn cas(
        &self,
        key: &str,
        check_value: CheckValue,
        value: Bytes,
        options: StorageOptions,
    ) -> Result<CasResult> {
        self.record("cas", key);

        let current = self.entries.lock().unwrap().get(key).map(|entry| entry.cas);
        match current {
            None => Ok(CasResult::NotFound),
            Some(cas) if cas != check_value => Ok(CasResult::Exists),
            Some(_) => {
                self.store(key, value, options);
                Ok(CasResult::Stored)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.record("delete", key);
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts connects and hands out one shared [`FakeClient`].
pub(crate) struct FakeClientFactory {
    client: Arc<FakeClient>,
    connects: AtomicUsize,
    attempts: Arc<AtomicUsize>,
    fail_first: usize,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeClientFactory {
    pub(crate) fn new() -> Self {
        Self {
            client: Arc::new(FakeClient::new()),
            connects: AtomicUsize::new(0),
            attempts: Arc::new(AtomicUsize::new(0)),
            fail_first: 0,
            gate: None,
        }
    }

    /// Connects signal `entered`, then park until `release` is notified.
    pub(crate) fn with_connect_gate(
        mut self,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    ) -> Self {
        self.gate = Some((entered, release));
        self
    }

    /// The first `n` connects fail; `attempts` counts every try.
    pub(crate) fn failing_first(mut self, n: usize, attempts: Arc<AtomicUsize>) -> Self {
        self.fail_first = n;
        self.attempts = attempts;
        self
    }

    pub(crate) fn client(&self) -> Arc<FakeClient> {
        self.client.clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn connect(&self) -> Result<Arc<dyn CacheClient>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(Error::Unavailable("connection refused".to_string()));
        }

        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }

        // yield so concurrent first users really overlap
        tokio::task::yield_now().await;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}
