//! Stores that fail in controlled ways.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kvjepsen::store::{CasOutcome, CasToken};
use kvjepsen::{Durability, InMemoryStore, KvStore, RemoteSet, StoreError, StoreResult};

/// Rejects every CAS write that would add an odd-numbered element.
///
/// The rejected write is not applied, so odd elements end up completely lost.
#[derive(Debug, Default)]
pub struct OddElementsFail {
    inner: InMemoryStore,
}

impl OddElementsFail {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adds_odd_element(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        let current = RemoteSet::decode(self.inner.get(key).await?.as_deref())?;
        let next = RemoteSet::decode(Some(value))?;
        let adds_odd = next
            .iter()
            .filter(|element| !current.contains(element))
            .filter_map(|element| element.parse::<u64>().ok())
            .any(|index| index % 2 == 1);
        Ok(adds_odd)
    }
}

#[async_trait]
impl KvStore for OddElementsFail {
    fn name(&self) -> &'static str {
        "odd-fail"
    }

    fn supports_durability(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn gets(&self, key: &str) -> StoreResult<Option<(Vec<u8>, CasToken)>> {
        self.inner.gets(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, durability: Durability) -> StoreResult<()> {
        self.inner.set(key, value, durability).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<CasToken>,
        durability: Durability,
    ) -> StoreResult<CasOutcome> {
        if self.adds_odd_element(key, &value).await? {
            return Err(StoreError::Unavailable);
        }
        self.inner
            .compare_and_swap(key, value, expected, durability)
            .await
    }

    async fn increment(&self, key: &str, delta: u64, durability: Durability) -> StoreResult<u64> {
        self.inner.increment(key, delta, durability).await
    }
}

/// Fails every `every`-th increment without applying it.
#[derive(Debug)]
pub struct FlakyCounter {
    inner: InMemoryStore,
    every: u64,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl FlakyCounter {
    pub fn new(every: u64) -> Self {
        Self {
            inner: InMemoryStore::new(),
            every,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for FlakyCounter {
    fn name(&self) -> &'static str {
        "flaky-counter"
    }

    fn supports_durability(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn gets(&self, key: &str) -> StoreResult<Option<(Vec<u8>, CasToken)>> {
        self.inner.gets(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, durability: Durability) -> StoreResult<()> {
        self.inner.set(key, value, durability).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<CasToken>,
        durability: Durability,
    ) -> StoreResult<CasOutcome> {
        self.inner
            .compare_and_swap(key, value, expected, durability)
            .await
    }

    async fn increment(&self, key: &str, delta: u64, durability: Durability) -> StoreResult<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.every == 0 {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Server("temporary failure".to_string()));
        }
        self.inner.increment(key, delta, durability).await
    }
}

/// A store that cannot wait for persistence.
#[derive(Debug, Default)]
pub struct NoDurability {
    inner: InMemoryStore,
}

#[async_trait]
impl KvStore for NoDurability {
    fn name(&self) -> &'static str {
        "no-durability"
    }

    fn supports_durability(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn gets(&self, key: &str) -> StoreResult<Option<(Vec<u8>, CasToken)>> {
        self.inner.gets(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, durability: Durability) -> StoreResult<()> {
        self.inner.set(key, value, durability).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<CasToken>,
        durability: Durability,
    ) -> StoreResult<CasOutcome> {
        self.inner
            .compare_and_swap(key, value, expected, durability)
            .await
    }

    async fn increment(&self, key: &str, delta: u64, durability: Durability) -> StoreResult<u64> {
        self.inner.increment(key, delta, durability).await
    }
}
