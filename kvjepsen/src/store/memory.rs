//! In-memory store with seeded fault injection.
//!
//! Every key carries a version that doubles as its CAS token, so conditional
//! writes are linearizable. Latency is injected outside the lock: a reader
//! gets its snapshot, then waits, which leaves room for concurrent naive
//! writers to clobber each other.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{StoreError, StoreResult};
use crate::store::{CasOutcome, CasToken, Durability, KvStore};
use crate::value::parse_counter;

/// Fault and latency settings for [`InMemoryStore`].
///
/// | Fault | Effect | Outcome it provokes |
/// |-------|--------|---------------------|
/// | `write_fault_probability` | rejected, nothing applied | completely lost |
/// | `ambiguous_fault_probability` | applied, error returned | durable but unacknowledged |
/// | `phantom_write_probability` | success returned, nothing applied | acknowledged but lost |
#[derive(Debug, Clone, PartialEq)]
pub struct StoreFaults {
    /// Delay after a read snapshot is taken.
    pub read_latency: Duration,
    /// Delay before a write is applied.
    pub write_latency: Duration,
    /// Extra delay after a write when persistence is requested.
    pub persist_latency: Duration,
    /// Probability that a write is rejected.
    pub write_fault_probability: f64,
    /// Probability that a write is applied but reported as failed.
    pub ambiguous_fault_probability: f64,
    /// Probability that a write is reported as applied but dropped.
    pub phantom_write_probability: f64,
    /// Seed for the fault RNG.
    pub seed: u64,
}

impl Default for StoreFaults {
    fn default() -> Self {
        Self {
            read_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
            persist_latency: Duration::ZERO,
            write_fault_probability: 0.0,
            ambiguous_fault_probability: 0.0,
            phantom_write_probability: 0.0,
            seed: 0,
        }
    }
}

impl StoreFaults {
    /// No faults, no latency.
    pub fn none() -> Self {
        Self::default()
    }

    /// Symmetric read/write latency, no faults.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            read_latency: latency,
            write_latency: latency,
            ..Self::default()
        }
    }

    fn any_write_fault(&self) -> bool {
        self.write_fault_probability > 0.0
            || self.ambiguous_fault_probability > 0.0
            || self.phantom_write_probability > 0.0
    }
}

/// What happens to a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFate {
    Apply,
    Reject,
    Ambiguous,
    Phantom,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    version: u64,
}

#[derive(Debug)]
struct Inner {
    data: HashMap<String, Entry>,
    next_version: u64,
    rng: StdRng,
}

impl Inner {
    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.next_version += 1;
        let version = self.next_version;
        self.data.insert(key.to_string(), Entry { value, version });
    }
}

/// Linearizable in-memory store.
#[derive(Debug)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    faults: StoreFaults,
}

impl InMemoryStore {
    /// Create a fault-free store.
    pub fn new() -> Self {
        Self::with_faults(StoreFaults::none())
    }

    /// Create a store with the given faults.
    pub fn with_faults(faults: StoreFaults) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: HashMap::new(),
                next_version: 0,
                rng: StdRng::seed_from_u64(faults.seed),
            }),
            faults,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fate(&self, inner: &mut Inner) -> WriteFate {
        if !self.faults.any_write_fault() {
            return WriteFate::Apply;
        }
        let roll: f64 = inner.rng.random();
        let mut threshold = self.faults.write_fault_probability;
        if roll < threshold {
            return WriteFate::Reject;
        }
        threshold += self.faults.ambiguous_fault_probability;
        if roll < threshold {
            return WriteFate::Ambiguous;
        }
        threshold += self.faults.phantom_write_probability;
        if roll < threshold {
            return WriteFate::Phantom;
        }
        WriteFate::Apply
    }

    async fn pause(duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    async fn persist(&self, durability: Durability) {
        if durability == Durability::Persisted {
            Self::pause(self.faults.persist_latency).await;
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports_durability(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value = self.lock().data.get(key).map(|entry| entry.value.clone());
        Self::pause(self.faults.read_latency).await;
        Ok(value)
    }

    async fn gets(&self, key: &str) -> StoreResult<Option<(Vec<u8>, CasToken)>> {
        let value = self
            .lock()
            .data
            .get(key)
            .map(|entry| (entry.value.clone(), CasToken(entry.version)));
        Self::pause(self.faults.read_latency).await;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, durability: Durability) -> StoreResult<()> {
        Self::pause(self.faults.write_latency).await;
        let fate = {
            let mut inner = self.lock();
            let fate = self.fate(&mut inner);
            if matches!(fate, WriteFate::Apply | WriteFate::Ambiguous) {
                inner.put(key, value);
            }
            fate
        };
        self.persist(durability).await;
        match fate {
            WriteFate::Reject => Err(StoreError::Injected("write rejected")),
            WriteFate::Ambiguous => Err(StoreError::Injected("ambiguous write")),
            WriteFate::Apply | WriteFate::Phantom => Ok(()),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<CasToken>,
        durability: Durability,
    ) -> StoreResult<CasOutcome> {
        Self::pause(self.faults.write_latency).await;
        let fate = {
            let mut inner = self.lock();
            let current = inner.data.get(key).map(|entry| CasToken(entry.version));
            if current != expected {
                return Ok(CasOutcome::Conflict);
            }
            let fate = self.fate(&mut inner);
            if matches!(fate, WriteFate::Apply | WriteFate::Ambiguous) {
                inner.put(key, value);
            }
            fate
        };
        self.persist(durability).await;
        match fate {
            WriteFate::Reject => Err(StoreError::Injected("write rejected")),
            WriteFate::Ambiguous => Err(StoreError::Injected("ambiguous write")),
            WriteFate::Apply | WriteFate::Phantom => Ok(CasOutcome::Swapped),
        }
    }

    async fn increment(&self, key: &str, delta: u64, durability: Durability) -> StoreResult<u64> {
        Self::pause(self.faults.write_latency).await;
        let (fate, next) = {
            let mut inner = self.lock();
            let current = match inner.data.get(key) {
                Some(entry) => parse_counter(&entry.value)?,
                None => return Err(StoreError::NotFound(key.to_string())),
            };
            let next = current.wrapping_add(delta);
            let fate = self.fate(&mut inner);
            if matches!(fate, WriteFate::Apply | WriteFate::Ambiguous) {
                inner.put(key, next.to_string().into_bytes());
            }
            (fate, next)
        };
        self.persist(durability).await;
        match fate {
            WriteFate::Reject => Err(StoreError::Injected("increment rejected")),
            WriteFate::Ambiguous => Err(StoreError::Injected("ambiguous increment")),
            WriteFate::Apply | WriteFate::Phantom => Ok(next),
        }
    }
}
