//! Update strategies: how one actor records one element.
//!
//! The strategy is chosen once per run from [`UpdateMode`]. Each actor owns
//! an [`Updater`] holding its private decode cache; the cache is refreshed
//! from the store's bytes on every CAS round and is never authoritative.

use std::sync::Arc;

use crate::config::UpdateMode;
use crate::error::{StoreError, StoreResult};
use crate::store::{Durability, KvStore};
use crate::value::RemoteSet;

/// Result of one attempt: acknowledged iff no error.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// Whether the store acknowledged the update.
    pub acknowledged: bool,
    /// Error the store returned, if any.
    pub error: Option<StoreError>,
}

impl From<StoreResult<()>> for Attempt {
    fn from(result: StoreResult<()>) -> Self {
        match result {
            Ok(()) => Attempt {
                acknowledged: true,
                error: None,
            },
            Err(error) => Attempt {
                acknowledged: false,
                error: Some(error),
            },
        }
    }
}

impl Attempt {
    /// Back to a plain result.
    pub fn into_result(self) -> StoreResult<()> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// The three ways of recording an element against the shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Store-mediated compare-and-swap of the whole set.
    CasMerge,
    /// Get, insert locally, set unconditionally. Loses updates under races.
    NaiveReadModifyWrite,
    /// Atomic counter increment.
    AtomicIncrement,
}

impl From<UpdateMode> for UpdateStrategy {
    fn from(mode: UpdateMode) -> Self {
        match mode {
            UpdateMode::Cas => UpdateStrategy::CasMerge,
            UpdateMode::Naive => UpdateStrategy::NaiveReadModifyWrite,
            UpdateMode::Incr => UpdateStrategy::AtomicIncrement,
        }
    }
}

/// Per-actor executor of an [`UpdateStrategy`].
pub struct Updater {
    store: Arc<dyn KvStore>,
    key: String,
    strategy: UpdateStrategy,
    durability: Durability,
    cache: RemoteSet,
}

impl Updater {
    /// Create an updater for `key`.
    pub fn new(
        store: Arc<dyn KvStore>,
        key: impl Into<String>,
        strategy: UpdateStrategy,
        durability: Durability,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            strategy,
            durability,
            cache: RemoteSet::new(),
        }
    }

    /// Strategy in use.
    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    /// Make one attempt at recording `element`.
    pub async fn attempt(&mut self, element: &str) -> Attempt {
        let result = match self.strategy {
            UpdateStrategy::CasMerge => self.cas_merge(element).await,
            UpdateStrategy::NaiveReadModifyWrite => self.naive(element).await,
            UpdateStrategy::AtomicIncrement => self
                .store
                .increment(&self.key, 1, self.durability)
                .await
                .map(|_| ()),
        };
        result.into()
    }

    async fn cas_merge(&mut self, element: &str) -> StoreResult<()> {
        let cache = &mut self.cache;
        self.store
            .cas_update(&self.key, self.durability, &mut |current| {
                cache.refresh(current)?;
                cache.insert(element);
                cache.encode()
            })
            .await
    }

    async fn naive(&mut self, element: &str) -> StoreResult<()> {
        let current = self.store.get(&self.key).await?;
        self.cache.refresh(current.as_deref())?;
        self.cache.insert(element);
        let bytes = self.cache.encode()?;
        self.store.set(&self.key, bytes, self.durability).await
    }
}
