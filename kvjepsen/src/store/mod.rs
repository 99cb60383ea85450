//! Key-value store abstraction.
//!
//! The harness only needs four primitives from a store: plain get and set,
//! a compare-and-swap update driven by a caller transform, and an atomic
//! counter increment. Every write carries a [`Durability`] request.
//!
//! - **KvStore**: trait implemented by every backend
//! - **InMemoryStore**: in-process store with seeded fault injection
//! - **MemcachedStore**: memcached text protocol over TCP

pub mod memcached;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConfigError, StoreError, StoreResult};

pub use memcached::MemcachedStore;
pub use memory::{InMemoryStore, StoreFaults};

/// Default memcached port, used when the URL omits one.
pub const DEFAULT_MEMCACHED_PORT: u16 = 11211;

/// Durability requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Return once the primary accepted the write.
    #[default]
    None,
    /// Do not return until the write is persisted.
    Persisted,
}

/// Opaque version token returned by [`KvStore::gets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasToken(
    /// Raw token value.
    pub u64,
);

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The value was replaced.
    Swapped,
    /// Another writer got there first; re-read and retry.
    Conflict,
}

/// Retry policy for [`KvStore::cas_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasRetryPolicy {
    /// Transform rounds tried before giving up.
    pub max_attempts: u32,
    /// Pause between rounds. Zero yields to the scheduler instead.
    pub backoff: Duration,
}

impl Default for CasRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10_000,
            backoff: Duration::ZERO,
        }
    }
}

/// Transform applied to the current bytes of a key (None when absent).
pub type Transform<'a> = dyn FnMut(Option<&[u8]>) -> StoreResult<Vec<u8>> + Send + 'a;

/// A key-value store the harness can race against.
///
/// Implementations must be shareable across actor tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether [`Durability::Persisted`] is honoured.
    fn supports_durability(&self) -> bool;

    /// Fetch a value.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Fetch a value with its CAS token.
    async fn gets(&self, key: &str) -> StoreResult<Option<(Vec<u8>, CasToken)>>;

    /// Store a value unconditionally.
    async fn set(&self, key: &str, value: Vec<u8>, durability: Durability) -> StoreResult<()>;

    /// Store a value only if the key still carries `expected`.
    ///
    /// `expected = None` means "only if the key does not exist".
    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<CasToken>,
        durability: Durability,
    ) -> StoreResult<CasOutcome>;

    /// Atomically add `delta` to a decimal counter, returning the new value.
    async fn increment(&self, key: &str, delta: u64, durability: Durability) -> StoreResult<u64>;

    /// Retry policy used by [`KvStore::cas_update`].
    fn cas_policy(&self) -> CasRetryPolicy {
        CasRetryPolicy::default()
    }

    /// Apply `transform` to the current value atomically.
    ///
    /// Re-reads and re-applies the transform on every conflict, so the
    /// transform must be pure with respect to the bytes it is given.
    async fn cas_update(
        &self,
        key: &str,
        durability: Durability,
        transform: &mut Transform<'_>,
    ) -> StoreResult<()> {
        let policy = self.cas_policy();
        for _ in 0..policy.max_attempts {
            let current = self.gets(key).await?;
            let (bytes, token) = match &current {
                Some((bytes, token)) => (Some(bytes.as_slice()), Some(*token)),
                None => (None, None),
            };
            let next = transform(bytes)?;
            match self.compare_and_swap(key, next, token, durability).await? {
                CasOutcome::Swapped => return Ok(()),
                CasOutcome::Conflict => {
                    if policy.backoff.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
            }
        }
        Err(StoreError::CasRetriesExhausted {
            attempts: policy.max_attempts,
        })
    }
}

/// Where the store lives, parsed from the `--url` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocator {
    /// In-process simulated store.
    Memory,
    /// Memcached-protocol endpoint.
    Memcached {
        /// `host:port` to connect to.
        address: String,
    },
}

impl StoreLocator {
    /// Parse a store URL.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        match scheme {
            "memory" | "mem" => Ok(StoreLocator::Memory),
            "memcached" => {
                let authority = rest.trim_end_matches('/');
                if authority.is_empty() || authority.contains('/') {
                    return Err(invalid("expected memcached://host:port"));
                }
                let address = match authority.rsplit_once(':') {
                    Some((host, port)) => {
                        if host.is_empty() {
                            return Err(invalid("missing host"));
                        }
                        port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                        authority.to_string()
                    }
                    None => format!("{authority}:{DEFAULT_MEMCACHED_PORT}"),
                };
                Ok(StoreLocator::Memcached { address })
            }
            _ => Err(invalid("unsupported scheme (use memory:// or memcached://)")),
        }
    }
}

impl fmt::Display for StoreLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocator::Memory => write!(f, "memory://"),
            StoreLocator::Memcached { address } => write!(f, "memcached://{address}"),
        }
    }
}

/// Settings used when opening a store.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// Key namespace.
    pub bucket: String,
    /// Connections to open.
    pub pool_size: usize,
    /// Faults for the simulated store; ignored by network backends.
    pub faults: StoreFaults,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            bucket: "default".to_string(),
            pool_size: 4,
            faults: StoreFaults::default(),
        }
    }
}

/// Open the store named by `locator`.
pub async fn connect(
    locator: &StoreLocator,
    settings: &ConnectSettings,
) -> StoreResult<Arc<dyn KvStore>> {
    match locator {
        StoreLocator::Memory => Ok(Arc::new(InMemoryStore::with_faults(
            settings.faults.clone(),
        ))),
        StoreLocator::Memcached { address } => {
            let store =
                MemcachedStore::connect(address, &settings.bucket, settings.pool_size).await?;
            Ok(Arc::new(store))
        }
    }
}
