//! Error types for the kvjepsen harness.
//!
//! Store errors are data: an actor records them in its [`Report`](crate::Report)
//! and moves on. Harness errors are fatal and name the phase that failed.

use thiserror::Error;

/// Errors returned by a [`KvStore`](crate::store::KvStore) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network or socket failure talking to the store.
    #[error("I/O error: {0}")]
    Io(String),

    /// The store answered with something the client could not parse.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The store reported an error for the request.
    #[error("Server error: {0}")]
    Server(String),

    /// The store could not be reached or refused the request.
    #[error("Store unavailable")]
    Unavailable,

    /// A fault injected by the simulated store.
    #[error("Injected fault: {0}")]
    Injected(&'static str),

    /// The stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The compare-and-swap loop gave up after too many conflicts.
    #[error("CAS retries exhausted after {attempts} attempts")]
    CasRetriesExhausted {
        /// Number of transform rounds tried.
        attempts: u32,
    },

    /// Key not found (only for operations that require existence).
    #[error("Key not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Invalid run configuration, detected before any actor starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Unknown update mode string.
    #[error("Unknown update mode '{0}' (expected cas, naive or incr)")]
    UnknownMode(String),

    /// Actor count must be positive.
    #[error("Actor count must be at least 1")]
    NoActors,

    /// Workload size must be positive.
    #[error("Workload size must be at least 1")]
    EmptyWorkload,

    /// Key must not be empty.
    #[error("Key must not be empty")]
    EmptyKey,

    /// Unsupported or malformed store URL.
    #[error("Invalid store URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL as given.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Load generator has neither reads nor writes enabled.
    #[error("At least one of read-every / write-every must be positive")]
    NoOperations,

    /// Pool size must be positive.
    #[error("Pool size must be at least 1")]
    EmptyPool,

    /// The backend cannot honour the requested durability wait.
    #[error("The {backend} backend cannot wait for durability")]
    DurabilityUnsupported {
        /// Backend name.
        backend: &'static str,
    },
}

/// Fatal harness errors. Each variant names the phase that failed.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration was rejected.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Could not connect to the store.
    #[error("Unable to connect to the store: {0}")]
    Connect(StoreError),

    /// Could not initialize the shared value.
    #[error("Unable to initialize the value: {0}")]
    Initialize(StoreError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
