//! Run configuration for the checker and the load generator.
//!
//! Options are plain structs with defaults matching the command line. They are
//! validated once, before the store is contacted or any actor is spawned.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::store::{ConnectSettings, Durability, StoreFaults, StoreLocator};

/// Default number of report slots per actor in the shared channel.
pub const DEFAULT_CHANNEL_CAPACITY_PER_ACTOR: usize = 1000;

/// Total report slots for `actors` actors, clamped to what a channel can hold.
fn scaled_capacity(per_actor: usize, actors: usize) -> usize {
    per_actor
        .max(1)
        .saturating_mul(actors.max(1))
        .min(tokio::sync::Semaphore::MAX_PERMITS)
}

/// How each actor records its element against the shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateMode {
    /// Compare-and-swap merge into a JSON set.
    Cas,
    /// Unconditional get-then-set of the JSON set.
    Naive,
    /// Atomic increment of a counter.
    Incr,
}

impl UpdateMode {
    /// Whether the shared value is a counter rather than a set.
    pub fn is_counter(self) -> bool {
        matches!(self, UpdateMode::Incr)
    }

    /// Canonical lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateMode::Cas => "cas",
            UpdateMode::Naive => "naive",
            UpdateMode::Incr => "incr",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cas" => Ok(UpdateMode::Cas),
            "naive" => Ok(UpdateMode::Naive),
            "incr" => Ok(UpdateMode::Incr),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Configuration of a lost-update check run.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Store URL (`memory://` or `memcached://host:port`).
    pub url: String,
    /// Bucket (key namespace) holding the shared value.
    pub bucket: String,
    /// Key of the shared value.
    pub key: String,
    /// Number of concurrent actors.
    pub actors: usize,
    /// Number of elements (or increments) to record.
    pub setsize: u64,
    /// Update strategy.
    pub mode: UpdateMode,
    /// Durability requested for every write.
    pub durability: Durability,
    /// Connections opened to the store.
    pub pool_size: usize,
    /// Report channel slots per actor.
    pub channel_capacity_per_actor: usize,
    /// Backoff between failed final-state reads.
    pub final_read_backoff: Duration,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            bucket: "default".to_string(),
            key: "jepsen".to_string(),
            actors: 5,
            setsize: 2000,
            mode: UpdateMode::Cas,
            durability: Durability::None,
            pool_size: 4,
            channel_capacity_per_actor: DEFAULT_CHANNEL_CAPACITY_PER_ACTOR,
            final_read_backoff: Duration::from_millis(100),
        }
    }
}

impl CheckOptions {
    /// Validate the options, returning the parsed store locator.
    pub fn validate(&self) -> Result<StoreLocator, ConfigError> {
        if self.actors == 0 {
            return Err(ConfigError::NoActors);
        }
        if self.setsize == 0 {
            return Err(ConfigError::EmptyWorkload);
        }
        if self.key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        StoreLocator::parse(&self.url)
    }

    /// Capacity of the shared report channel.
    pub fn channel_capacity(&self) -> usize {
        scaled_capacity(self.channel_capacity_per_actor, self.actors)
    }

    /// Settings for opening the store this run targets.
    pub fn connect_settings(&self, faults: StoreFaults) -> ConnectSettings {
        ConnectSettings {
            bucket: self.bucket.clone(),
            pool_size: self.pool_size,
            faults,
        }
    }
}

/// Configuration of a load-generation run.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Store URL (`memory://` or `memcached://host:port`).
    pub url: String,
    /// Bucket (key namespace) for the generated keys.
    pub bucket: String,
    /// Size of every written object in bytes.
    pub object_size: usize,
    /// Keys per pass; each actor walks `0..iterations`.
    pub iterations: u64,
    /// Number of concurrent actors.
    pub actors: usize,
    /// Connections opened to the store.
    pub pool_size: usize,
    /// Repeat passes until `duration` elapses.
    pub forever: bool,
    /// Wall-clock bound; actors stop issuing new operations once it fires.
    pub duration: Option<Duration>,
    /// Read on every Nth iteration (0 disables reads).
    pub read_every: u64,
    /// Write on every Nth iteration (0 disables writes).
    pub write_every: u64,
    /// Durability requested for every write.
    pub durability: Durability,
    /// Report channel slots per actor.
    pub channel_capacity_per_actor: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            bucket: "default".to_string(),
            object_size: 1000,
            iterations: 100_000,
            actors: 1,
            pool_size: 4,
            forever: false,
            duration: None,
            read_every: 1,
            write_every: 1,
            durability: Durability::None,
            channel_capacity_per_actor: DEFAULT_CHANNEL_CAPACITY_PER_ACTOR,
        }
    }
}

impl LoadOptions {
    /// Validate the options, returning the parsed store locator.
    pub fn validate(&self) -> Result<StoreLocator, ConfigError> {
        if self.actors == 0 {
            return Err(ConfigError::NoActors);
        }
        if self.iterations == 0 {
            return Err(ConfigError::EmptyWorkload);
        }
        if self.read_every == 0 && self.write_every == 0 {
            return Err(ConfigError::NoOperations);
        }
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        StoreLocator::parse(&self.url)
    }

    /// Capacity of the shared report channel.
    pub fn channel_capacity(&self) -> usize {
        scaled_capacity(self.channel_capacity_per_actor, self.actors)
    }

    /// Settings for opening the store this run targets.
    pub fn connect_settings(&self, faults: StoreFaults) -> ConnectSettings {
        ConnectSettings {
            bucket: self.bucket.clone(),
            pool_size: self.pool_size,
            faults,
        }
    }
}
