//! # kvjepsen
//!
//! Lost-update and durability checker for key-value stores.
//!
//! Many actors race against one shared value, each recording what it believes
//! happened. When every actor has finished, the final value is read back and
//! every element is classified by whether the store acknowledged it and
//! whether it survived.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   spawn    ┌──────────────────────────────┐
//! │ CheckOptions │──────────▶│ ActorEngine (N tokio tasks)  │
//! └──────────────┘            │  Partition ─▶ Updater ─▶ KvStore
//!                             └──────────────┬───────────────┘
//!                                  Report    │ bounded mpsc
//!                             ┌──────────────▼───────────────┐
//!                             │ Aggregator (counts sentinels)│
//!                             └──────────────┬───────────────┘
//!                                  ReportSet │  + final value
//!                             ┌──────────────▼───────────────┐
//!                             │ Analysis (four outcome classes)
//!                             └──────────────────────────────┘
//! ```
//!
//! ## Update modes
//!
//! | Mode | Strategy | Expected loss on a correct store |
//! |------|----------|----------------------------------|
//! | `cas` | compare-and-swap merge into a JSON set | none |
//! | `naive` | get, insert, set | lost updates under concurrency |
//! | `incr` | atomic counter increment | none |
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use kvjepsen::{run_check, CheckOptions, InMemoryStore, NullSink};
//!
//! let outcome = run_check(&CheckOptions::default(), Arc::new(InMemoryStore::new()), NullSink).await?;
//! println!("{}", outcome.analysis);
//! ```

#![deny(missing_docs)]

pub mod actor;
pub mod aggregator;
pub mod analysis;
pub mod config;
pub mod error;
pub mod harness;
pub mod load;
pub mod report;
pub mod store;
pub mod strategy;
pub mod value;

pub use actor::{ActorEngine, EngineSettings, Partition};
pub use aggregator::{Aggregation, Aggregator, CsvSink, NullSink, ReportSink, RowFormat};
pub use analysis::{Analysis, CounterAnalysis, Outcome, SetAnalysis};
pub use config::{CheckOptions, LoadOptions, UpdateMode};
pub use error::{ConfigError, HarnessError, StoreError, StoreResult};
pub use harness::{connect_store, run_check, CheckOutcome};
pub use load::{run_load, LoadSummary};
pub use report::{OpKind, Report, ReportSet};
pub use store::{
    ConnectSettings, Durability, InMemoryStore, KvStore, MemcachedStore, StoreFaults, StoreLocator,
};
pub use strategy::{Attempt, UpdateStrategy, Updater};
pub use value::{RemoteSet, RemoteValue};
