//! End-to-end lost-update check.
//!
//! Phases: validate options, initialize the shared value, race the actors,
//! aggregate their reports, read the final value, reconcile. Only the first
//! two phases can fail the run; everything after them produces a result.

use std::sync::Arc;
use std::time::Duration;

use crate::actor::{ActorEngine, EngineSettings};
use crate::aggregator::{Aggregator, ReportSink};
use crate::analysis::{fetch_final_state, Analysis};
use crate::config::CheckOptions;
use crate::error::{ConfigError, HarnessError};
use crate::store::{self, ConnectSettings, Durability, KvStore, StoreLocator};
use crate::value::RemoteSet;

/// Result of a completed check run.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// Outcome breakdown.
    pub analysis: Analysis,
    /// Non-terminal reports received.
    pub reports_received: u64,
    /// Actors that exited without a terminal report.
    pub missing_actors: usize,
    /// Time from actor start to the end of aggregation.
    pub elapsed: Duration,
}

/// Open the store at `locator`.
pub async fn connect_store(
    locator: &StoreLocator,
    settings: &ConnectSettings,
) -> Result<Arc<dyn KvStore>, HarnessError> {
    let store = store::connect(locator, settings)
        .await
        .map_err(HarnessError::Connect)?;
    tracing::info!(store = %locator, backend = store.name(), "connected");
    Ok(store)
}

/// Reject options the store cannot honour.
pub fn check_compatibility(
    store: &dyn KvStore,
    durability: Durability,
) -> Result<(), ConfigError> {
    if durability == Durability::Persisted && !store.supports_durability() {
        return Err(ConfigError::DurabilityUnsupported {
            backend: store.name(),
        });
    }
    Ok(())
}

/// Run a full check against an already-open store.
pub async fn run_check<S: ReportSink>(
    options: &CheckOptions,
    store: Arc<dyn KvStore>,
    sink: S,
) -> Result<CheckOutcome, HarnessError> {
    options.validate()?;
    check_compatibility(store.as_ref(), options.durability)?;

    let initial = if options.mode.is_counter() {
        b"0".to_vec()
    } else {
        RemoteSet::new().encode().map_err(HarnessError::Initialize)?
    };
    store
        .set(&options.key, initial, options.durability)
        .await
        .map_err(HarnessError::Initialize)?;

    tracing::info!(
        actors = options.actors,
        setsize = options.setsize,
        mode = %options.mode,
        key = %options.key,
        "starting check"
    );

    let engine = ActorEngine::new(
        store.clone(),
        EngineSettings {
            key: options.key.clone(),
            strategy: options.mode.into(),
            durability: options.durability,
            actors: options.actors,
            setsize: options.setsize,
            channel_capacity: options.channel_capacity(),
        },
    );
    let mut running = engine.spawn();
    let (aggregation, _sink) = Aggregator::new(options.actors, sink)
        .collect_with(&mut running.reports, |_| {})
        .await;
    let elapsed = running.started.elapsed();

    for (actor, handle) in running.handles.into_iter().enumerate() {
        if let Err(error) = handle.await {
            tracing::error!(actor, %error, "actor task failed");
        }
    }

    let remote = fetch_final_state(
        store.as_ref(),
        &options.key,
        options.mode,
        options.final_read_backoff,
    )
    .await;
    let analysis = Analysis::new(options.setsize, &aggregation.reports, &remote);

    if analysis.lost_acknowledged_writes() {
        tracing::warn!(loss = analysis.total_loss(), "acknowledged writes were lost");
    }

    Ok(CheckOutcome {
        analysis,
        reports_received: aggregation.received,
        missing_actors: aggregation.missing_actors,
        elapsed,
    })
}
