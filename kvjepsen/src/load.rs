//! Load generator: fixed-ratio read/write traffic with throughput reporting.
//!
//! Each actor walks keys `0..iterations`; on iteration `i` it writes when
//! `i % write_every == 0` and reads when `i % read_every == 0`. With
//! `forever` set, actors repeat passes until the cancellation token fires.
//! Reports flow through the same sentinel-counting [`Aggregator`] as the
//! checker.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, ReportSink};
use crate::config::LoadOptions;
use crate::error::HarnessError;
use crate::harness::check_compatibility;
use crate::report::{OpKind, Report};
use crate::store::{Durability, KvStore};

/// Whether iteration `i` performs an action scheduled every `every` iterations.
pub fn due(i: u64, every: u64) -> bool {
    every > 0 && i % every == 0
}

/// Object written by the load generator: `size` bytes of `a`.
pub fn make_object(size: usize) -> Vec<u8> {
    vec![b'a'; size]
}

/// Count and mean latency for one second of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecondBucket {
    /// Operations completed in this second.
    pub count: u64,
    /// Sum of their latencies.
    pub total_latency: Duration,
}

impl SecondBucket {
    /// Mean latency, zero when empty.
    pub fn mean_latency(&self) -> Duration {
        mean(self.total_latency, self.count)
    }
}

/// `total / count` computed in nanoseconds so counts above `u32::MAX` stay exact.
fn mean(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Aggregate statistics of a load run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    /// Operations issued.
    pub operations: u64,
    /// Operations that returned an error.
    pub errors: u64,
    /// Operations per kind.
    pub by_op: BTreeMap<String, u64>,
    /// Sum of all latencies.
    pub total_latency: Duration,
    /// Wall-clock duration of the run.
    pub wall_time: Duration,
    /// Per-second buckets keyed by whole seconds since start.
    pub seconds: BTreeMap<u64, SecondBucket>,
}

impl LoadSummary {
    /// Fold one report into the summary.
    pub fn record(&mut self, report: &Report) {
        self.operations += 1;
        if !report.ack {
            self.errors += 1;
        }
        *self.by_op.entry(report.op.to_string()).or_insert(0) += 1;
        self.total_latency += report.elapsed;

        let bucket = self.seconds.entry(report.timestamp.as_secs()).or_default();
        bucket.count += 1;
        bucket.total_latency += report.elapsed;
    }

    /// Operations per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.operations as f64 / secs
        }
    }

    /// Mean latency over all operations.
    pub fn mean_latency(&self) -> Duration {
        mean(self.total_latency, self.operations)
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Load Report ===")?;
        writeln!(f, "Operations: {}", self.operations)?;
        for (op, count) in &self.by_op {
            writeln!(f, "  {op}: {count}")?;
        }
        writeln!(f, "Errors: {}", self.errors)?;
        writeln!(f, "Wall Time: {:?}", self.wall_time)?;
        writeln!(f, "Throughput: {:.1} ops/s", self.throughput())?;
        writeln!(f, "Mean Latency: {:?}", self.mean_latency())?;
        if !self.seconds.is_empty() {
            writeln!(f)?;
            writeln!(f, "second,count,mean_latency_ms")?;
            for (second, bucket) in &self.seconds {
                writeln!(
                    f,
                    "{second},{},{:.3}",
                    bucket.count,
                    bucket.mean_latency().as_secs_f64() * 1000.0
                )?;
            }
        }
        Ok(())
    }
}

/// One load actor: passes over `0..iterations` until done or cancelled.
async fn run_load_actor(
    actor: usize,
    store: Arc<dyn KvStore>,
    options: LoadOptions,
    object: Arc<Vec<u8>>,
    out: mpsc::Sender<Report>,
    started: Instant,
    cancel: CancellationToken,
) {
    'passes: loop {
        for i in 0..options.iterations {
            if cancel.is_cancelled() {
                break 'passes;
            }
            let key = i.to_string();

            if due(i, options.write_every) {
                let begin = Instant::now();
                let result = store
                    .set(&key, object.as_ref().clone(), options.durability)
                    .await;
                let end = Instant::now();
                let report = Report::observed(
                    actor,
                    key.clone(),
                    OpKind::Write,
                    end.duration_since(started),
                    end.duration_since(begin),
                    result,
                );
                if out.send(report).await.is_err() {
                    return;
                }
            }

            if due(i, options.read_every) {
                let begin = Instant::now();
                let result = store.get(&key).await.map(|_| ());
                let end = Instant::now();
                let report = Report::observed(
                    actor,
                    key,
                    OpKind::Read,
                    end.duration_since(started),
                    end.duration_since(begin),
                    result,
                );
                if out.send(report).await.is_err() {
                    return;
                }
            }
        }

        if !options.forever {
            break;
        }
    }

    let _ = out.send(Report::done(actor)).await;
}

/// Run the load generator against an already-open store.
///
/// `cancel` stops every actor before its next operation. A configured
/// `duration` stops them too, without cancelling the caller's token.
pub async fn run_load<S: ReportSink>(
    options: &LoadOptions,
    store: Arc<dyn KvStore>,
    sink: S,
    cancel: CancellationToken,
) -> Result<LoadSummary, HarnessError> {
    options.validate()?;
    check_compatibility(store.as_ref(), options.durability)?;
    if options.durability == Durability::Persisted {
        tracing::info!("writes wait for persistence");
    }

    let stop = cancel.child_token();
    let timer = options.duration.map(|duration| {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            tracing::info!(?duration, "load duration elapsed");
            stop.cancel();
        })
    });

    let object = Arc::new(make_object(options.object_size));
    let (tx, mut rx) = mpsc::channel(options.channel_capacity());
    let started = Instant::now();
    for actor in 0..options.actors {
        tracing::info!(actor, "starting load actor");
        tokio::spawn(run_load_actor(
            actor,
            store.clone(),
            options.clone(),
            object.clone(),
            tx.clone(),
            started,
            stop.clone(),
        ));
    }
    drop(tx);

    let mut summary = LoadSummary::default();
    let (aggregation, _sink) = Aggregator::new(options.actors, sink)
        .collect_with(&mut rx, |report| summary.record(report))
        .await;
    summary.wall_time = started.elapsed();
    if let Some(timer) = timer {
        timer.abort();
    }

    if aggregation.missing_actors > 0 {
        tracing::warn!(missing = aggregation.missing_actors, "load actors exited early");
    }
    Ok(summary)
}
