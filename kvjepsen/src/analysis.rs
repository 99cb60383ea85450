//! Reconciliation of reported outcomes against the final remote state.
//!
//! Set mode cross-tabulates every index in `[0, setsize)` by (acked?,
//! present?). Indices with no report count as not acknowledged. Counter mode
//! compares the acknowledged increment count with the final counter.

use std::fmt;
use std::time::Duration;

use crate::config::UpdateMode;
use crate::error::StoreResult;
use crate::report::ReportSet;
use crate::store::KvStore;
use crate::value::{decode_counter, RemoteSet, RemoteValue};

/// Longest pause between final-state read attempts.
const MAX_FINAL_READ_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome class of a single element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Acknowledged and present.
    AcknowledgedDurable,
    /// Acknowledged but absent: the client was told success and the data vanished.
    AcknowledgedLost,
    /// Present despite a reported failure.
    DurableUnacknowledged,
    /// Neither acknowledged nor present.
    CompletelyLost,
}

impl Outcome {
    /// Classify one element.
    pub fn classify(acked: bool, present: bool) -> Self {
        match (acked, present) {
            (true, true) => Outcome::AcknowledgedDurable,
            (true, false) => Outcome::AcknowledgedLost,
            (false, true) => Outcome::DurableUnacknowledged,
            (false, false) => Outcome::CompletelyLost,
        }
    }
}

/// Set-mode breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetAnalysis {
    /// Size of the element space.
    pub total: u64,
    /// Elements acknowledged by the store.
    pub acknowledged: u64,
    /// Acknowledged and present.
    pub acknowledged_durable: u64,
    /// Acknowledged but absent.
    pub acknowledged_lost: u64,
    /// Present but not acknowledged.
    pub durable_unacknowledged: u64,
    /// Neither acknowledged nor present.
    pub completely_lost: u64,
    /// Element ids that were acknowledged but lost, ascending.
    pub lost_elements: Vec<u64>,
}

impl SetAnalysis {
    /// Elements absent from the final state.
    pub fn total_loss(&self) -> u64 {
        self.acknowledged_lost + self.completely_lost
    }

    /// Count for one outcome class.
    pub fn count(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::AcknowledgedDurable => self.acknowledged_durable,
            Outcome::AcknowledgedLost => self.acknowledged_lost,
            Outcome::DurableUnacknowledged => self.durable_unacknowledged,
            Outcome::CompletelyLost => self.completely_lost,
        }
    }

    fn record(&mut self, index: u64, outcome: Outcome) {
        match outcome {
            Outcome::AcknowledgedDurable => self.acknowledged_durable += 1,
            Outcome::AcknowledgedLost => {
                self.acknowledged_lost += 1;
                self.lost_elements.push(index);
            }
            Outcome::DurableUnacknowledged => self.durable_unacknowledged += 1,
            Outcome::CompletelyLost => self.completely_lost += 1,
        }
    }
}

impl fmt::Display for SetAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} total", self.total)?;
        writeln!(f, "{} total loss", self.total_loss())?;
        writeln!(f, "{} acknowledged", self.acknowledged)?;
        writeln!(f, "{} acknowledged and found", self.acknowledged_durable)?;
        writeln!(f, "{} acknowledged but lost", self.acknowledged_lost)?;
        writeln!(f, "{} found but not acknowledged", self.durable_unacknowledged)?;
        write!(f, "{} lost without acknowledgement", self.completely_lost)
    }
}

/// Classify every index in `[0, setsize)`.
pub fn analyze_set(setsize: u64, reports: &ReportSet, remote: &RemoteSet) -> SetAnalysis {
    let mut analysis = SetAnalysis {
        total: setsize,
        ..SetAnalysis::default()
    };
    for index in 0..setsize {
        let element = index.to_string();
        let acked = reports.is_acked(&element);
        if acked {
            analysis.acknowledged += 1;
        }
        analysis.record(index, Outcome::classify(acked, remote.contains(&element)));
    }
    analysis
}

/// Counter-mode breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterAnalysis {
    /// Increments the harness set out to make.
    pub total: u64,
    /// Increments that produced a report.
    pub attempted: u64,
    /// Increments the store acknowledged.
    pub acknowledged: u64,
    /// Final counter value.
    pub final_value: u64,
}

impl CounterAnalysis {
    /// Acknowledged increments missing from the counter. Never negative.
    pub fn total_loss(&self) -> u64 {
        self.acknowledged.saturating_sub(self.final_value)
    }

    /// Increments applied beyond the acknowledged count.
    pub fn phantom(&self) -> u64 {
        self.final_value.saturating_sub(self.acknowledged)
    }

    /// Attempted increments that did not land.
    pub fn missing(&self) -> u64 {
        self.attempted.saturating_sub(self.final_value)
    }
}

impl fmt::Display for CounterAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} total", self.total)?;
        writeln!(f, "{} total loss", self.total_loss())?;
        writeln!(f, "{} acknowledged", self.acknowledged)?;
        writeln!(f, "{} final counter value", self.final_value)?;
        writeln!(f, "{} applied but not acknowledged", self.phantom())?;
        write!(f, "{} attempted but not applied", self.missing())
    }
}

/// Compare acknowledged increments with the final counter.
pub fn analyze_counter(setsize: u64, reports: &ReportSet, final_value: u64) -> CounterAnalysis {
    CounterAnalysis {
        total: setsize,
        attempted: reports.len() as u64,
        acknowledged: reports.acknowledged(),
        final_value,
    }
}

/// Result of a check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Analysis {
    /// Set-mode result.
    Set(SetAnalysis),
    /// Counter-mode result.
    Counter(CounterAnalysis),
}

impl Analysis {
    /// Cross-tabulate `reports` against `remote`.
    pub fn new(setsize: u64, reports: &ReportSet, remote: &RemoteValue) -> Self {
        match remote {
            RemoteValue::Set(set) => Analysis::Set(analyze_set(setsize, reports, set)),
            RemoteValue::Counter(value) => {
                Analysis::Counter(analyze_counter(setsize, reports, *value))
            }
        }
    }

    /// Data loss: acknowledged-but-lost plus completely-lost in set mode,
    /// acknowledged minus final in counter mode.
    pub fn total_loss(&self) -> u64 {
        match self {
            Analysis::Set(set) => set.total_loss(),
            Analysis::Counter(counter) => counter.total_loss(),
        }
    }

    /// Whether any acknowledged write was lost.
    pub fn lost_acknowledged_writes(&self) -> bool {
        match self {
            Analysis::Set(set) => set.acknowledged_lost > 0,
            Analysis::Counter(counter) => counter.total_loss() > 0,
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Analysis::Set(set) => set.fmt(f),
            Analysis::Counter(counter) => counter.fmt(f),
        }
    }
}

async fn read_final(store: &dyn KvStore, key: &str, mode: UpdateMode) -> StoreResult<RemoteValue> {
    let bytes = store.get(key).await?;
    if mode.is_counter() {
        Ok(RemoteValue::Counter(decode_counter(bytes.as_deref())?))
    } else {
        Ok(RemoteValue::Set(RemoteSet::decode(bytes.as_deref())?))
    }
}

/// Fetch the final value, retrying with capped exponential backoff until it succeeds.
pub async fn fetch_final_state(
    store: &dyn KvStore,
    key: &str,
    mode: UpdateMode,
    backoff: Duration,
) -> RemoteValue {
    let mut delay = backoff;
    let mut attempt: u64 = 1;
    loop {
        match read_final(store, key, mode).await {
            Ok(value) => return value,
            Err(error) => {
                tracing::warn!(attempt, %error, "error getting the remote value, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_FINAL_READ_BACKOFF);
                attempt += 1;
            }
        }
    }
}
