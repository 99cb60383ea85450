//! Fan-in of actor reports.
//!
//! The aggregator stops when it has counted one terminal report per actor.
//! Channel closure is not a termination signal: it only happens early when an
//! actor died without reporting, and is surfaced as [`Aggregation::missing_actors`].

use std::io::Write;

use tokio::sync::mpsc;

use crate::report::{Report, ReportSet};

/// Where non-terminal reports are echoed while aggregating.
pub trait ReportSink: Send {
    /// Called once per non-terminal report, in arrival order.
    fn record(&mut self, report: &Report);

    /// Called once after the last report.
    fn finish(&mut self) {}
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn record(&mut self, _report: &Report) {}
}

/// Row format used by [`CsvSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// [`Report::check_row`].
    Check,
    /// [`Report::load_row`].
    Load,
}

/// Writes one CSV row per report to a writer.
pub struct CsvSink<W: Write + Send> {
    writer: W,
    format: RowFormat,
}

impl<W: Write + Send> CsvSink<W> {
    /// Create a sink writing `format` rows to `writer`.
    pub fn new(writer: W, format: RowFormat) -> Self {
        Self { writer, format }
    }

    /// Write the header line for this format.
    pub fn header(&mut self) -> std::io::Result<()> {
        let header = match self.format {
            RowFormat::Check => crate::report::CHECK_HEADER,
            RowFormat::Load => crate::report::LOAD_HEADER,
        };
        writeln!(self.writer, "{header}")
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ReportSink for CsvSink<W> {
    fn record(&mut self, report: &Report) {
        let row = match self.format {
            RowFormat::Check => report.check_row(),
            RowFormat::Load => report.load_row(),
        };
        if let Err(error) = writeln!(self.writer, "{row}") {
            tracing::warn!(%error, "failed to echo report");
        }
    }

    fn finish(&mut self) {
        if let Err(error) = self.writer.flush() {
            tracing::warn!(%error, "failed to flush report rows");
        }
    }
}

/// Result of draining the report stream.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Latest report per element.
    pub reports: ReportSet,
    /// Non-terminal reports received (including superseded ones).
    pub received: u64,
    /// Actors that never sent a terminal report.
    pub missing_actors: usize,
}

/// Consumes the shared report stream until every actor has finished.
pub struct Aggregator<S: ReportSink> {
    live_actors: usize,
    sink: S,
}

impl<S: ReportSink> Aggregator<S> {
    /// Aggregator expecting `actors` terminal reports.
    pub fn new(actors: usize, sink: S) -> Self {
        Self {
            live_actors: actors,
            sink,
        }
    }

    /// Drain `reports` into a [`ReportSet`].
    pub async fn collect(self, reports: &mut mpsc::Receiver<Report>) -> Aggregation {
        let (aggregation, _) = self.collect_with(reports, |_| {}).await;
        aggregation
    }

    /// Drain `reports`, also passing every non-terminal report to `observe`.
    ///
    /// Returns the sink so callers can flush or inspect it.
    pub async fn collect_with<F>(
        mut self,
        reports: &mut mpsc::Receiver<Report>,
        mut observe: F,
    ) -> (Aggregation, S)
    where
        F: FnMut(&Report),
    {
        let mut aggregation = Aggregation::default();
        while self.live_actors > 0 {
            let Some(report) = reports.recv().await else {
                tracing::warn!(
                    missing = self.live_actors,
                    "report stream closed before every actor finished"
                );
                aggregation.missing_actors = self.live_actors;
                break;
            };

            if report.done {
                self.live_actors -= 1;
                tracing::debug!(actor = report.actor, remaining = self.live_actors, "actor finished");
                continue;
            }

            self.sink.record(&report);
            observe(&report);
            aggregation.received += 1;
            aggregation.reports.insert(report);
        }
        self.sink.finish();
        (aggregation, self.sink)
    }
}
