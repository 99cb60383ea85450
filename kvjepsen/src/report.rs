//! Per-operation reports emitted by actors.
//!
//! Every attempt produces one [`Report`]; every actor ends its stream with a
//! single terminal report (`done = true`) that carries no element data.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::StoreError;

/// CSV header for checker output.
pub const CHECK_HEADER: &str = "element,ack,elapsed_ns,timestamp_ns,error";

/// CSV header for load-generator output.
pub const LOAD_HEADER: &str = "elapsed_ns,error,timestamp_ns,op";

/// Kind of operation a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Element insert or increment against the shared value.
    Update,
    /// Load-generator read.
    Read,
    /// Load-generator write.
    Write,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpKind::Update => "update",
            OpKind::Read => "read",
            OpKind::Write => "write",
        })
    }
}

/// Outcome of a single observed operation, or an actor's terminal signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Actor that emitted the report.
    pub actor: usize,
    /// Element identifier (empty for terminal reports).
    pub element: String,
    /// Operation kind.
    pub op: OpKind,
    /// Completion time, measured from harness start.
    pub timestamp: Duration,
    /// Latency of the store call.
    pub elapsed: Duration,
    /// True iff the store call returned without error.
    pub ack: bool,
    /// Error returned by the store, if any.
    pub error: Option<StoreError>,
    /// Terminal sentinel.
    pub done: bool,
}

impl Report {
    /// Report for a completed store call.
    pub fn observed(
        actor: usize,
        element: impl Into<String>,
        op: OpKind,
        timestamp: Duration,
        elapsed: Duration,
        result: Result<(), StoreError>,
    ) -> Self {
        let error = result.err();
        Self {
            actor,
            element: element.into(),
            op,
            timestamp,
            elapsed,
            ack: error.is_none(),
            error,
            done: false,
        }
    }

    /// Terminal report for `actor`.
    pub fn done(actor: usize) -> Self {
        Self {
            actor,
            element: String::new(),
            op: OpKind::Update,
            timestamp: Duration::ZERO,
            elapsed: Duration::ZERO,
            ack: false,
            error: None,
            done: true,
        }
    }

    fn error_text(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.to_string().replace([',', '\n', '\r'], " "))
            .unwrap_or_default()
    }

    /// Checker CSV row (see [`CHECK_HEADER`]).
    pub fn check_row(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.element,
            u8::from(self.ack),
            self.elapsed.as_nanos(),
            self.timestamp.as_nanos(),
            self.error_text()
        )
    }

    /// Load-generator CSV row (see [`LOAD_HEADER`]).
    pub fn load_row(&self) -> String {
        format!(
            "{},{},{},{}",
            self.elapsed.as_nanos(),
            self.error_text(),
            self.timestamp.as_nanos(),
            self.op
        )
    }
}

/// Latest report per element.
#[derive(Debug, Clone, Default)]
pub struct ReportSet {
    reports: HashMap<String, Report>,
}

impl ReportSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `report`, replacing any earlier report for the same element.
    ///
    /// Terminal reports are ignored.
    pub fn insert(&mut self, report: Report) {
        if report.done {
            return;
        }
        self.reports.insert(report.element.clone(), report);
    }

    /// Report for `element`, if one arrived.
    pub fn get(&self, element: &str) -> Option<&Report> {
        self.reports.get(element)
    }

    /// Whether `element` was acknowledged. Missing elements are not.
    pub fn is_acked(&self, element: &str) -> bool {
        self.get(element).is_some_and(|report| report.ack)
    }

    /// Number of acknowledged reports.
    pub fn acknowledged(&self) -> u64 {
        self.reports.values().filter(|report| report.ack).count() as u64
    }

    /// Number of distinct elements reported.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Check if no report was recorded.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Iterate over all reports in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Report> {
        self.reports.values()
    }
}

impl FromIterator<Report> for ReportSet {
    fn from_iter<I: IntoIterator<Item = Report>>(iter: I) -> Self {
        let mut set = ReportSet::new();
        for report in iter {
            set.insert(report);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acked(element: &str) -> Report {
        Report::observed(
            0,
            element,
            OpKind::Update,
            Duration::from_nanos(2_000),
            Duration::from_nanos(1_500),
            Ok(()),
        )
    }

    fn failed(element: &str) -> Report {
        Report::observed(
            1,
            element,
            OpKind::Update,
            Duration::from_nanos(9),
            Duration::from_nanos(3),
            Err(StoreError::Server("temporary failure, try again".to_string())),
        )
    }

    #[test]
    fn test_ack_follows_error() {
        assert!(acked("1").ack);
        let report = failed("2");
        assert!(!report.ack);
        assert!(report.error.is_some());
        assert!(!report.done);
    }

    #[test]
    fn test_done_report_carries_no_element() {
        let report = Report::done(3);
        assert!(report.done);
        assert!(report.element.is_empty());
        assert_eq!(report.actor, 3);
    }

    #[test]
    fn test_check_row() {
        assert_eq!(acked("7").check_row(), "7,1,1500,2000,");
        assert_eq!(
            failed("8").check_row(),
            "8,0,3,9,Server error: temporary failure  try again"
        );
    }

    #[test]
    fn test_load_row() {
        let report = Report::observed(
            0,
            "5",
            OpKind::Read,
            Duration::from_nanos(10),
            Duration::from_nanos(4),
            Ok(()),
        );
        assert_eq!(report.load_row(), "4,,10,read");
    }

    #[test]
    fn test_report_set_last_write_wins() {
        let mut set = ReportSet::new();
        set.insert(failed("1"));
        assert!(!set.is_acked("1"));
        set.insert(acked("1"));
        assert!(set.is_acked("1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_report_set_ignores_terminal_reports() {
        let set: ReportSet = vec![acked("1"), Report::done(0), failed("2")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.acknowledged(), 1);
        assert!(!set.is_acked("missing"));
    }
}
