//! Error reporting sink.
//!
//! The manager never reaches for a global error tracker; it reports through an
//! [`ErrorReporter`] handed to it at construction.

use crate::queue::BackendType;
use std::sync::Mutex;

/// What kind of failure a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// A single backend rejected a job during failover
    BackendEnqueueFailure,
    /// Every backend failed within one failover pass
    NoBackendAvailable,
    /// A producer failed to connect
    BackendConnectFailure,
    /// A lifecycle broadcast failed on one backend
    LifecycleFailure,
}

/// Structured failure report.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    /// Failure kind
    pub kind: ReportKind,
    /// Human-readable error message
    pub message: String,
    /// Serialized job, when the failure concerns one
    pub job: Option<String>,
    /// Backend that failed, if a single one did
    pub failed_backend: Option<BackendType>,
    /// Full active backend list at the time of failure
    pub backends: Vec<BackendType>,
}

/// Receives structured failure reports.
pub trait ErrorReporter: Send + Sync {
    /// Record one failure.
    fn report(&self, report: &ErrorReport);
}

/// Default reporter: emits each report as a `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, report: &ErrorReport) {
        let backends = BackendType::join(&report.backends);

        tracing::error!(
            kind = ?report.kind,
            failed_backend = report.failed_backend.map(|b| b.as_str()).unwrap_or("-"),
            backends = %backends,
            job = report.job.as_deref().unwrap_or("-"),
            "{}",
            report.message
        );
    }
}

/// Reporter that keeps every report in memory; handy in tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl CollectingReporter {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports received so far.
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }

    /// Reports of one kind.
    pub fn reports_of(&self, kind: ReportKind) -> Vec<ErrorReport> {
        self.reports()
            .into_iter()
            .filter(|report| report.kind == kind)
            .collect()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: &ErrorReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: ReportKind) -> ErrorReport {
        ErrorReport {
            kind,
            message: "boom".to_string(),
            job: Some("{}".to_string()),
            failed_backend: Some(BackendType::Memory),
            backends: vec![BackendType::Memory, BackendType::Redis],
        }
    }

    #[test]
    fn test_collecting_reporter_filters_by_kind() {
        let reporter = CollectingReporter::new();
        reporter.report(&sample(ReportKind::BackendEnqueueFailure));
        reporter.report(&sample(ReportKind::NoBackendAvailable));
        reporter.report(&sample(ReportKind::BackendEnqueueFailure));

        assert_eq!(reporter.reports().len(), 3);
        assert_eq!(
            reporter.reports_of(ReportKind::BackendEnqueueFailure).len(),
            2
        );
    }

    #[test]
    fn test_tracing_reporter_does_not_panic() {
        TracingErrorReporter.report(&sample(ReportKind::NoBackendAvailable));
    }
}
