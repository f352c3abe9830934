//! Structured run records and summaries
//!
//! The reporter only accepts `&'static str` messages and a typed
//! [`RecordContext`]. Neither can carry a [`PlaintextSecret`], so secret values
//! cannot be formatted into a record by any caller.
//!
//! [`PlaintextSecret`]: crate::model::PlaintextSecret

mod summary;

pub use summary::SummaryReport;

use std::fmt;

use clap::ValueEnum;
use tracing::field::display;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ItemError};
use crate::model::{KeyFingerprint, OutcomeStatus, RefError, RunSummary, Subject};

/// Record severity. Ordered so that `Debug < Info < Warn < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Severity {
    /// Per-step detail
    Debug,
    /// Progress and outcomes
    Info,
    /// Per-item failures
    Warn,
    /// Fatal problems
    Error,
}

impl Severity {
    /// `EnvFilter` directive for this severity
    pub fn as_directive(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

/// Errors a record may carry
#[derive(Debug, Clone, Copy)]
pub enum ReportedError<'a> {
    /// Per-item failure
    Item(&'a ItemError),
    /// Fatal run failure
    Run(&'a Error),
    /// Discovery key validation failure
    Ref(&'a RefError),
}

impl fmt::Display for ReportedError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedError::Item(e) => e.fmt(f),
            ReportedError::Run(e) => e.fmt(f),
            ReportedError::Ref(e) => e.fmt(f),
        }
    }
}

/// Typed fields attached to a record
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordContext<'a> {
    subject: Option<&'a Subject>,
    key: Option<&'a KeyFingerprint>,
    attempt: Option<u32>,
    status: Option<&'a OutcomeStatus>,
    error: Option<ReportedError<'a>>,
}

impl<'a> RecordContext<'a> {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the item the record is about
    pub fn subject(mut self, subject: &'a Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Attach the key fingerprint
    pub fn key(mut self, key: &'a KeyFingerprint) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach the attempt number
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attach the item's terminal status
    pub fn status(mut self, status: &'a OutcomeStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach an error
    pub fn error(mut self, error: ReportedError<'a>) -> Self {
        self.error = Some(error);
        self
    }
}

/// Emits run records through `tracing`, filtered by a minimum severity fixed
/// for the lifetime of the run. Suppressed records are dropped, not buffered.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    min_severity: Severity,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(Severity::Info)
    }
}

impl Reporter {
    /// Create a reporter that drops records below `min_severity`
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }

    /// Minimum severity that will be emitted
    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Whether a record at `severity` would be emitted
    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    /// Emit one structured record
    pub fn record(&self, severity: Severity, message: &'static str, ctx: &RecordContext<'_>) {
        if !self.enabled(severity) {
            return;
        }

        let item = ctx.subject.map(display);
        let key = ctx.key.map(|k| display(k.short()));
        let attempt = ctx.attempt;
        let status = ctx.status.map(display);
        let error = ctx.error.map(display);

        match severity {
            Severity::Debug => debug!(item, key, attempt, status, error, "{}", message),
            Severity::Info => info!(item, key, attempt, status, error, "{}", message),
            Severity::Warn => warn!(item, key, attempt, status, error, "{}", message),
            Severity::Error => error!(item, key, attempt, status, error, "{}", message),
        }
    }

    /// Emit a progress record after an item finishes
    pub fn progress(&self, done: usize, total: usize) {
        if !self.enabled(Severity::Info) {
            return;
        }
        info!(done, total, "Progress");
    }

    /// Render a summary for output
    pub fn summarize<'a>(&self, summary: &'a RunSummary) -> SummaryReport<'a> {
        SummaryReport::new(summary)
    }

    /// Emit the final totals as one record
    pub fn record_summary(&self, summary: &RunSummary) {
        let severity = if summary.has_failures() {
            Severity::Warn
        } else {
            Severity::Info
        };
        if !self.enabled(severity) {
            return;
        }

        let key = summary.key_fingerprint.as_ref().map(|k| display(k.short()));
        macro_rules! emit {
            ($level:ident) => {
                $level!(
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    dry_run = summary.dry_run,
                    cancelled = summary.cancelled,
                    key,
                    "Run complete"
                )
            };
        }
        match severity {
            Severity::Warn => emit!(warn),
            _ => emit!(info),
        }
    }
}
