//! Exactly-once outcome collection shared by concurrent item pipelines

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::model::{
    KeyFingerprint, OutcomeStatus, ReencryptionOutcome, RunSummary, SkipReason, Subject,
};

/// Collects one outcome per discovered item, keyed by discovery index.
///
/// Items that never get an outcome (because the run was cancelled before they
/// were dispatched) are finished as `Skipped(Cancelled)`, so the summary always
/// accounts for every discovered item.
#[derive(Debug)]
pub struct SummaryRecorder {
    subjects: Vec<Subject>,
    slots: Mutex<Vec<Option<ReencryptionOutcome>>>,
}

impl SummaryRecorder {
    /// Create a recorder for items in discovery order
    pub fn new(subjects: Vec<Subject>) -> Self {
        let slots = Mutex::new(vec![None; subjects.len()]);
        Self { subjects, slots }
    }

    /// Number of discovered items
    pub fn total(&self) -> usize {
        self.subjects.len()
    }

    /// Record the outcome for item `index`. Returns false and keeps the first
    /// outcome if the item was already recorded or the index is unknown.
    pub fn record(&self, index: usize, outcome: ReencryptionOutcome) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(outcome);
                true
            }
            _ => false,
        }
    }

    /// Number of items with an outcome so far
    pub fn recorded(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Close the recorder and build the run summary
    pub fn finish(
        self,
        key_fingerprint: Option<KeyFingerprint>,
        dry_run: bool,
        started_at: DateTime<Utc>,
    ) -> RunSummary {
        let slots = self.slots.into_inner();
        let mut cancelled = false;

        let items = self
            .subjects
            .into_iter()
            .zip(slots)
            .map(|(subject, slot)| {
                slot.unwrap_or_else(|| {
                    cancelled = true;
                    ReencryptionOutcome {
                        subject,
                        status: OutcomeStatus::Skipped(SkipReason::Cancelled),
                        error_detail: None,
                    }
                })
            })
            .collect();

        RunSummary::from_outcomes(items, key_fingerprint, dry_run, cancelled, started_at)
    }
}
