//! Message transaction statistics

use crate::{MsgObserver, Outcome, Phase, TransDescriptor, TransError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every message run that reports to them
pub struct MsgStats {
    pub prepared: AtomicU64,
    pub business_succeeded: AtomicU64,
    pub business_failed: AtomicU64,
    pub business_uncertain: AtomicU64,
    pub queries: AtomicU64,
    pub submitted: AtomicU64,
    pub aborted: AtomicU64,
    pub left_prepared: AtomicU64,
    pub phase_failures: AtomicU64,
}

impl MsgStats {
    pub fn new() -> Self {
        Self {
            prepared: AtomicU64::new(0),
            business_succeeded: AtomicU64::new(0),
            business_failed: AtomicU64::new(0),
            business_uncertain: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            left_prepared: AtomicU64::new(0),
            phase_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MsgStatsSnapshot {
        MsgStatsSnapshot {
            prepared: self.prepared.load(Ordering::Relaxed),
            business_succeeded: self.business_succeeded.load(Ordering::Relaxed),
            business_failed: self.business_failed.load(Ordering::Relaxed),
            business_uncertain: self.business_uncertain.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            left_prepared: self.left_prepared.load(Ordering::Relaxed),
            phase_failures: self.phase_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for MsgStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgObserver for MsgStats {
    fn on_prepared(&self, _descriptor: &TransDescriptor) {
        self.prepared.fetch_add(1, Ordering::Relaxed);
    }

    fn on_business_finished(&self, _descriptor: &TransDescriptor, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Success => &self.business_succeeded,
            Outcome::Failure => &self.business_failed,
            Outcome::Pending | Outcome::Ambiguous => &self.business_uncertain,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn on_query_resolved(&self, _descriptor: &TransDescriptor, _outcome: Outcome) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    fn on_submitted(&self, _descriptor: &TransDescriptor) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_aborted(&self, _descriptor: &TransDescriptor) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_left_prepared(&self, _descriptor: &TransDescriptor, _outcome: Outcome) {
        self.left_prepared.fetch_add(1, Ordering::Relaxed);
    }

    fn on_phase_failed(&self, _descriptor: &TransDescriptor, _phase: Phase, _error: &TransError) {
        self.phase_failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgStatsSnapshot {
    pub prepared: u64,
    pub business_succeeded: u64,
    pub business_failed: u64,
    pub business_uncertain: u64,
    pub queries: u64,
    pub submitted: u64,
    pub aborted: u64,
    pub left_prepared: u64,
    pub phase_failures: u64,
}
