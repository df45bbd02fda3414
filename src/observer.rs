//! Message transaction observer trait

use crate::{Outcome, Phase, TransDescriptor, TransError};
use std::sync::Arc;

/// Observer trait for external observability
pub trait MsgObserver: Send + Sync + 'static {
    fn on_prepared(&self, descriptor: &TransDescriptor);
    fn on_business_finished(&self, descriptor: &TransDescriptor, outcome: Outcome);
    fn on_query_resolved(&self, descriptor: &TransDescriptor, outcome: Outcome);
    fn on_submitted(&self, descriptor: &TransDescriptor);
    fn on_aborted(&self, descriptor: &TransDescriptor);
    fn on_left_prepared(&self, descriptor: &TransDescriptor, outcome: Outcome);
    fn on_phase_failed(&self, descriptor: &TransDescriptor, phase: Phase, error: &TransError);
}

/// No-op observer
pub struct NoOpObserver;

impl MsgObserver for NoOpObserver {
    fn on_prepared(&self, _descriptor: &TransDescriptor) {}
    fn on_business_finished(&self, _descriptor: &TransDescriptor, _outcome: Outcome) {}
    fn on_query_resolved(&self, _descriptor: &TransDescriptor, _outcome: Outcome) {}
    fn on_submitted(&self, _descriptor: &TransDescriptor) {}
    fn on_aborted(&self, _descriptor: &TransDescriptor) {}
    fn on_left_prepared(&self, _descriptor: &TransDescriptor, _outcome: Outcome) {}
    fn on_phase_failed(&self, _descriptor: &TransDescriptor, _phase: Phase, _error: &TransError) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl MsgObserver for TracingObserver {
    fn on_prepared(&self, descriptor: &TransDescriptor) {
        tracing::info!(gid = %descriptor.gid, steps = descriptor.steps.len(), "Msg prepared");
    }

    fn on_business_finished(&self, descriptor: &TransDescriptor, outcome: Outcome) {
        tracing::info!(gid = %descriptor.gid, outcome = %outcome, "Business call finished");
    }

    fn on_query_resolved(&self, descriptor: &TransDescriptor, outcome: Outcome) {
        tracing::info!(gid = %descriptor.gid, outcome = %outcome, url = %descriptor.query_prepared, "Prepared status queried");
    }

    fn on_submitted(&self, descriptor: &TransDescriptor) {
        tracing::info!(gid = %descriptor.gid, "Msg submitted");
    }

    fn on_aborted(&self, descriptor: &TransDescriptor) {
        tracing::info!(gid = %descriptor.gid, "Msg aborted");
    }

    fn on_left_prepared(&self, descriptor: &TransDescriptor, outcome: Outcome) {
        tracing::warn!(gid = %descriptor.gid, outcome = %outcome, "Msg left prepared, coordinator will query back");
    }

    fn on_phase_failed(&self, descriptor: &TransDescriptor, phase: Phase, error: &TransError) {
        tracing::warn!(gid = %descriptor.gid, phase = %phase, error = %error, "Phase call failed");
    }
}

/// Forwards every event to each inner observer in order
pub struct Observers(pub Vec<Arc<dyn MsgObserver>>);

impl MsgObserver for Observers {
    fn on_prepared(&self, descriptor: &TransDescriptor) {
        self.0.iter().for_each(|o| o.on_prepared(descriptor));
    }

    fn on_business_finished(&self, descriptor: &TransDescriptor, outcome: Outcome) {
        self.0.iter().for_each(|o| o.on_business_finished(descriptor, outcome));
    }

    fn on_query_resolved(&self, descriptor: &TransDescriptor, outcome: Outcome) {
        self.0.iter().for_each(|o| o.on_query_resolved(descriptor, outcome));
    }

    fn on_submitted(&self, descriptor: &TransDescriptor) {
        self.0.iter().for_each(|o| o.on_submitted(descriptor));
    }

    fn on_aborted(&self, descriptor: &TransDescriptor) {
        self.0.iter().for_each(|o| o.on_aborted(descriptor));
    }

    fn on_left_prepared(&self, descriptor: &TransDescriptor, outcome: Outcome) {
        self.0.iter().for_each(|o| o.on_left_prepared(descriptor, outcome));
    }

    fn on_phase_failed(&self, descriptor: &TransDescriptor, phase: Phase, error: &TransError) {
        self.0.iter().for_each(|o| o.on_phase_failed(descriptor, phase, error));
    }
}
