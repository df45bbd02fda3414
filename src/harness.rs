//! Test harness: a scripted in-process coordinator

use crate::{Coordinator, Gid, Outcome, Phase, TransDescriptor, TransError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// One call received by a [`RecordingCoordinator`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinatorCall {
    NewGid,
    Phase {
        gid: Gid,
        phase: Phase,
        descriptor: Box<TransDescriptor>,
    },
    Query {
        gid: Gid,
        branch_id: Box<str>,
        op: Box<str>,
        url: Box<str>,
    },
}

/// Coordinator that records calls and answers from a script.
///
/// Phase calls succeed unless a failure was queued with [`fail_phase`](Self::fail_phase).
/// Queries answer `Success` unless an outcome was queued with
/// [`answer_query`](Self::answer_query).
#[derive(Default)]
pub struct RecordingCoordinator {
    calls: Mutex<Vec<CoordinatorCall>>,
    phase_failures: Mutex<HashMap<Phase, VecDeque<TransError>>>,
    query_answers: Mutex<VecDeque<Outcome>>,
    next_gid: AtomicU64,
}

impl RecordingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `phase` with `error`
    pub fn fail_phase(&self, phase: Phase, error: TransError) {
        self.phase_failures
            .lock()
            .entry(phase)
            .or_default()
            .push_back(error);
    }

    /// Answer the next query with `outcome`
    pub fn answer_query(&self, outcome: Outcome) {
        self.query_answers.lock().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<CoordinatorCall> {
        self.calls.lock().clone()
    }

    /// Phases received, in order, including failed ones
    pub fn phases(&self) -> Vec<Phase> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CoordinatorCall::Phase { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, CoordinatorCall::Query { .. }))
            .count()
    }

    /// Descriptor carried by the last prepare call
    pub fn prepared_descriptor(&self) -> Option<TransDescriptor> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            CoordinatorCall::Phase {
                phase: Phase::Prepare,
                descriptor,
                ..
            } => Some(descriptor.as_ref().clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl Coordinator for RecordingCoordinator {
    async fn new_gid(&self, _server: &str) -> Result<Gid, TransError> {
        self.calls.lock().push(CoordinatorCall::NewGid);
        let n = self.next_gid.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Gid::new(format!("recorded-{}", n)))
    }

    async fn call_phase(
        &self,
        descriptor: &TransDescriptor,
        phase: Phase,
    ) -> Result<(), TransError> {
        self.calls.lock().push(CoordinatorCall::Phase {
            gid: descriptor.gid.clone(),
            phase,
            descriptor: Box::new(descriptor.clone()),
        });
        let failure = self
            .phase_failures
            .lock()
            .get_mut(&phase)
            .and_then(|queue| queue.pop_front());
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn query_branch(
        &self,
        descriptor: &TransDescriptor,
        branch_id: &str,
        op: &str,
        query_url: &str,
    ) -> Outcome {
        self.calls.lock().push(CoordinatorCall::Query {
            gid: descriptor.gid.clone(),
            branch_id: branch_id.into(),
            op: op.into(),
            url: query_url.into(),
        });
        self.query_answers
            .lock()
            .pop_front()
            .unwrap_or(Outcome::Success)
    }
}

/// Install a test-friendly tracing subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
