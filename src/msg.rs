//! Reliable message orchestration
//!
//! Prepare, run the local business action under the message branch barrier,
//! then submit or abort. When the business result is uncertain the query
//! endpoint decides.

use crate::state::{Aborted, Built, Prepared, Submitted};
use crate::{
    BarrierDb, BranchBarrier, Coordinator, Gid, Msg, MsgObserver, MsgStage, Outcome, Phase,
    TransDescriptor, TransError, TransOptions, MSG_BRANCH_ID, MSG_OP, MSG_TRANS_TYPE,
};
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// What a message run did, next to what its caller sees
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgReport {
    /// Transaction id
    pub gid: Gid,
    /// Stage the run ended in
    pub stage: MsgStage,
    /// Classification of the business result, if the action ran
    pub business: Option<Outcome>,
    /// Answer of the query endpoint, if it was asked
    pub resolved: Option<Outcome>,
    /// Result returned to the caller of `do_and_submit`
    pub result: Result<(), TransError>,
}

impl MsgReport {
    fn built(gid: Gid, result: Result<(), TransError>) -> Self {
        Self {
            gid,
            stage: MsgStage::Built,
            business: None,
            resolved: None,
            result,
        }
    }
}

enum Decision {
    Submit,
    Abort,
    Leave,
}

impl Msg<Built> {
    /// New message for coordinator `server`
    pub fn new(server: &str, gid: impl Into<Gid>) -> Self {
        Self::from_descriptor(TransDescriptor::new(gid.into(), MSG_TRANS_TYPE, server))
    }

    /// Register a step the coordinator delivers once the message is submitted
    pub fn add<T: Serialize + ?Sized>(mut self, action: &str, payload: &T) -> Result<Self, TransError> {
        self.descriptor.add(action, payload)?;
        Ok(self)
    }

    /// Replace the coordinator options
    pub fn with_options(mut self, options: TransOptions) -> Self {
        self.descriptor.options = options;
        self
    }

    /// Attach opaque data stored by the coordinator
    pub fn with_custom_data(mut self, custom_data: &str) -> Self {
        self.descriptor.custom_data = custom_data.into();
        self
    }

    /// Report lifecycle events to `observer` instead of the tracing observer
    pub fn with_observer(mut self, observer: Arc<dyn MsgObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register `query_prepared` and announce the message to the coordinator
    pub async fn prepare<C: Coordinator + ?Sized>(
        mut self,
        coordinator: &C,
        query_prepared: &str,
    ) -> Result<Msg<Prepared>, TransError> {
        self.descriptor.register_query_prepared(query_prepared);
        if let Err(e) = coordinator.call_phase(&self.descriptor, Phase::Prepare).await {
            self.observer.on_phase_failed(&self.descriptor, Phase::Prepare, &e);
            return Err(e);
        }
        self.observer.on_prepared(&self.descriptor);
        Ok(self.transition(Prepared {
            prepared_at_millis: crate::now_millis(),
        }))
    }

    /// Prepare, run `busi`, then submit or abort.
    ///
    /// - `busi` returns `Ok`: submit, and return the submit result.
    /// - `busi` returns [`TransError::Failure`]: abort, and return `Failure`.
    /// - `busi` returns any other error: ask the query endpoint. `Success`
    ///   submits, `Failure` aborts, anything else leaves the message prepared
    ///   for the coordinator to query back. The business error is returned.
    ///
    /// An error from `busi` is always what the caller gets, whatever the
    /// phase calls after it did. An abort error is only logged.
    pub async fn do_and_submit<C, F, Fut>(
        self,
        coordinator: &C,
        query_prepared: &str,
        busi: F,
    ) -> Result<(), TransError>
    where
        C: Coordinator + ?Sized,
        F: FnOnce(BranchBarrier) -> Fut,
        Fut: Future<Output = Result<(), TransError>>,
    {
        self.do_and_submit_report(coordinator, query_prepared, busi)
            .await
            .result
    }

    /// [`do_and_submit`](Self::do_and_submit) with `busi` run through
    /// [`BranchBarrier::call_with_db`] on the caller's database
    pub async fn do_and_submit_db<C, D, F>(
        self,
        coordinator: &C,
        query_prepared: &str,
        db: &D,
        busi: F,
    ) -> Result<(), TransError>
    where
        C: Coordinator + ?Sized,
        D: BarrierDb,
        F: for<'t> FnOnce(&'t mut D::Tx) -> BoxFuture<'t, Result<(), TransError>> + Send,
    {
        self.do_and_submit(coordinator, query_prepared, move |barrier| async move {
            barrier.call_with_db(db, busi).await
        })
        .await
    }

    /// [`do_and_submit`](Self::do_and_submit), also reporting which stage the
    /// message ended in
    pub async fn do_and_submit_report<C, F, Fut>(
        self,
        coordinator: &C,
        query_prepared: &str,
        busi: F,
    ) -> MsgReport
    where
        C: Coordinator + ?Sized,
        F: FnOnce(BranchBarrier) -> Fut,
        Fut: Future<Output = Result<(), TransError>>,
    {
        let gid = self.descriptor.gid.clone();

        let barrier = match BranchBarrier::for_msg(&self.descriptor.trans_type, &gid) {
            Ok(barrier) => barrier,
            Err(e) => {
                tracing::warn!(gid = %gid, error = %e, "Barrier unavailable, nothing sent");
                return MsgReport::built(gid, Err(e.into()));
            }
        };

        let prepared = match self.prepare(coordinator, query_prepared).await {
            Ok(prepared) => prepared,
            Err(e) => return MsgReport::built(gid, Err(e)),
        };

        let busi_result = busi(barrier).await;
        let business = Outcome::from_result(&busi_result);
        prepared
            .observer
            .on_business_finished(&prepared.descriptor, business);

        let (decision, resolved) = match &busi_result {
            Ok(()) => (Decision::Submit, None),
            Err(TransError::Failure) => (Decision::Abort, None),
            Err(e) => {
                tracing::info!(gid = %gid, error = %e, "Business result uncertain, querying prepared status");
                let outcome = coordinator
                    .query_branch(
                        &prepared.descriptor,
                        MSG_BRANCH_ID,
                        MSG_OP,
                        &prepared.descriptor.query_prepared,
                    )
                    .await;
                prepared
                    .observer
                    .on_query_resolved(&prepared.descriptor, outcome);
                let decision = match outcome {
                    Outcome::Success => Decision::Submit,
                    Outcome::Failure => Decision::Abort,
                    Outcome::Pending | Outcome::Ambiguous => Decision::Leave,
                };
                (decision, Some(outcome))
            }
        };

        let (stage, phase_result) = match decision {
            Decision::Submit => match prepared.submit(coordinator).await {
                Ok(_) => (MsgStage::Submitted, Ok(())),
                Err(e) => (MsgStage::Prepared, Err(e)),
            },
            Decision::Abort => match prepared.abort(coordinator).await {
                Ok(_) => (MsgStage::Aborted, Ok(())),
                // best effort, the coordinator queries back a prepared message
                Err(_) => (MsgStage::Prepared, Ok(())),
            },
            Decision::Leave => {
                let outcome = resolved.unwrap_or(Outcome::Ambiguous);
                prepared
                    .observer
                    .on_left_prepared(&prepared.descriptor, outcome);
                (MsgStage::Prepared, Ok(()))
            }
        };

        let result = match busi_result {
            Err(e) => Err(e),
            Ok(()) => phase_result,
        };

        MsgReport {
            gid,
            stage,
            business: Some(business),
            resolved,
            result,
        }
    }
}

impl Msg<Prepared> {
    /// Commit the message; the coordinator delivers every step
    pub async fn submit<C: Coordinator + ?Sized>(
        self,
        coordinator: &C,
    ) -> Result<Msg<Submitted>, TransError> {
        if let Err(e) = coordinator.call_phase(&self.descriptor, Phase::Submit).await {
            self.observer.on_phase_failed(&self.descriptor, Phase::Submit, &e);
            return Err(e);
        }
        self.observer.on_submitted(&self.descriptor);
        let prepared_at_millis = self.state.prepared_at_millis;
        Ok(self.transition(Submitted {
            prepared_at_millis,
            submitted_at_millis: crate::now_millis(),
        }))
    }

    /// Drop the message
    pub async fn abort<C: Coordinator + ?Sized>(
        self,
        coordinator: &C,
    ) -> Result<Msg<Aborted>, TransError> {
        if let Err(e) = coordinator.call_phase(&self.descriptor, Phase::Abort).await {
            self.observer.on_phase_failed(&self.descriptor, Phase::Abort, &e);
            return Err(e);
        }
        self.observer.on_aborted(&self.descriptor);
        let prepared_at_millis = self.state.prepared_at_millis;
        Ok(self.transition(Aborted {
            prepared_at_millis,
            aborted_at_millis: crate::now_millis(),
        }))
    }
}
