//! Branch barrier: at-most-once execution of a local business action
//!
//! The barrier row and the business writes share one local transaction. A row
//! that already exists means the action committed before (or was fenced off by
//! `query_prepared`), so the action is not invoked again.

use crate::{
    BarrierDb, BarrierError, BarrierTx, BranchRef, Connector, DbConfig, DbPool, Gid, TransError,
    MSG_BRANCH_ID, MSG_OP, REASON_ROLLBACK,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Ledger key of one barrier row
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarrierKey {
    /// Pattern tag
    pub trans_type: Box<str>,
    /// Transaction id
    pub gid: Gid,
    /// Branch id
    pub branch_id: Box<str>,
    /// Operation
    pub op: Box<str>,
}

impl BarrierKey {
    /// Create a key
    pub fn new(trans_type: &str, gid: &Gid, branch_id: &str, op: &str) -> Self {
        Self {
            trans_type: trans_type.into(),
            gid: gid.clone(),
            branch_id: branch_id.into(),
            op: op.into(),
        }
    }

    /// Flat form used as the storage key
    pub fn storage_key(&self) -> String {
        format!(
            "barrier:{}:{}:{}:{}",
            self.trans_type, self.gid, self.branch_id, self.op
        )
    }
}

impl std::fmt::Display for BarrierKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// Guard for one branch of a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchBarrier {
    key: BarrierKey,
}

impl BranchBarrier {
    /// Acquire a barrier for the branch. Every field must be non-empty.
    pub fn new(trans_type: &str, gid: &Gid, branch_id: &str, op: &str) -> Result<Self, BarrierError> {
        if trans_type.is_empty() || gid.is_empty() || branch_id.is_empty() || op.is_empty() {
            return Err(BarrierError::InvalidTransInfo(
                format!(
                    "trans_type={:?} gid={:?} branch_id={:?} op={:?}",
                    trans_type,
                    gid.as_str(),
                    branch_id,
                    op
                )
                .into(),
            ));
        }
        Ok(Self {
            key: BarrierKey::new(trans_type, gid, branch_id, op),
        })
    }

    /// Barrier for the query-capable branch of a message transaction
    pub fn for_msg(trans_type: &str, gid: &Gid) -> Result<Self, BarrierError> {
        Self::new(trans_type, gid, MSG_BRANCH_ID, MSG_OP)
    }

    /// Barrier from the branch reference a coordinator or query call carries
    pub fn from_branch_ref(branch: &BranchRef) -> Result<Self, BarrierError> {
        Self::new(&branch.trans_type, &branch.gid, &branch.branch_id, &branch.op)
    }

    /// Ledger key of this barrier
    pub fn key(&self) -> &BarrierKey {
        &self.key
    }

    /// Transaction id
    pub fn gid(&self) -> &Gid {
        &self.key.gid
    }

    /// Branch id
    pub fn branch_id(&self) -> &str {
        &self.key.branch_id
    }

    /// Operation
    pub fn op(&self) -> &str {
        &self.key.op
    }

    /// Run `busi` at most once, inside a transaction on the caller's database.
    ///
    /// The barrier row is committed together with the business writes. If
    /// `busi` fails, everything is rolled back and a later call runs it again.
    /// A repeated call does not invoke `busi` and returns the first recorded
    /// outcome: `Ok` after a committed action, [`TransError::Failure`] once
    /// [`query_prepared`](Self::query_prepared) fenced the branch off.
    ///
    /// ```rust,ignore
    /// barrier
    ///     .call_with_db(&ledger, |tx| Box::pin(async move {
    ///         tx.put("balance", b"70".to_vec());
    ///         Ok(())
    ///     }))
    ///     .await?;
    /// ```
    pub async fn call_with_db<D, F>(&self, db: &D, busi: F) -> Result<(), TransError>
    where
        D: BarrierDb,
        F: for<'t> FnOnce(&'t mut D::Tx) -> BoxFuture<'t, Result<(), TransError>> + Send,
    {
        let mut tx = db.begin().await?;

        let inserted = match tx.insert_barrier(&self.key, &self.key.op).await {
            Ok(inserted) => inserted,
            Err(e) => {
                rollback(tx, &self.key).await;
                return Err(e.into());
            }
        };

        if !inserted {
            let reason = tx.barrier_reason(&self.key).await;
            rollback(tx, &self.key).await;
            let reason = reason?;
            tracing::info!(key = %self.key, reason = ?reason, "Barrier already recorded, business call skipped");
            return match reason.as_deref() {
                Some(REASON_ROLLBACK) => Err(TransError::Failure),
                _ => Ok(()),
            };
        }

        match busi(&mut tx).await {
            Ok(()) => {
                tx.commit().await?;
                tracing::debug!(key = %self.key, "Business call committed");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(key = %self.key, error = %e, "Business call failed, rolling back");
                rollback(tx, &self.key).await;
                Err(e)
            }
        }
    }

    /// Same as [`call_with_db`](Self::call_with_db), on a handle taken from `pool`.
    pub async fn call_with_pool<C, F>(
        &self,
        pool: &DbPool<C>,
        config: &DbConfig,
        busi: F,
    ) -> Result<(), TransError>
    where
        C: Connector,
        F: for<'t> FnOnce(&'t mut <C::Db as BarrierDb>::Tx) -> BoxFuture<'t, Result<(), TransError>>
            + Send,
    {
        let db = pool.get(config).await?;
        self.call_with_db(db.as_ref(), busi).await
    }

    /// Answer a query-back for the message branch of this transaction.
    ///
    /// Writes a `rollback` row for the message branch. If that write wins, the
    /// local action never committed and is now fenced off, so the answer is
    /// `Err(Failure)`. Otherwise the stored reason decides.
    pub async fn query_prepared<D: BarrierDb>(&self, db: &D) -> Result<(), TransError> {
        let key = BarrierKey::new(&self.key.trans_type, &self.key.gid, MSG_BRANCH_ID, MSG_OP);
        let mut tx = db.begin().await?;

        let lookup = async {
            let inserted = tx.insert_barrier(&key, REASON_ROLLBACK).await?;
            let reason = tx.barrier_reason(&key).await?;
            Ok::<_, BarrierError>((inserted, reason))
        }
        .await;

        let (inserted, reason) = match lookup {
            Ok(found) => found,
            Err(e) => {
                rollback(tx, &key).await;
                return Err(e.into());
            }
        };
        tx.commit().await?;

        if inserted || reason.as_deref() == Some(REASON_ROLLBACK) {
            tracing::info!(key = %key, "Prepared message has no committed local action");
            Err(TransError::Failure)
        } else {
            Ok(())
        }
    }
}

async fn rollback<T: BarrierTx>(tx: T, key: &BarrierKey) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(key = %key, error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryConnector, InMemoryLedger};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn msg_barrier(gid: &str) -> BranchBarrier {
        BranchBarrier::for_msg(crate::MSG_TRANS_TYPE, &Gid::new(gid)).unwrap()
    }

    #[test]
    fn test_acquire_rejects_empty_fields() {
        assert!(matches!(
            BranchBarrier::new("msg", &Gid::new(""), "00", "msg"),
            Err(BarrierError::InvalidTransInfo(_))
        ));
        assert!(BranchBarrier::new("", &Gid::new("g"), "00", "msg").is_err());
        assert!(BranchBarrier::new("saga", &Gid::new("g"), "01", "action").is_ok());
    }

    #[tokio::test]
    async fn test_side_effect_runs_once() {
        let ledger = InMemoryLedger::new();
        let barrier = BranchBarrier::new("saga", &Gid::new("g1"), "01", "action").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            barrier
                .call_with_db(&ledger, move |tx| {
                    Box::pin(async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tx.put("balance", b"70".to_vec());
                        Ok(())
                    })
                })
                .await
                .unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.data("balance").await, Some(b"70".to_vec()));
    }

    #[tokio::test]
    async fn test_failed_call_is_rolled_back_and_retried() {
        let ledger = InMemoryLedger::new();
        let barrier = msg_barrier("g2");

        let err = barrier
            .call_with_db(&ledger, |tx| {
                Box::pin(async move {
                    tx.put("balance", b"0".to_vec());
                    Err(TransError::business("insufficient funds"))
                })
            })
            .await;
        assert_eq!(err, Err(TransError::business("insufficient funds")));
        assert_eq!(ledger.barrier_count().await, 0);
        assert_eq!(ledger.data("balance").await, None);

        barrier
            .call_with_db(&ledger, |tx| {
                Box::pin(async move {
                    tx.put("balance", b"70".to_vec());
                    Ok(())
                })
            })
            .await
            .unwrap();
        assert_eq!(ledger.data("balance").await, Some(b"70".to_vec()));
    }

    #[tokio::test]
    async fn test_msg_branch_replay_returns_first_outcome() {
        let ledger = InMemoryLedger::new();
        let barrier = msg_barrier("g3");
        fn ok(tx: &mut crate::InMemoryTx) -> BoxFuture<'_, Result<(), TransError>> {
            tx.put("k", b"v".to_vec());
            Box::pin(async { Ok(()) })
        }
        fn reject(_tx: &mut crate::InMemoryTx) -> BoxFuture<'_, Result<(), TransError>> {
            Box::pin(async { Err(TransError::business("must not run")) })
        }

        barrier.call_with_db(&ledger, ok).await.unwrap();
        assert_eq!(barrier.call_with_db(&ledger, reject).await, Ok(()));
        assert_eq!(barrier.call_with_db(&ledger, reject).await, Ok(()));
        assert_eq!(ledger.barrier_count().await, 1);
    }

    #[tokio::test]
    async fn test_independent_gids_run_concurrently() {
        let ledger = InMemoryLedger::new();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let parked = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                msg_barrier("ga")
                    .call_with_db(&ledger, move |tx| {
                        Box::pin(async move {
                            let _ = started_tx.send(());
                            let _ = release_rx.await;
                            tx.put("a", b"1".to_vec());
                            Ok(())
                        })
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let other = tokio::time::timeout(
            Duration::from_secs(2),
            msg_barrier("gb").call_with_db(&ledger, |tx| {
                Box::pin(async move {
                    tx.put("b", b"2".to_vec());
                    Ok(())
                })
            }),
        )
        .await;
        assert_eq!(other, Ok(Ok(())));
        assert_eq!(ledger.data("b").await, Some(b"2".to_vec()));

        release_tx.send(()).unwrap();
        assert_eq!(parked.await.unwrap(), Ok(()));
        assert_eq!(ledger.barrier_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_replays_run_action_once() {
        let ledger = InMemoryLedger::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    msg_barrier("g-race")
                        .call_with_db(&ledger, move |_tx| {
                            Box::pin(async move {
                                runs.fetch_add(1, Ordering::SeqCst);
                                tokio::task::yield_now().await;
                                Ok(())
                            })
                        })
                        .await
                })
            })
            .collect();
        for call in calls {
            assert_eq!(call.await.unwrap(), Ok(()));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_prepared_after_commit_is_success() {
        let ledger = InMemoryLedger::new();
        let barrier = msg_barrier("g4");
        barrier
            .call_with_db(&ledger, |_tx| Box::pin(async { Ok(()) }))
            .await
            .unwrap();

        assert_eq!(barrier.query_prepared(&ledger).await, Ok(()));
        assert_eq!(barrier.query_prepared(&ledger).await, Ok(()));
    }

    #[tokio::test]
    async fn test_query_prepared_fences_off_late_action() {
        let ledger = InMemoryLedger::new();
        let barrier = msg_barrier("g5");

        assert_eq!(barrier.query_prepared(&ledger).await, Err(TransError::Failure));
        assert_eq!(barrier.query_prepared(&ledger).await, Err(TransError::Failure));

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let late = barrier
            .call_with_db(&ledger, move |_tx| {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await;
        assert_eq!(late, Err(TransError::Failure));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_from_branch_ref() {
        let branch = BranchRef {
            gid: Gid::new("g6"),
            trans_type: "msg".into(),
            branch_id: "00".into(),
            op: "msg".into(),
        };
        let barrier = BranchBarrier::from_branch_ref(&branch).unwrap();
        assert_eq!(barrier, msg_barrier("g6"));
    }

    #[tokio::test]
    async fn test_call_with_pool_uses_shared_handle() {
        let pool = DbPool::new(InMemoryConnector::new());
        let config: DbConfig = serde_json::from_value(serde_json::json!({
            "driver": "mysql",
            "host": "localhost",
            "port": 3306,
            "user": "root",
            "password": "secret",
            "database": "dtm_busi"
        }))
        .unwrap();
        let barrier = BranchBarrier::new("saga", &Gid::new("g7"), "01", "action").unwrap();

        barrier
            .call_with_pool(&pool, &config, |tx| {
                Box::pin(async move {
                    tx.put("balance", b"1".to_vec());
                    Ok(())
                })
            })
            .await
            .unwrap();

        let db = pool.get(&config).await.unwrap();
        assert_eq!(db.data("balance").await, Some(b"1".to_vec()));
        assert_eq!(pool.connector().opened(), 1);
    }
}
