//! Barrier ledger on LMDB (feature `lmdb`)

use crate::ledger::{HeldKeys, KeyLocks};
use crate::{BarrierDb, BarrierError, BarrierKey, BarrierRecord, BarrierTx};
use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const MAP_SIZE: usize = 64 * 1024 * 1024;

fn storage(e: impl std::fmt::Display) -> BarrierError {
    BarrierError::Storage(e.to_string().into())
}

/// Run LMDB I/O on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, BarrierError>
where
    F: FnOnce() -> Result<T, BarrierError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(storage)?
}

/// Ledger persisted in an LMDB environment.
///
/// Writes are staged in memory and applied in one LMDB write transaction on
/// commit, off the async runtime. Transactions on the same barrier key are
/// serialized like in [`crate::InMemoryLedger`].
///
/// The inherent accessors ([`open`](Self::open), [`data`](Self::data),
/// [`barrier`](Self::barrier)) block on disk I/O.
#[derive(Clone)]
pub struct LmdbLedger {
    env: Env,
    barriers: Database<Str, Bytes>,
    data: Database<Str, Bytes>,
    locks: KeyLocks,
}

impl LmdbLedger {
    /// Open (or create) the ledger in directory `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BarrierError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(storage)?;

        // SAFETY: the environment is opened once per ledger and never mapped twice in this process
        let env = unsafe { EnvOpenOptions::new().map_size(MAP_SIZE).max_dbs(2).open(path) }
            .map_err(storage)?;

        let mut wtxn = env.write_txn().map_err(storage)?;
        let barriers: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("barriers"))
            .map_err(storage)?;
        let data: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("business"))
            .map_err(storage)?;
        wtxn.commit().map_err(storage)?;

        tracing::info!(path = %path.display(), "barrier ledger opened");
        Ok(Self {
            env,
            barriers,
            data,
            locks: KeyLocks::default(),
        })
    }

    /// Committed business value for `key`
    pub fn data(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        let rtxn = self.env.read_txn().map_err(storage)?;
        let value = self.data.get(&rtxn, key).map_err(storage)?;
        Ok(value.map(|v| v.to_vec()))
    }

    /// Committed barrier row for `key`
    pub fn barrier(&self, key: &BarrierKey) -> Result<Option<BarrierRecord>, BarrierError> {
        self.read_barrier(&key.storage_key())
    }

    fn read_barrier(&self, storage_key: &str) -> Result<Option<BarrierRecord>, BarrierError> {
        let rtxn = self.env.read_txn().map_err(storage)?;
        match self.barriers.get(&rtxn, storage_key).map_err(storage)? {
            Some(bytes) => BarrierRecord::decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn apply(
        &self,
        barriers: &HashMap<String, BarrierRecord>,
        data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), BarrierError> {
        let mut wtxn = self.env.write_txn().map_err(storage)?;
        for (key, record) in barriers {
            let encoded = record.encode()?;
            self.barriers.put(&mut wtxn, key, &encoded).map_err(storage)?;
        }
        for (key, value) in data {
            self.data.put(&mut wtxn, key, value).map_err(storage)?;
        }
        wtxn.commit().map_err(storage)
    }
}

#[async_trait]
impl BarrierDb for LmdbLedger {
    type Tx = LmdbTx;

    async fn begin(&self) -> Result<LmdbTx, BarrierError> {
        Ok(LmdbTx {
            ledger: self.clone(),
            held: HeldKeys::new(self.locks.clone()),
            barriers: HashMap::new(),
            data: BTreeMap::new(),
        })
    }
}

/// Transaction on an [`LmdbLedger`], with a key/value area for business writes
pub struct LmdbTx {
    ledger: LmdbLedger,
    held: HeldKeys,
    barriers: HashMap<String, BarrierRecord>,
    data: BTreeMap<String, Vec<u8>>,
}

impl LmdbTx {
    /// Stage a business write
    pub fn put(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.data.insert(key.to_string(), value.into());
    }

    /// Read a business value, staged writes first
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        if let Some(v) = self.data.get(key) {
            return Ok(Some(v.clone()));
        }
        let ledger = self.ledger.clone();
        let key = key.to_string();
        blocking(move || ledger.data(&key)).await
    }

    async fn stored(&self, storage_key: &str) -> Result<Option<BarrierRecord>, BarrierError> {
        if let Some(record) = self.barriers.get(storage_key) {
            return Ok(Some(record.clone()));
        }
        let ledger = self.ledger.clone();
        let storage_key = storage_key.to_string();
        blocking(move || ledger.read_barrier(&storage_key)).await
    }
}

#[async_trait]
impl BarrierTx for LmdbTx {
    async fn insert_barrier(
        &mut self,
        key: &BarrierKey,
        reason: &str,
    ) -> Result<bool, BarrierError> {
        let storage_key = key.storage_key();
        self.held.hold(&storage_key).await;
        if self.stored(&storage_key).await?.is_some() {
            return Ok(false);
        }
        self.barriers.insert(storage_key, BarrierRecord::new(reason));
        Ok(true)
    }

    async fn barrier_reason(&mut self, key: &BarrierKey) -> Result<Option<String>, BarrierError> {
        Ok(self.stored(&key.storage_key()).await?.map(|r| r.reason))
    }

    async fn commit(self) -> Result<(), BarrierError> {
        let LmdbTx {
            ledger,
            held,
            barriers,
            data,
        } = self;
        blocking(move || ledger.apply(&barriers, &data)).await?;
        drop(held);
        Ok(())
    }

    async fn rollback(self) -> Result<(), BarrierError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BranchBarrier, Gid, TransError};

    #[tokio::test]
    async fn test_barrier_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let barrier = BranchBarrier::for_msg(crate::MSG_TRANS_TYPE, &Gid::new("g-lmdb")).unwrap();

        {
            let ledger = LmdbLedger::open(dir.path()).unwrap();
            barrier
                .call_with_db(&ledger, |tx| {
                    Box::pin(async move {
                        tx.put("balance", b"70".to_vec());
                        Ok(())
                    })
                })
                .await
                .unwrap();
        }

        let ledger = LmdbLedger::open(dir.path()).unwrap();
        assert_eq!(ledger.data("balance").unwrap(), Some(b"70".to_vec()));
        assert_eq!(ledger.barrier(barrier.key()).unwrap().unwrap().reason, "msg");
        assert_eq!(barrier.query_prepared(&ledger).await, Ok(()));
        assert_eq!(
            barrier
                .call_with_db(&ledger, |_tx| Box::pin(async { Err(TransError::Failure) }))
                .await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_rolled_back_call_leaves_no_row() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LmdbLedger::open(dir.path()).unwrap();
        let barrier = BranchBarrier::for_msg(crate::MSG_TRANS_TYPE, &Gid::new("g-lmdb-2")).unwrap();

        let result = barrier
            .call_with_db(&ledger, |tx| {
                Box::pin(async move {
                    tx.put("balance", b"0".to_vec());
                    Err(TransError::business("rejected by db"))
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(ledger.barrier(barrier.key()).unwrap(), None);
        assert_eq!(ledger.data("balance").unwrap(), None);
        assert_eq!(barrier.query_prepared(&ledger).await, Err(TransError::Failure));
    }

    #[tokio::test]
    async fn test_distinct_keys_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LmdbLedger::open(dir.path()).unwrap();
        let first_key = BarrierKey::new("msg", &Gid::new("g-a"), "00", "msg");
        let second_key = BarrierKey::new("msg", &Gid::new("g-b"), "00", "msg");

        let mut first = ledger.begin().await.unwrap();
        assert!(first.insert_barrier(&first_key, "msg").await.unwrap());
        first.put("a", b"1".to_vec());

        let mut second = ledger.begin().await.unwrap();
        let inserted = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            second.insert_barrier(&second_key, "msg"),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(inserted);
        second.commit().await.unwrap();
        assert_eq!(ledger.barrier(&first_key).unwrap(), None);

        assert_eq!(first.get("a").await.unwrap(), Some(b"1".to_vec()));
        first.commit().await.unwrap();
        assert_eq!(ledger.data("a").unwrap(), Some(b"1".to_vec()));
        assert!(ledger.barrier(&second_key).unwrap().is_some());
    }
}
