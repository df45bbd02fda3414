//! Barrier ledger storage traits

use crate::{BarrierError, BarrierKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Database holding the barrier ledger next to the business data
#[async_trait]
pub trait BarrierDb: Send + Sync + 'static {
    /// Local transaction type shared by the barrier and the business writes
    type Tx: BarrierTx;

    /// Start one local atomic scope
    async fn begin(&self) -> Result<Self::Tx, BarrierError>;
}

/// One local transaction
#[async_trait]
pub trait BarrierTx: Send + 'static {
    /// Insert the barrier row. Returns `false` if it already existed.
    async fn insert_barrier(&mut self, key: &BarrierKey, reason: &str)
        -> Result<bool, BarrierError>;

    /// Reason stored with the barrier row, if any
    async fn barrier_reason(&mut self, key: &BarrierKey) -> Result<Option<String>, BarrierError>;

    /// Make every write of this transaction durable
    async fn commit(self) -> Result<(), BarrierError>;

    /// Discard every write of this transaction
    async fn rollback(self) -> Result<(), BarrierError>;
}

/// Persisted barrier row
#[derive(Clone, Debug, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct BarrierRecord {
    /// Operation that created the row, or `rollback`
    pub reason: String,
    /// Creation time (millis since UNIX epoch)
    pub created_at_millis: u64,
}

impl BarrierRecord {
    /// Create a record stamped with the current time
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            created_at_millis: crate::now_millis(),
        }
    }

    /// Encode for on-disk storage
    pub fn encode(&self) -> Result<Vec<u8>, BarrierError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| BarrierError::Storage(e.to_string().into()))
    }

    /// Decode a stored record. The input does not need to be aligned.
    pub fn decode(bytes: &[u8]) -> Result<Self, BarrierError> {
        let mut aligned = rkyv::util::AlignedVec::<16>::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| BarrierError::Storage(e.to_string().into()))
    }
}

/// Per-key locks shared by the transactions of one ledger.
///
/// Entries are created on first use and removed once no transaction holds or
/// waits for them.
#[derive(Clone, Default)]
pub(crate) struct KeyLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyLocks {
    async fn acquire(&self, storage_key: &str) -> KeyGuard {
        let lock = self
            .locks
            .lock()
            .entry(storage_key.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            key: storage_key.to_string(),
            guard: Some(guard),
            locks: self.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: KeyLocks,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock();
        if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// Barrier keys locked by one transaction, released when it is dropped
pub(crate) struct HeldKeys {
    locks: KeyLocks,
    held: Vec<KeyGuard>,
}

impl HeldKeys {
    pub(crate) fn new(locks: KeyLocks) -> Self {
        Self {
            locks,
            held: Vec::new(),
        }
    }

    /// Lock `storage_key` unless this transaction already holds it
    pub(crate) async fn hold(&mut self, storage_key: &str) {
        if self.held.iter().any(|g| g.key == storage_key) {
            return;
        }
        let guard = self.locks.acquire(storage_key).await;
        self.held.push(guard);
    }
}

#[derive(Default)]
struct LedgerState {
    barriers: HashMap<String, BarrierRecord>,
    data: BTreeMap<String, Vec<u8>>,
}

/// In-memory ledger for testing and single-process use.
///
/// Transactions touching the same barrier key are serialized: the second one
/// waits in `insert_barrier` until the first committed or rolled back.
/// Transactions on different keys run concurrently; their business writes are
/// applied at commit, last writer wins.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    locks: KeyLocks,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed business value for `key`
    pub async fn data(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().data.get(key).cloned()
    }

    /// Committed barrier row for `key`
    pub async fn barrier(&self, key: &BarrierKey) -> Option<BarrierRecord> {
        self.state.lock().barriers.get(&key.storage_key()).cloned()
    }

    /// Number of committed barrier rows
    pub async fn barrier_count(&self) -> usize {
        self.state.lock().barriers.len()
    }
}

#[async_trait]
impl BarrierDb for InMemoryLedger {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, BarrierError> {
        Ok(InMemoryTx {
            state: self.state.clone(),
            held: HeldKeys::new(self.locks.clone()),
            barriers: HashMap::new(),
            data: BTreeMap::new(),
        })
    }
}

/// Transaction on an [`InMemoryLedger`], with a key/value area for business writes
pub struct InMemoryTx {
    state: Arc<Mutex<LedgerState>>,
    held: HeldKeys,
    barriers: HashMap<String, BarrierRecord>,
    data: BTreeMap<String, Vec<u8>>,
}

impl InMemoryTx {
    /// Stage a business write
    pub fn put(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.data.insert(key.to_string(), value.into());
    }

    /// Read a business value, staged writes first
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.data.get(key) {
            Some(v) => Some(v.clone()),
            None => self.state.lock().data.get(key).cloned(),
        }
    }

    fn stored(&self, storage_key: &str) -> Option<BarrierRecord> {
        match self.barriers.get(storage_key) {
            Some(record) => Some(record.clone()),
            None => self.state.lock().barriers.get(storage_key).cloned(),
        }
    }
}

#[async_trait]
impl BarrierTx for InMemoryTx {
    async fn insert_barrier(
        &mut self,
        key: &BarrierKey,
        reason: &str,
    ) -> Result<bool, BarrierError> {
        let storage_key = key.storage_key();
        self.held.hold(&storage_key).await;
        if self.stored(&storage_key).is_some() {
            return Ok(false);
        }
        self.barriers.insert(storage_key, BarrierRecord::new(reason));
        Ok(true)
    }

    async fn barrier_reason(&mut self, key: &BarrierKey) -> Result<Option<String>, BarrierError> {
        Ok(self.stored(&key.storage_key()).map(|r| r.reason))
    }

    async fn commit(self) -> Result<(), BarrierError> {
        let mut state = self.state.lock();
        state.barriers.extend(self.barriers);
        state.data.extend(self.data);
        Ok(())
    }

    async fn rollback(self) -> Result<(), BarrierError> {
        Ok(())
    }
}
