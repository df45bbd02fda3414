//! Reliable Message Transactions
//!
//! Client side of the reliable asynchronous message pattern: a local database
//! mutation and a remote side effect become eventually consistent without a
//! global two-phase commit. The message is prepared at the coordinator, the
//! local action runs at most once under a branch barrier, and the message is
//! then submitted or aborted. When the local result is uncertain, the
//! registered query endpoint decides.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let coordinator = HttpCoordinator::new(HttpCoordinatorConfig::default())?;
//! let server = "http://localhost:36789/api/dtmsvr";
//! let gid = coordinator.new_gid(server).await?;
//!
//! Msg::new(server, gid)
//!     .add("http://localhost:8081/api/busi/TransIn", &json!({"amount": 30}))?
//!     .do_and_submit_db(&coordinator, "http://localhost:8081/api/busi/QueryPrepared", &ledger, |tx| {
//!         Box::pin(async move {
//!             tx.put("balance", b"70".to_vec());
//!             Ok(())
//!         })
//!     })
//!     .await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod context;
mod descriptor;
mod errors;
mod outcome;
mod state;

// === Orchestration ===
mod msg;
mod traits;

// === Transport ===
mod http;

// === Storage ===
mod barrier;
mod ledger;
#[cfg(feature = "lmdb")]
mod lmdb;
mod pool;

// === Observability ===
mod observer;
mod stats;

// === Test Harness ===
#[cfg(any(test, feature = "test-harness"))]
mod harness;

// === Re-exports ===

// Types
pub use context::{
    may_replace_localhost, now_millis, Gid, MSG_BRANCH_ID, MSG_OP, MSG_TRANS_TYPE,
    REASON_ROLLBACK, RESULT_FAILURE, RESULT_PENDING, RESULT_SUCCESS,
};
pub use descriptor::{Step, TransDescriptor, TransOptions};
pub use outcome::{
    classify, classify_body, classify_value, result_response, Outcome, WireResponse,
};

// State (typestate)
pub use state::{markers, Aborted, Built, Msg, MsgStage, Prepared, Submitted};

// Errors
pub use errors::{BarrierError, TransError};

// Orchestration
pub use msg::MsgReport;
pub use traits::{BranchRef, Coordinator, Phase};

// Transport
pub use http::{HttpCoordinator, HttpCoordinatorConfig};

// Storage
pub use barrier::{BarrierKey, BranchBarrier};
pub use ledger::{BarrierDb, BarrierRecord, BarrierTx, InMemoryLedger, InMemoryTx};
#[cfg(feature = "lmdb")]
pub use lmdb::{LmdbLedger, LmdbTx};
pub use pool::{Connector, DbConfig, DbPool, Driver, InMemoryConnector};

// Observability
pub use observer::{MsgObserver, NoOpObserver, Observers, TracingObserver};
pub use stats::{MsgStats, MsgStatsSnapshot};

// Test harness
#[cfg(any(test, feature = "test-harness"))]
pub use harness::{init_tracing, CoordinatorCall, RecordingCoordinator};
