//! Transaction identity and protocol constants

use serde::{Deserialize, Serialize};

/// Transaction type tag for reliable messages
pub const MSG_TRANS_TYPE: &str = "msg";

/// Branch id reserved for the query-capable branch of a message transaction
pub const MSG_BRANCH_ID: &str = "00";

/// Operation name used by the message branch barrier
pub const MSG_OP: &str = "msg";

/// Barrier reason written by `query_prepared` when it wins the race
pub const REASON_ROLLBACK: &str = "rollback";

/// Marker for an explicit, permanent business rejection
pub const RESULT_FAILURE: &str = "FAILURE";

/// Marker for a business decision that is deferred
pub const RESULT_PENDING: &str = "PENDING";

/// Marker for a successful business result
pub const RESULT_SUCCESS: &str = "SUCCESS";

/// Global transaction identifier
///
/// Assigned once per logical transaction and never reused.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(pub Box<str>);

impl Gid {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier locally, without asking the coordinator
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().into_boxed_str())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no identifier was assigned
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Gid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gid({})", self.0)
    }
}

impl std::fmt::Display for Gid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Gid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Gid {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Current time in milliseconds since UNIX epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Replace `localhost` with `host.docker.internal` when `IS_DOCKER` is set.
///
/// Only the first occurrence is rewritten.
pub fn may_replace_localhost(host: &str) -> String {
    let in_docker = std::env::var("IS_DOCKER")
        .map(|v| !v.is_empty())
        .unwrap_or(false);
    replace_localhost_if(in_docker, host)
}

pub(crate) fn replace_localhost_if(in_docker: bool, host: &str) -> String {
    if in_docker {
        host.replacen("localhost", "host.docker.internal", 1)
    } else {
        host.to_string()
    }
}
