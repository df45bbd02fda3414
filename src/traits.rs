//! Coordinator call layer seam

use crate::{Gid, Outcome, TransDescriptor, TransError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Phase transition requested from the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Register intent before the local action runs
    Prepare,
    /// Commit the message, the coordinator will deliver the steps
    Submit,
    /// Drop the message
    Abort,
}

impl Phase {
    /// Path segment used on the coordinator endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Submit => "submit",
            Self::Abort => "abort",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal reference to one branch of a transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// Transaction id
    pub gid: Gid,
    /// Pattern tag
    pub trans_type: Box<str>,
    /// Branch id
    pub branch_id: Box<str>,
    /// Operation
    pub op: Box<str>,
}

impl BranchRef {
    /// Reference a branch of the given transaction
    pub fn of(descriptor: &TransDescriptor, branch_id: &str, op: &str) -> Self {
        Self {
            gid: descriptor.gid.clone(),
            trans_type: descriptor.trans_type.clone(),
            branch_id: branch_id.into(),
            op: op.into(),
        }
    }
}

/// Remote transaction coordinator as seen by the orchestrator.
///
/// `call_phase` reports only whether the coordinator accepted the transition.
/// `query_branch` asks a caller-registered endpoint for the authoritative
/// outcome of one branch.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = HttpCoordinator::new(HttpCoordinatorConfig::default())?;
/// let gid = coordinator.new_gid("http://localhost:36789/api/dtmsvr").await?;
/// ```
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Ask the coordinator for a fresh transaction id
    async fn new_gid(&self, server: &str) -> Result<Gid, TransError>;

    /// Send one phase transition for the descriptor
    async fn call_phase(&self, descriptor: &TransDescriptor, phase: Phase)
        -> Result<(), TransError>;

    /// Resolve the outcome of one branch through its query endpoint
    async fn query_branch(
        &self,
        descriptor: &TransDescriptor,
        branch_id: &str,
        op: &str,
        query_url: &str,
    ) -> Outcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(Phase::Prepare.to_string(), "prepare");
        assert_eq!(serde_json::to_string(&Phase::Abort).unwrap(), "\"abort\"");
    }

    #[test]
    fn test_branch_ref_copies_identity() {
        let d = TransDescriptor::new(Gid::new("g"), crate::MSG_TRANS_TYPE, "http://dtm");
        let b = BranchRef::of(&d, crate::MSG_BRANCH_ID, crate::MSG_OP);
        assert_eq!(b.gid, d.gid);
        assert_eq!(&*b.branch_id, "00");
        assert_eq!(&*b.op, "msg");
    }
}
