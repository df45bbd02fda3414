//! Error types for message transactions and the branch barrier

use crate::Phase;
use serde::{Deserialize, Serialize};

/// Error surfaced by a message transaction or by a business action.
///
/// `Failure` is the sentinel a business action returns to reject the
/// transaction permanently. Any other error from a business action is treated
/// as uncertain and resolved through the query endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TransError {
    /// Permanent rejection, triggers abort and is never retried
    #[error("FAILURE")]
    Failure,
    /// Business deferred its decision
    #[error("PENDING")]
    Pending,
    /// Business action failed and may or may not have applied
    #[error("business error: {reason}")]
    Business {
        /// Error description
        reason: Box<str>,
    },
    /// The truth could not be determined from the response
    #[error("ambiguous outcome: {reason}")]
    Ambiguous {
        /// Error description
        reason: Box<str>,
    },
    /// The round trip itself failed
    #[error("transport error: {reason}")]
    Transport {
        /// Error description
        reason: Box<str>,
    },
    /// The coordinator did not accept a phase transition
    #[error("coordinator rejected {phase}: {reason}")]
    Coordinator {
        /// Phase that was rejected
        phase: Phase,
        /// Response body or error description
        reason: Box<str>,
    },
    /// The idempotency guard could not be acquired or used
    #[error("barrier unavailable: {0}")]
    GuardUnavailable(#[from] BarrierError),
    /// A payload could not be encoded or a response could not be decoded
    #[error("serialization error: {reason}")]
    Serialization {
        /// Error description
        reason: Box<str>,
    },
}

impl TransError {
    /// Build an uncertain business error
    pub fn business(reason: impl Into<Box<str>>) -> Self {
        Self::Business {
            reason: reason.into(),
        }
    }

    /// Check if this is the permanent failure sentinel
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Check if this is the pending sentinel
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl From<serde_json::Error> for TransError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string().into(),
        }
    }
}

impl From<reqwest::Error> for TransError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            reason: e.to_string().into(),
        }
    }
}

/// Error from the branch barrier and its ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BarrierError {
    /// One of trans type, gid, branch id or op was empty
    #[error("invalid trans info: {0}")]
    InvalidTransInfo(Box<str>),
    /// Ledger storage failed
    #[error("storage error: {0}")]
    Storage(Box<str>),
    /// Database configuration could not be used
    #[error("config error: {0}")]
    Config(Box<str>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_render_as_markers() {
        assert_eq!(TransError::Failure.to_string(), crate::RESULT_FAILURE);
        assert_eq!(TransError::Pending.to_string(), crate::RESULT_PENDING);
    }

    #[test]
    fn test_barrier_error_converts() {
        let err: TransError = BarrierError::InvalidTransInfo("gid".into()).into();
        assert!(matches!(err, TransError::GuardUnavailable(_)));
        assert!(!err.is_failure());
    }
}
