//! Outcome classification for coordinator and branch responses
//!
//! The coordinator signals business results through reserved markers embedded
//! in otherwise free-form payloads. A transport-successful response can still
//! carry a `FAILURE` or `PENDING` marker, so classification looks at content,
//! not only at the HTTP status.

use crate::{TransError, RESULT_FAILURE, RESULT_PENDING, RESULT_SUCCESS};
use serde::{Deserialize, Serialize};

/// Typed result of one round trip
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Business accepted
    Success,
    /// Business explicitly rejected, permanently
    Failure,
    /// Business deferred, retry later
    Pending,
    /// Transport or unexpected error, truth unknown
    Ambiguous,
}

impl Outcome {
    /// Check if this outcome is final (success or permanent failure)
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Convert into the error vocabulary used by business actions
    pub fn into_result(self, reason: &str) -> Result<(), TransError> {
        match self {
            Self::Success => Ok(()),
            Self::Failure => Err(TransError::Failure),
            Self::Pending => Err(TransError::Pending),
            Self::Ambiguous => Err(TransError::Ambiguous {
                reason: reason.into(),
            }),
        }
    }

    /// Classify a business result by its error sentinel
    pub fn from_result(result: &Result<(), TransError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(TransError::Failure) => Self::Failure,
            Err(TransError::Pending) => Self::Pending,
            Err(_) => Self::Ambiguous,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
            Self::Ambiguous => "ambiguous",
        };
        f.write_str(s)
    }
}

/// Raw response as seen by the call layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl WireResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// HTTP-level error (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// Classify a round trip.
///
/// A transport error or an HTTP-level error is `Ambiguous`: the business
/// layer either never ran or ran without us being able to confirm it.
pub fn classify(response: Option<&WireResponse>, transport_error: Option<&str>) -> Outcome {
    if let Some(err) = transport_error {
        tracing::debug!(error = %err, "Round trip failed, outcome unknown");
        return Outcome::Ambiguous;
    }
    match response {
        None => Outcome::Ambiguous,
        Some(resp) if resp.is_error() => Outcome::Ambiguous,
        Some(resp) => classify_body(&resp.body),
    }
}

/// Scan a serialized body for the reserved markers.
///
/// `FAILURE` wins over `PENDING`; the two are never expected together.
pub fn classify_body(body: &str) -> Outcome {
    let failure = body.contains(RESULT_FAILURE);
    let pending = body.contains(RESULT_PENDING);
    match (failure, pending) {
        (true, true) => {
            tracing::warn!(body = %body, "Response carries both FAILURE and PENDING markers");
            Outcome::Failure
        }
        (true, false) => Outcome::Failure,
        (false, true) => Outcome::Pending,
        (false, false) => Outcome::Success,
    }
}

/// Classify an arbitrary result value by its JSON form
pub fn classify_value<T: Serialize + ?Sized>(value: &T) -> Outcome {
    match serde_json::to_string(value) {
        Ok(body) => classify_body(&body),
        Err(e) => {
            tracing::warn!(error = %e, "Result could not be serialized for classification");
            Outcome::Ambiguous
        }
    }
}

/// Response a branch endpoint (such as the query endpoint) sends for `result`.
///
/// Decided and pending results travel as markers with status 200; any other
/// error is reported as a 500 so the caller classifies it as ambiguous.
pub fn result_response(result: &Result<(), TransError>) -> WireResponse {
    let marker = match result {
        Ok(()) => RESULT_SUCCESS,
        Err(TransError::Failure) => RESULT_FAILURE,
        Err(TransError::Pending) => RESULT_PENDING,
        Err(e) => {
            return WireResponse::new(500, serde_json::json!({ "error": e.to_string() }).to_string())
        }
    };
    WireResponse::new(200, serde_json::json!({ "dtm_result": marker }).to_string())
}
