//! Transaction descriptor sent to the coordinator

use crate::{Gid, TransError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One registered business step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// URL the coordinator calls once the message is submitted
    pub action: Box<str>,
}

/// Per-transaction options understood by the coordinator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransOptions {
    /// Coordinator waits for the steps to finish before answering submit
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wait_result: bool,
    /// Seconds before an unfinished transaction is failed (0 = coordinator default)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout_to_fail: u64,
    /// Seconds between coordinator retries (0 = coordinator default)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_interval: u64,
    /// Headers forwarded on every branch call, including the query call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branch_headers: BTreeMap<String, String>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// The record describing one distributed transaction instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransDescriptor {
    /// Global transaction id
    pub gid: Gid,
    /// Pattern tag, `msg` here
    pub trans_type: Box<str>,
    /// Registered steps, append-only
    pub steps: Vec<Step>,
    /// Serialized step arguments, index-aligned with `steps`
    pub payloads: Vec<String>,
    /// Query-back endpoint used to resolve a prepared transaction
    #[serde(default, skip_serializing_if = "str::is_empty")]
    pub query_prepared: Box<str>,
    /// Opaque caller data stored by the coordinator
    #[serde(default, skip_serializing_if = "str::is_empty")]
    pub custom_data: Box<str>,
    /// Coordinator options
    #[serde(flatten)]
    pub options: TransOptions,
    /// Coordinator address, never sent on the wire
    #[serde(skip)]
    pub server: Box<str>,
}

impl TransDescriptor {
    /// Create a descriptor for a fresh transaction
    pub fn new(gid: Gid, trans_type: &str, server: &str) -> Self {
        Self {
            gid,
            trans_type: trans_type.into(),
            steps: Vec::new(),
            payloads: Vec::new(),
            query_prepared: "".into(),
            custom_data: "".into(),
            options: TransOptions::default(),
            server: server.into(),
        }
    }

    /// Append a step and its serialized payload.
    ///
    /// Nothing is appended if the payload cannot be serialized.
    pub fn add<T: Serialize + ?Sized>(
        &mut self,
        action: &str,
        payload: &T,
    ) -> Result<&mut Self, TransError> {
        let encoded = serde_json::to_string(payload)?;
        self.steps.push(Step {
            action: action.into(),
        });
        self.payloads.push(encoded);
        Ok(self)
    }

    /// Register the query-back endpoint.
    ///
    /// A non-empty argument replaces the current value; an empty one keeps it.
    pub fn register_query_prepared(&mut self, url: &str) {
        if !url.is_empty() {
            self.query_prepared = url.into();
        }
    }

    /// `steps` and `payloads` line up one to one
    pub fn is_consistent(&self) -> bool {
        self.steps.len() == self.payloads.len()
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> Result<String, TransError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> TransDescriptor {
        TransDescriptor::new(Gid::new("gid-1"), crate::MSG_TRANS_TYPE, "http://localhost:36789/api/dtmsvr")
    }

    #[test]
    fn test_add_keeps_steps_and_payloads_aligned() {
        let mut d = descriptor();
        d.add("http://svc/TransOut", &json!({"amount": 30}))
            .unwrap()
            .add("http://svc/TransIn", &json!({"amount": 30}))
            .unwrap();
        assert_eq!(d.steps.len(), 2);
        assert!(d.is_consistent());
        assert_eq!(d.payloads[0], r#"{"amount":30}"#);
        assert_eq!(&*d.steps[1].action, "http://svc/TransIn");
    }

    #[test]
    fn test_unserializable_payload_appends_nothing() {
        let mut d = descriptor();
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1u8);
        assert!(matches!(
            d.add("http://svc/x", &bad),
            Err(TransError::Serialization { .. })
        ));
        assert!(d.steps.is_empty());
        assert!(d.is_consistent());
    }

    #[test]
    fn test_register_query_prepared() {
        let mut d = descriptor();
        d.register_query_prepared("");
        assert!(d.query_prepared.is_empty());
        d.register_query_prepared("http://svc/query");
        d.register_query_prepared("");
        assert_eq!(&*d.query_prepared, "http://svc/query");
    }

    #[test]
    fn test_wire_form_omits_server() {
        let mut d = descriptor();
        d.add("http://svc/TransIn", &json!({"amount": 1})).unwrap();
        d.register_query_prepared("http://svc/query");
        d.options.wait_result = true;
        let v: serde_json::Value = serde_json::from_str(&d.to_json().unwrap()).unwrap();
        assert_eq!(v["gid"], "gid-1");
        assert_eq!(v["trans_type"], "msg");
        assert_eq!(v["steps"][0]["action"], "http://svc/TransIn");
        assert_eq!(v["query_prepared"], "http://svc/query");
        assert_eq!(v["wait_result"], true);
        assert!(v.get("server").is_none());
        assert!(v.get("retry_interval").is_none());
    }
}
