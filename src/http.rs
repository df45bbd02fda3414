//! HTTP coordinator client

use crate::{
    classify, may_replace_localhost, Coordinator, Gid, Outcome, Phase, TransDescriptor,
    TransError, WireResponse,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for [`HttpCoordinator`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpCoordinatorConfig {
    /// Whole-request timeout
    pub timeout_millis: u64,
    /// TCP connect timeout
    pub connect_timeout_millis: u64,
}

impl Default for HttpCoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout_millis: 3000,
            connect_timeout_millis: 1000,
        }
    }
}

#[derive(Deserialize)]
struct NewGidResponse {
    gid: String,
}

/// Coordinator reached over HTTP with JSON bodies
pub struct HttpCoordinator {
    client: Client,
}

impl HttpCoordinator {
    /// Create a client with the given timeouts
    pub fn new(config: HttpCoordinatorConfig) -> Result<Self, TransError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_millis))
            .connect_timeout(Duration::from_millis(config.connect_timeout_millis))
            .build()?;
        Ok(Self { client })
    }

    /// Reuse an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn read(resp: reqwest::Response) -> Result<WireResponse, TransError> {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(WireResponse::new(status, body))
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn new_gid(&self, server: &str) -> Result<Gid, TransError> {
        let url = may_replace_localhost(&format!("{}/newGid", server));
        tracing::debug!(url = %url, "requesting new gid");
        let resp = Self::read(self.client.get(&url).send().await?).await?;
        tracing::debug!(url = %url, status = resp.status, body = %resp.body, "requested new gid");
        if resp.is_error() {
            return Err(TransError::Transport {
                reason: resp.body.into(),
            });
        }
        let parsed: NewGidResponse = serde_json::from_str(&resp.body)?;
        Ok(Gid::new(parsed.gid))
    }

    async fn call_phase(
        &self,
        descriptor: &TransDescriptor,
        phase: Phase,
    ) -> Result<(), TransError> {
        let url = may_replace_localhost(&format!("{}/{}", descriptor.server, phase));
        tracing::debug!(gid = %descriptor.gid, phase = %phase, url = %url, steps = descriptor.steps.len(), "requesting");

        let sent = self.client.post(&url).json(descriptor).send().await;
        let resp = match sent {
            Ok(resp) => Self::read(resp).await?,
            Err(e) => {
                tracing::warn!(gid = %descriptor.gid, phase = %phase, error = %e, "Coordinator unreachable");
                return Err(e.into());
            }
        };
        tracing::debug!(gid = %descriptor.gid, phase = %phase, status = resp.status, body = %resp.body, "requested");

        match classify(Some(&resp), None) {
            Outcome::Success => Ok(()),
            Outcome::Failure => Err(TransError::Failure),
            Outcome::Pending => Err(TransError::Pending),
            Outcome::Ambiguous => Err(TransError::Coordinator {
                phase,
                reason: resp.body.into(),
            }),
        }
    }

    async fn query_branch(
        &self,
        descriptor: &TransDescriptor,
        branch_id: &str,
        op: &str,
        query_url: &str,
    ) -> Outcome {
        let url = may_replace_localhost(query_url);
        tracing::debug!(gid = %descriptor.gid, branch_id, op, url = %url, "querying branch");

        let mut req = self.client.get(&url).query(&[
            ("gid", descriptor.gid.as_str()),
            ("trans_type", &*descriptor.trans_type),
            ("branch_id", branch_id),
            ("op", op),
        ]);
        for (name, value) in &descriptor.options.branch_headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = match req.send().await {
            Ok(resp) => Self::read(resp).await,
            Err(e) => Err(e.into()),
        };
        let outcome = match &resp {
            Ok(resp) => classify(Some(resp), None),
            Err(e) => classify(None, Some(e.to_string().as_str())),
        };
        tracing::debug!(gid = %descriptor.gid, outcome = %outcome, "queried branch");
        outcome
    }
}
