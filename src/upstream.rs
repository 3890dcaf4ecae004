//! Upstream completion client.
//!
//! Wraps one `reqwest::Client` and knows how to shape a batch dispatch
//! into the upstream's `/v1/completions` wire format. Kept behind a
//! trait, the way the teacher's `BatchHandler` trait in
//! `optimization/batch_processor.rs` decouples the batching mechanism
//! from what actually services a batch, so the scheduler's flush loop can
//! be exercised in tests against a stub instead of a live HTTP call.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::UpstreamError;
use crate::scheduler::params::SharedParams;

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamResponse {
    pub choices: Vec<serde_json::Value>,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn complete(
        &self,
        shared: &SharedParams,
        prompts: &[String],
    ) -> Result<UpstreamResponse, UpstreamError>;
}

pub struct HttpUpstream {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    org: Option<String>,
}

impl HttpUpstream {
    pub fn new(base_url: String, api_key: String, org: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            org,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn complete(
        &self,
        shared: &SharedParams,
        prompts: &[String],
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut body = shared.as_json_fields();
        body.insert("prompt".to_string(), serde_json::json!(prompts));

        let url = format!("{}/v1/completions", self.base_url.trim_end_matches('/'));
        let mut req = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::Value::Object(body));

        if let Some(org) = &self.org {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        response
            .json::<UpstreamResponse>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
