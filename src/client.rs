//! Worker and controlplane HTTP clients.
//!
//! The dispatcher talks to tier workers through the [`WorkerTransport`]
//! trait so tests can swap in in-process doubles; production uses
//! [`HttpWorkerClient`] against the tier endpoints. Retry policy lives here,
//! not in the dispatcher: a worker call that comes back `Err` has already
//! exhausted its transport retries.
//!
//! ## Worker protocol
//!
//! `POST {base}/infer` with `{request_id, payload}`; 200 returns
//! `{result, confidence, model_latency_ms}`. Any other status is a failure
//! for the circuit breaker.

use crate::retry::RetryPolicy;
use crate::{InferRequest, RoutedResponse, RouterError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire request sent to a tier worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRequest {
    pub request_id: String,
    pub payload: serde_json::Value,
}

/// Wire reply from a tier worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    /// Model output, opaque to the router.
    pub result: serde_json::Value,
    /// Worker-reported confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub model_latency_ms: u64,
}

/// Transport seam between the dispatcher and one tier's worker.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn infer(&self, req: &WorkerRequest) -> Result<WorkerReply, RouterError>;
}

/// HTTP client for one tier worker endpoint.
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpWorkerClient {
    /// Client for the worker at `base_url`, with the default 30 s call
    /// timeout and transport retry policy.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry policy (tests use a zero-delay policy).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn infer_once(&self, req: &WorkerRequest) -> Result<WorkerReply, RouterError> {
        let response = self
            .client
            .post(format!("{}/infer", self.base_url))
            .timeout(self.timeout)
            .json(req)
            .send()
            .await
            .map_err(|e| RouterError::Worker(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RouterError::Worker(format!(
                "worker returned {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RouterError::Worker(format!("invalid worker response: {e}")))
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerClient {
    async fn infer(&self, req: &WorkerRequest) -> Result<WorkerReply, RouterError> {
        self.retry.retry(|| self.infer_once(req)).await
    }
}

/// Fixed-output worker double for tests and local smoke runs.
#[derive(Debug, Clone)]
pub struct FixedWorker {
    pub result: serde_json::Value,
    pub confidence: f64,
    pub model_latency_ms: u64,
}

impl FixedWorker {
    /// Worker that always answers with the given confidence.
    pub fn with_confidence(confidence: f64) -> Self {
        Self {
            result: serde_json::json!("fixed_prediction"),
            confidence,
            model_latency_ms: 5,
        }
    }
}

#[async_trait]
impl WorkerTransport for FixedWorker {
    async fn infer(&self, _req: &WorkerRequest) -> Result<WorkerReply, RouterError> {
        Ok(WorkerReply {
            result: self.result.clone(),
            confidence: self.confidence,
            model_latency_ms: self.model_latency_ms,
        })
    }
}

/// Client for the controlplane's `/decide` endpoint.
#[derive(Debug, Clone)]
pub struct ControlplaneClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ControlplaneClient {
    /// Client for the controlplane at `base_url`, 10 s call timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the controlplane to route one request. Retries transport-level
    /// failures; a final failure is a `controlplane_error`.
    ///
    /// The tier named in the response is validated against the ladder before
    /// anything else is decoded — a tier outside {tier0, tier1, tier2} is an
    /// `unknown_tier` error, not a retryable transport failure.
    pub async fn decide(&self, req: &InferRequest) -> Result<RoutedResponse, RouterError> {
        let value = self.retry.retry(|| self.decide_once(req)).await?;

        let tier = value
            .get("tier")
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        if crate::Tier::parse(tier).is_none() {
            return Err(RouterError::UnknownTier(tier.to_string()));
        }

        serde_json::from_value(value)
            .map_err(|e| RouterError::Controlplane(format!("invalid decide response: {e}")))
    }

    async fn decide_once(&self, req: &InferRequest) -> Result<serde_json::Value, RouterError> {
        let response = self
            .client
            .post(format!("{}/decide", self.base_url))
            .timeout(self.timeout)
            .json(req)
            .send()
            .await
            .map_err(|e| RouterError::Controlplane(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RouterError::Controlplane(format!(
                "controlplane returned {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RouterError::Controlplane(format!("invalid decide response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_worker_replies_with_configured_confidence() {
        let worker = FixedWorker::with_confidence(0.81);
        let reply = worker
            .infer(&WorkerRequest {
                request_id: "req-1".into(),
                payload: serde_json::json!({"q": "hi"}),
            })
            .await
            .expect("fixed worker never fails");
        assert_eq!(reply.confidence, 0.81);
        assert_eq!(reply.model_latency_ms, 5);
    }

    #[test]
    fn test_worker_reply_tolerates_missing_latency() {
        let reply: WorkerReply =
            serde_json::from_str(r#"{"result": "x", "confidence": 0.5}"#).expect("parses");
        assert_eq!(reply.model_latency_ms, 0);
    }

    #[test]
    fn test_worker_request_wire_shape() {
        let req = WorkerRequest {
            request_id: "req-9".into(),
            payload: serde_json::json!({"text": "hello"}),
        };
        let wire = serde_json::to_value(&req).expect("serializes");
        assert_eq!(wire["request_id"], "req-9");
        assert_eq!(wire["payload"]["text"], "hello");
    }
}
