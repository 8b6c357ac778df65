//! # tiergate
//!
//! A cost-aware tiered inference router over Tokio.
//!
//! ## Architecture
//!
//! Requests flow through a gateway edge into a decision/escalation core:
//! ```text
//! client → gateway ─ rate-limit → cache probe → admission queue(1000)
//!               └──→ dispatcher → {decision engine, circuit breakers, workers}
//!                          → cache write → response
//! ```
//!
//! Three worker tiers (`tier0` cheap/fast → `tier2` expensive/accurate) sit
//! behind per-tier circuit breakers. Each request carries a cents budget, an
//! optional latency SLO and a priority class; the router picks the lowest
//! tier whose expected quality clears a confidence bar and escalates only
//! when the cheaper tier falls short and the budget permits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod audit;
pub mod breaker;
pub mod cache;
pub mod client;
pub mod config;
pub mod controlplane;
pub mod decision;
pub mod dispatch;
pub mod events;
pub mod gateway;
pub mod metrics;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod telemetry;

// Re-exports
pub use breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use decision::{Decision, Engine, Tier, TierConfig};
pub use dispatch::Dispatcher;
pub use telemetry::TelemetrySnapshot;

/// Router-level errors, one variant per externally visible failure class.
///
/// The HTTP status mapping lives at the gateway edge; everything below the
/// edge passes these around untranslated. Breaker rejections are *not* here:
/// [`CircuitBreakerError::Open`] is an internal signal consumed by the
/// dispatcher and never reaches a client.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("invalid json")]
    BadRequest,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("service overloaded")]
    QueueFull,

    #[error("request timeout")]
    QueueTimeout,

    #[error("controlplane error: {0}")]
    Controlplane(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("{0}")]
    Internal(String),
}

impl RouterError {
    /// Status label used for `gateway_requests_total{status}`.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::RateLimited => "rate_limited",
            Self::QueueFull => "queue_full",
            Self::QueueTimeout => "queue_timeout",
            Self::Controlplane(_) => "controlplane_error",
            Self::Worker(_) => "worker_error",
            Self::UnknownTier(_) => "unknown_tier",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Priority class of an inference request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Standard traffic.
    #[default]
    Normal,
    /// Premium traffic — the tier0 confidence bar is lowered to 0.70.
    Premium,
}

/// Ingress body for `POST /infer` (and the controlplane's `POST /decide`).
///
/// All fields except `input` are optional on the wire; absent numbers mean
/// "no constraint" and an absent `tenant_id` falls back to `"default"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferRequest {
    /// Caller-supplied correlation id; synthesized when absent.
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Arbitrary structured payload, opaque to the router.
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    /// Latency SLO in milliseconds; 0 = no constraint.
    #[serde(default)]
    pub max_latency_ms: u64,
    /// Spend cap in cents; 0 = no constraint.
    #[serde(default)]
    pub max_cost_cents: f64,
    /// Budget in cents; falls back to `max_cost_cents`, then 10.0.
    #[serde(default)]
    pub budget: f64,
}

impl InferRequest {
    /// Tenant this request is scoped to.
    pub fn tenant(&self) -> &str {
        match self.tenant_id.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => "default",
        }
    }

    /// Correlation id, synthesizing one when the caller sent none.
    pub fn request_id_or_synthesized(&self) -> String {
        match self.request_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("req-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Effective spend ceiling: `budget` if set, else `max_cost_cents`,
    /// else the 10-cent default.
    pub fn effective_budget(&self) -> f64 {
        if self.budget > 0.0 {
            self.budget
        } else if self.max_cost_cents > 0.0 {
            self.max_cost_cents
        } else {
            10.0
        }
    }
}

/// Final response emitted for one routed request.
///
/// The same shape is produced by the controlplane's dispatcher and relayed by
/// the gateway, which adds `trace_id` before serializing to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedResponse {
    pub tier: Tier,
    pub reason: String,
    /// Worker output, opaque to the router.
    pub result: serde_json::Value,
    pub confidence: f64,
    pub model_latency_ms: u64,
    pub estimated_cost_cents: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Initialise tracing with env-filter support. Call once at binary startup.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
