//! Decision event publishing.
//!
//! Optional NATS fan-out of finalized routing decisions, subject
//! `inference.decisions` (or `inference.decisions.<tenant>` when the request
//! is tenant-scoped). Publishing is best-effort: failures are logged and the
//! request proceeds.

use crate::{RoutedResponse, RouterError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// JSON payload mirroring a finalized decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEvent {
    pub event_type: &'static str,
    pub request_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub tier: String,
    pub reason: String,
    pub budget: f64,
    pub estimated_cost_cents: f64,
    pub confidence: f64,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl DecisionEvent {
    /// Event for one finalized response.
    pub fn from_response(
        response: &RoutedResponse,
        request_id: &str,
        user_id: &str,
        tenant_id: &str,
        budget: f64,
    ) -> Self {
        Self {
            event_type: "decision",
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            tier: response.tier.as_str().to_string(),
            reason: response.reason.clone(),
            budget,
            estimated_cost_cents: response.estimated_cost_cents,
            confidence: response.confidence,
            latency_ms: response.model_latency_ms,
            timestamp: Utc::now(),
        }
    }

    fn subject(&self) -> String {
        if self.tenant_id.is_empty() {
            "inference.decisions".to_string()
        } else {
            format!("inference.decisions.{}", self.tenant_id)
        }
    }
}

/// NATS-backed publisher for decision events.
pub struct EventPublisher {
    client: async_nats::Client,
}

impl EventPublisher {
    /// Connect to the event bus.
    pub async fn connect(nats_url: &str) -> Result<Self, RouterError> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| RouterError::Internal(format!("nats connect failed: {e}")))?;
        debug!(url = nats_url, "connected to event bus");
        Ok(Self { client })
    }

    /// Publish one decision event. Failures are logged, never propagated.
    pub async fn publish_decision(&self, event: DecisionEvent) {
        let subject = event.subject();
        let payload = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize decision event");
                return;
            }
        };

        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            warn!(subject, error = %e, "failed to publish decision event");
        }
    }
}
