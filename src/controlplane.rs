//! Controlplane service: the decision and escalation core over HTTP.
//!
//! `POST /decide` accepts the same body as the gateway ingress, runs the
//! dispatcher's escalation loop against live telemetry, and returns the
//! final routed response (`tier`, `reason`, `estimated_cost_cents` plus the
//! worker fields). A background ticker exports each breaker's state gauge;
//! the telemetry collector publishes snapshots on its own cadence.

use crate::decision::Tier;
use crate::dispatch::Dispatcher;
use crate::telemetry::SnapshotStore;
use crate::{metrics, InferRequest, RouterError};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;

/// Shared state behind the controlplane handlers.
pub struct ControlplaneState {
    pub dispatcher: Dispatcher,
    pub snapshots: Arc<SnapshotStore>,
}

/// Build the controlplane router.
pub fn router(state: Arc<ControlplaneState>) -> Router {
    Router::new()
        .route("/decide", post(decide_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Export each breaker's state gauge every 5 seconds.
pub fn spawn_breaker_gauge_loop(state: Arc<ControlplaneState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for tier in Tier::ALL {
                let code = state.dispatcher.breaker(tier).state().code();
                metrics::set_breaker_state(tier.as_str(), code);
            }
        }
    })
}

async fn decide_handler(State(state): State<Arc<ControlplaneState>>, body: Bytes) -> Response {
    let req: InferRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid json"})),
            )
                .into_response()
        }
    };

    let telemetry = state.snapshots.load();
    match state.dispatcher.dispatch(&req, &telemetry).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            let status = match e {
                RouterError::BadRequest => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "controlplane"}))
}

async fn metrics_handler() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
        .into_response()
}
