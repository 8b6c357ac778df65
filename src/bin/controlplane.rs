//! # Controlplane service
//!
//! Decision and escalation core: tier workers behind circuit breakers, the
//! decision engine, and the telemetry collector feeding it.
//!
//! ## Usage
//!
//! ```bash
//! TIER0_URL=http://localhost:8090 TIER1_URL=http://localhost:8091 \
//!   TIER2_URL=http://localhost:8092 cargo run --bin controlplane
//! ```

use std::sync::Arc;
use tiergate::client::{HttpWorkerClient, WorkerTransport};
use tiergate::config::ControlplaneConfig;
use tiergate::controlplane::{self, ControlplaneState};
use tiergate::decision::Engine;
use tiergate::dispatch::Dispatcher;
use tiergate::telemetry::{Collector, SnapshotStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tiergate::init_tracing();
    tiergate::metrics::init_metrics()?;

    let config = ControlplaneConfig::from_env();
    if let Some(endpoint) = &config.otlp_endpoint {
        info!(endpoint, "trace export delegated to external collector");
    }

    let workers: [Arc<dyn WorkerTransport>; 3] = [
        Arc::new(HttpWorkerClient::new(config.tier0_url.clone())),
        Arc::new(HttpWorkerClient::new(config.tier1_url.clone())),
        Arc::new(HttpWorkerClient::new(config.tier2_url.clone())),
    ];

    let snapshots = Arc::new(SnapshotStore::new());
    let _collector = Collector::new(config.prometheus_url.clone()).spawn(Arc::clone(&snapshots));

    let state = Arc::new(ControlplaneState {
        dispatcher: Dispatcher::new(Engine::new(), workers),
        snapshots,
    });
    let _gauges = controlplane::spawn_breaker_gauge_loop(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr,
        tier0 = %config.tier0_url,
        tier1 = %config.tier1_url,
        tier2 = %config.tier2_url,
        "controlplane listening"
    );

    axum::serve(listener, controlplane::router(state)).await?;
    Ok(())
}
