//! # Gateway service
//!
//! Client-facing edge of the tiered inference router: rate limiting, cache,
//! admission queue, dispatch workers against the controlplane.
//!
//! ## Usage
//!
//! ```bash
//! CONTROLPLANE_URL=http://localhost:8081 REDIS_URL=redis://localhost:6379 \
//!   cargo run --bin gateway
//! ```

use std::sync::Arc;
use tiergate::audit::AuditStore;
use tiergate::cache::ResponseCache;
use tiergate::client::ControlplaneClient;
use tiergate::config::GatewayConfig;
use tiergate::events::EventPublisher;
use tiergate::gateway::{self, GatewayState};
use tiergate::queue::{AdmissionQueue, QUEUE_CAPACITY};
use tiergate::ratelimit::TenantRateLimiter;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tiergate::init_tracing();
    tiergate::metrics::init_metrics()?;

    let config = GatewayConfig::from_env();
    if let Some(endpoint) = &config.otlp_endpoint {
        info!(endpoint, "trace export delegated to external collector");
    }

    let cache = match &config.redis_url {
        Some(url) => match ResponseCache::new_redis(url).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "redis unavailable, falling back to in-memory cache");
                ResponseCache::new_memory()
            }
        },
        None => ResponseCache::new_memory(),
    };

    let limiter = match &config.redis_url {
        Some(url) => match TenantRateLimiter::new_redis(url).await {
            Ok(limiter) => limiter,
            Err(e) => {
                warn!(error = %e, "redis unavailable, falling back to in-memory rate limiter");
                TenantRateLimiter::new_memory()
            }
        },
        None => TenantRateLimiter::new_memory(),
    };

    let audit = match &config.database_url {
        Some(url) => match AuditStore::connect(url).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "audit database unavailable, continuing without audit");
                None
            }
        },
        None => None,
    };

    let events = match &config.nats_url {
        Some(url) => match EventPublisher::connect(url).await {
            Ok(publisher) => Some(publisher),
            Err(e) => {
                warn!(error = %e, "event bus unavailable, continuing without events");
                None
            }
        },
        None => None,
    };

    let (queue, rx) = AdmissionQueue::new(QUEUE_CAPACITY);
    let mut state = GatewayState::new(
        queue,
        limiter,
        cache,
        ControlplaneClient::new(config.controlplane_url.clone()),
    );
    state.audit = audit;
    state.events = events;
    let state = Arc::new(state);

    let _workers = gateway::spawn_dispatch_workers(Arc::clone(&state), rx, config.dispatch_workers);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, controlplane = %config.controlplane_url, "gateway listening");

    axum::serve(listener, gateway::router(state)).await?;
    Ok(())
}
