//! Prometheus metrics for both router services.
//!
//! Call [`init_metrics`] once at process startup. Every helper is a no-op
//! until then, so library code (and tests) can record freely — observability
//! degrades gracefully rather than panicking or forcing init-order coupling.
//!
//! ## Series
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `gateway_requests_total` | Counter | `status` |
//! | `gateway_request_duration_seconds` | Histogram | `tier` |
//! | `gateway_cache_hits_total` | Counter | `tier` |
//! | `gateway_cache_misses_total` | Counter | `tier` |
//! | `gateway_rate_limit_rejected_total` | Counter | — |
//! | `gateway_queue_depth` | Gauge | — |
//! | `controlplane_decisions_total` | Counter | `tier`, `reason` |
//! | `controlplane_decision_duration_seconds` | Histogram | — |
//! | `controlplane_escalations_total` | Counter | `from`, `to` |
//! | `controlplane_circuit_breaker_state` | Gauge | `tier` (0=closed, 1=open, 2=half_open) |

use crate::RouterError;
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

/// All metrics bundled so they can live in a single [`OnceLock`].
pub struct Metrics {
    pub registry: Registry,
    pub requests_total: CounterVec,
    pub request_duration: HistogramVec,
    pub cache_hits: CounterVec,
    pub cache_misses: CounterVec,
    pub rate_limit_rejected: IntCounter,
    pub queue_depth: IntGauge,
    pub decisions_total: CounterVec,
    pub decision_duration: Histogram,
    pub escalations_total: CounterVec,
    pub breaker_state: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn internal(e: impl std::fmt::Display) -> RouterError {
    RouterError::Internal(format!("metrics init failed: {e}"))
}

/// Initialise all series against a private registry.
///
/// Calling it a second time is a no-op returning `Ok(())`.
pub fn init_metrics() -> Result<(), RouterError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new("gateway_requests_total", "Total number of requests"),
        &["status"],
    )
    .map_err(internal)?;
    registry
        .register(Box::new(requests_total.clone()))
        .map_err(internal)?;

    let request_duration = HistogramVec::new(
        HistogramOpts::new(
            "gateway_request_duration_seconds",
            "Request duration in seconds",
        ),
        &["tier"],
    )
    .map_err(internal)?;
    registry
        .register(Box::new(request_duration.clone()))
        .map_err(internal)?;

    let cache_hits = CounterVec::new(
        Opts::new("gateway_cache_hits_total", "Total cache hits"),
        &["tier"],
    )
    .map_err(internal)?;
    registry
        .register(Box::new(cache_hits.clone()))
        .map_err(internal)?;

    let cache_misses = CounterVec::new(
        Opts::new("gateway_cache_misses_total", "Total cache misses"),
        &["tier"],
    )
    .map_err(internal)?;
    registry
        .register(Box::new(cache_misses.clone()))
        .map_err(internal)?;

    let rate_limit_rejected = IntCounter::new(
        "gateway_rate_limit_rejected_total",
        "Total requests rejected by rate limiter",
    )
    .map_err(internal)?;
    registry
        .register(Box::new(rate_limit_rejected.clone()))
        .map_err(internal)?;

    let queue_depth =
        IntGauge::new("gateway_queue_depth", "Current admission queue depth").map_err(internal)?;
    registry
        .register(Box::new(queue_depth.clone()))
        .map_err(internal)?;

    let decisions_total = CounterVec::new(
        Opts::new("controlplane_decisions_total", "Total tier decisions"),
        &["tier", "reason"],
    )
    .map_err(internal)?;
    registry
        .register(Box::new(decisions_total.clone()))
        .map_err(internal)?;

    let decision_duration = Histogram::with_opts(HistogramOpts::new(
        "controlplane_decision_duration_seconds",
        "Decision duration in seconds",
    ))
    .map_err(internal)?;
    registry
        .register(Box::new(decision_duration.clone()))
        .map_err(internal)?;

    let escalations_total = CounterVec::new(
        Opts::new("controlplane_escalations_total", "Total tier escalations"),
        &["from", "to"],
    )
    .map_err(internal)?;
    registry
        .register(Box::new(escalations_total.clone()))
        .map_err(internal)?;

    let breaker_state = IntGaugeVec::new(
        Opts::new(
            "controlplane_circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=open, 2=half_open)",
        ),
        &["tier"],
    )
    .map_err(internal)?;
    registry
        .register(Box::new(breaker_state.clone()))
        .map_err(internal)?;

    // If another thread raced us, the first registration wins; both bundles
    // are identical so either outcome is fine.
    let _ = METRICS.set(Metrics {
        registry,
        requests_total,
        request_duration,
        cache_hits,
        cache_misses,
        rate_limit_rejected,
        queue_depth,
        decisions_total,
        decision_duration,
        escalations_total,
        breaker_state,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Gateway helpers ────────────────────────────────────────────────────────

/// Count one request outcome by status label.
pub fn inc_request(status: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_total.get_metric_with_label_values(&[status]) {
            c.inc();
        }
    }
}

/// Record end-to-end request duration for a tier.
pub fn observe_request_duration(tier: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.request_duration.get_metric_with_label_values(&[tier]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count a cache hit attributed to the tier that produced the entry.
pub fn inc_cache_hit(tier: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_hits.get_metric_with_label_values(&[tier]) {
            c.inc();
        }
    }
}

/// Count a cache miss for the tier that ended up serving the request.
pub fn inc_cache_miss(tier: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_misses.get_metric_with_label_values(&[tier]) {
            c.inc();
        }
    }
}

/// Count a token-bucket rejection.
pub fn inc_rate_limit_rejected() {
    if let Some(m) = metrics() {
        m.rate_limit_rejected.inc();
    }
}

/// Adjust the admission queue depth gauge.
pub fn queue_depth_add(delta: i64) {
    if let Some(m) = metrics() {
        m.queue_depth.add(delta);
    }
}

// ── Controlplane helpers ───────────────────────────────────────────────────

/// Count one finalized decision.
pub fn inc_decision(tier: &str, reason: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .decisions_total
            .get_metric_with_label_values(&[tier, reason])
        {
            c.inc();
        }
    }
}

/// Record how long the decision + escalation loop took.
pub fn observe_decision_duration(d: Duration) {
    if let Some(m) = metrics() {
        m.decision_duration.observe(d.as_secs_f64());
    }
}

/// Count one tier promotion.
pub fn inc_escalation(from: &str, to: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .escalations_total
            .get_metric_with_label_values(&[from, to])
        {
            c.inc();
        }
    }
}

/// Publish a breaker's state code for its tier.
pub fn set_breaker_state(tier: &str, code: i64) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.breaker_state.get_metric_with_label_values(&[tier]) {
            g.set(code);
        }
    }
}

// ── Exposition ─────────────────────────────────────────────────────────────

/// Encode all metrics in the Prometheus text format. Empty string before
/// init or on encoding failure.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
