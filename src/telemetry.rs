//! Tier health telemetry.
//!
//! A background collector periodically queries the metrics store for p99
//! latency, error rate and queue depth per tier and publishes the readings
//! as one immutable [`TelemetrySnapshot`]. Snapshots are replaced whole —
//! readers take the current `Arc` once and never observe a torn update. A
//! failed or NaN query leaves the prior per-tier value in place.

use crate::decision::Tier;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Health readings for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TierHealth {
    /// p99 request latency in milliseconds over the last 5 minutes.
    /// 0 = no data yet.
    pub p99_latency_ms: u64,
    /// Error rate in [0, 1] over the last 5 minutes.
    pub error_rate: f64,
    /// Admission queue depth at scrape time.
    pub queue_depth: u64,
}

/// Immutable per-tier health readings consumed by the decision engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    tiers: [TierHealth; 3],
}

impl TelemetrySnapshot {
    /// Readings for one tier.
    pub fn health(&self, tier: Tier) -> &TierHealth {
        &self.tiers[tier.index()]
    }

    /// Replace one tier's readings (collector and tests).
    pub fn set(&mut self, tier: Tier, health: TierHealth) {
        self.tiers[tier.index()] = health;
    }
}

/// Shared holder for the current snapshot.
///
/// `publish` swaps the whole `Arc` under a write lock; `load` clones the
/// `Arc` under a read lock. Readers hold no lock while using the snapshot.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Arc<TelemetrySnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Treat as immutable.
    pub fn load(&self) -> Arc<TelemetrySnapshot> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Install a new snapshot atomically.
    pub fn publish(&self, snapshot: TelemetrySnapshot) {
        if let Ok(mut guard) = self.current.write() {
            *guard = Arc::new(snapshot);
        }
    }
}

// ── Prometheus HTTP API types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    data: PrometheusData,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    /// `[ <unix timestamp>, "<value>" ]`
    value: (f64, String),
}

/// Extract the scalar from a Prometheus instant-query response body.
/// NaN values are rejected so stale readings survive instead.
fn parse_instant_value(body: &str) -> Result<f64, String> {
    let response: PrometheusResponse =
        serde_json::from_str(body).map_err(|e| format!("invalid response: {e}"))?;
    if response.status != "success" {
        return Err(format!("query status {}", response.status));
    }
    let first = response
        .data
        .result
        .first()
        .ok_or_else(|| "no data".to_string())?;
    let value: f64 = first
        .value
        .1
        .parse()
        .map_err(|e| format!("invalid value: {e}"))?;
    if value.is_nan() {
        return Err("NaN value".to_string());
    }
    Ok(value)
}

/// Fold fresh query results into a tier's previous readings, keeping the
/// prior value wherever a query failed.
fn updated_health(
    prev: TierHealth,
    p99_ms: Option<f64>,
    error_rate: Option<f64>,
    queue_depth: Option<f64>,
) -> TierHealth {
    TierHealth {
        p99_latency_ms: p99_ms.map(|v| v.max(0.0) as u64).unwrap_or(prev.p99_latency_ms),
        error_rate: error_rate
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(prev.error_rate),
        queue_depth: queue_depth
            .map(|v| v.max(0.0) as u64)
            .unwrap_or(prev.queue_depth),
    }
}

/// Periodic collector feeding a [`SnapshotStore`].
pub struct Collector {
    prometheus_url: String,
    client: reqwest::Client,
    interval: Duration,
}

impl Collector {
    /// Collector against the metrics store at `prometheus_url`, scraping
    /// every 5 seconds with a 2-second query timeout.
    pub fn new(prometheus_url: impl Into<String>) -> Self {
        Self {
            prometheus_url: prometheus_url.into(),
            client: reqwest::Client::new(),
            interval: Duration::from_secs(5),
        }
    }

    /// Run forever on the collector cadence, publishing into `store`.
    pub fn spawn(self, store: Arc<SnapshotStore>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let previous = store.load();
                let snapshot = self.collect_once(&previous).await;
                store.publish(snapshot);
            }
        })
    }

    /// One collection pass. Per-tier values that fail to resolve keep their
    /// previous reading.
    pub async fn collect_once(&self, previous: &TelemetrySnapshot) -> TelemetrySnapshot {
        let mut snapshot = previous.clone();

        for tier in Tier::ALL {
            let p99 = self
                .query(&format!(
                    "histogram_quantile(0.99, rate(gateway_request_duration_seconds_bucket{{tier=\"{tier}\"}}[5m])) * 1000"
                ))
                .await;
            let error_rate = self
                .query(&format!(
                    "sum(rate(gateway_requests_total{{status=~\"error|worker_error|controlplane_error\",tier=\"{tier}\"}}[5m])) / sum(rate(gateway_requests_total{{tier=\"{tier}\"}}[5m]))"
                ))
                .await;
            let queue_depth = self.query("gateway_queue_depth").await;

            let health = updated_health(
                *previous.health(tier),
                p99.ok(),
                error_rate.ok(),
                queue_depth.ok(),
            );
            debug!(
                tier = %tier,
                p99_ms = health.p99_latency_ms,
                error_rate = health.error_rate,
                queue_depth = health.queue_depth,
                "telemetry collected"
            );
            snapshot.set(tier, health);
        }

        snapshot
    }

    async fn query(&self, promql: &str) -> Result<f64, String> {
        let url = format!("{}/api/v1/query", self.prometheus_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", promql)])
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| format!("query failed: {e}"))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "prometheus query failed");
            return Err(format!("prometheus returned {}", response.status()));
        }

        let body = response.text().await.map_err(|e| e.to_string())?;
        parse_instant_value(&body)
    }
}
