//! End-to-end tests over the full in-process stack: a gateway wired to a
//! real controlplane, with scripted tier workers behind the dispatcher.
//!
//! Covers the cross-service scenarios: cache replay without worker calls,
//! breaker opening redirecting traffic past tier0, rate-limit drain and
//! refill, and the escalation ladder.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiergate::client::{ControlplaneClient, WorkerReply, WorkerRequest, WorkerTransport};
use tiergate::controlplane::{self, ControlplaneState};
use tiergate::decision::{Engine, Tier};
use tiergate::dispatch::Dispatcher;
use tiergate::gateway::{self, GatewayState};
use tiergate::queue::AdmissionQueue;
use tiergate::ratelimit::TenantRateLimiter;
use tiergate::retry::RetryPolicy;
use tiergate::telemetry::SnapshotStore;
use tiergate::{cache::ResponseCache, RouterError};

/// Worker double: fixed confidence, call counting, switchable failure.
struct ScriptedWorker {
    confidence: f64,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedWorker {
    fn new(confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            confidence,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerTransport for ScriptedWorker {
    async fn infer(&self, _req: &WorkerRequest) -> Result<WorkerReply, RouterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RouterError::Worker("worker returned 500".into()));
        }
        Ok(WorkerReply {
            result: serde_json::json!(format!("prediction@{:.2}", self.confidence)),
            confidence: self.confidence,
            model_latency_ms: 7,
        })
    }
}

struct Stack {
    gateway_url: String,
    tier0: Arc<ScriptedWorker>,
    tier1: Arc<ScriptedWorker>,
    tier2: Arc<ScriptedWorker>,
    client: reqwest::Client,
}

async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// Spin up controlplane + gateway with scripted workers and a tight rate
/// limiter when asked for.
async fn stack(conf0: f64, limiter: TenantRateLimiter) -> Stack {
    let tier0 = ScriptedWorker::new(conf0);
    let tier1 = ScriptedWorker::new(0.90);
    let tier2 = ScriptedWorker::new(0.99);

    let workers: [Arc<dyn WorkerTransport>; 3] =
        [tier0.clone(), tier1.clone(), tier2.clone()];
    let controlplane_state = Arc::new(ControlplaneState {
        dispatcher: Dispatcher::new(Engine::new(), workers),
        snapshots: Arc::new(SnapshotStore::new()),
    });
    let controlplane_url = serve(controlplane::router(controlplane_state)).await;

    let (queue, rx) = AdmissionQueue::new(64);
    let state = Arc::new(GatewayState::new(
        queue,
        limiter,
        ResponseCache::new_memory(),
        ControlplaneClient::new(controlplane_url).with_retry(RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }),
    ));
    gateway::spawn_dispatch_workers(Arc::clone(&state), rx, 1);
    let gateway_url = serve(gateway::router(state)).await;

    Stack {
        gateway_url,
        tier0,
        tier1,
        tier2,
        client: reqwest::Client::new(),
    }
}

impl Stack {
    async fn infer(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/infer", self.gateway_url))
            .json(&body)
            .send()
            .await
            .expect("request sent")
    }
}

#[tokio::test]
async fn test_confident_request_is_served_by_tier0() {
    let stack = stack(0.90, TenantRateLimiter::new_memory()).await;

    let response = stack
        .infer(serde_json::json!({"input": {"q": "easy"}, "budget": 10.0}))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["x-cache"], "MISS");

    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["tier"], "tier0");
    assert_eq!(body["reason"], "confidence_met");
    assert_eq!(body["estimated_cost_cents"], 0.5);
    assert_eq!(stack.tier0.calls(), 1);
    assert_eq!(stack.tier1.calls(), 0);
}

#[tokio::test]
async fn test_shaky_request_escalates_to_tier1() {
    let stack = stack(0.60, TenantRateLimiter::new_memory()).await;

    let body: serde_json::Value = stack
        .infer(serde_json::json!({"input": {"q": "hard"}, "budget": 10.0}))
        .await
        .json()
        .await
        .expect("json body");

    assert_eq!(body["tier"], "tier1");
    assert_eq!(body["reason"], "escalated_from_tier0");
    assert_eq!(body["estimated_cost_cents"], 2.0);
    assert_eq!(stack.tier0.calls(), 1);
    assert_eq!(stack.tier1.calls(), 1);
}

#[tokio::test]
async fn test_warm_cache_replays_without_calling_workers() {
    let stack = stack(0.90, TenantRateLimiter::new_memory()).await;
    let request = serde_json::json!({
        "tenant_id": "acme",
        "input": {"q": "cache me", "params": {"a": 1, "b": 2}},
        "budget": 10.0,
    });

    let first = stack.infer(request.clone()).await;
    assert_eq!(first.headers()["x-cache"], "MISS");
    let first_body: serde_json::Value = first.json().await.expect("json body");
    let calls_after_first = stack.tier0.calls();

    // Same tenant and input, object keys reordered: still a hit.
    let reordered = serde_json::json!({
        "tenant_id": "acme",
        "input": {"params": {"b": 2, "a": 1}, "q": "cache me"},
        "budget": 10.0,
    });
    let second = stack.infer(reordered).await;
    assert_eq!(second.status(), reqwest::StatusCode::OK);
    assert_eq!(second.headers()["x-cache"], "HIT");
    let second_body: serde_json::Value = second.json().await.expect("json body");

    assert_eq!(second_body["tier"], first_body["tier"]);
    assert_eq!(second_body["result"], first_body["result"]);
    assert_eq!(second_body["confidence"], first_body["confidence"]);
    assert_eq!(
        stack.tier0.calls(),
        calls_after_first,
        "cache hit must not reach any worker"
    );
}

#[tokio::test]
async fn test_five_worker_failures_open_tier0_and_redirect_traffic() {
    let stack = stack(0.90, TenantRateLimiter::new_memory()).await;
    stack.tier0.set_failing(true);

    // Five consecutive 500s from tier0 open its breaker. Distinct inputs so
    // the cache never interferes.
    for i in 0..5 {
        let response = stack
            .infer(serde_json::json!({"input": {"q": format!("fail-{i}")}, "budget": 10.0}))
            .await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "failure {i}"
        );
    }
    let tier0_calls = stack.tier0.calls();

    // The next request must begin at tier1 without touching tier0.
    let response = stack
        .infer(serde_json::json!({"input": {"q": "after-open"}, "budget": 10.0}))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["tier"], "tier1");
    assert_eq!(stack.tier0.calls(), tier0_calls, "tier0 must not be called");
    assert!(stack.tier1.calls() >= 1);
}

#[tokio::test]
async fn test_tenant_draining_its_bucket_sees_429_then_recovers() {
    // 5-token bucket refilling at 10/s: drains fast, recovers within ~100ms.
    let stack = stack(0.90, TenantRateLimiter::new_memory_with(5.0, 10.0)).await;

    let mut statuses = Vec::new();
    for i in 0..8 {
        let response = stack
            .infer(serde_json::json!({
                "tenant_id": "greedy",
                "input": {"q": format!("burst-{i}")},
                "budget": 10.0,
            }))
            .await;
        statuses.push(response.status());
    }
    assert!(
        statuses
            .iter()
            .any(|s| *s == reqwest::StatusCode::TOO_MANY_REQUESTS),
        "burst past capacity must see a 429: {statuses:?}"
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    let recovered = stack
        .infer(serde_json::json!({
            "tenant_id": "greedy",
            "input": {"q": "after-refill"},
            "budget": 10.0,
        }))
        .await;
    assert_eq!(recovered.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_tier2_is_reached_when_tier0_and_tier1_are_open() {
    let stack = stack(0.90, TenantRateLimiter::new_memory()).await;
    stack.tier0.set_failing(true);
    stack.tier1.set_failing(true);

    // 5 failures open tier0; the following 5 land on tier1 and open it too.
    for i in 0..10 {
        let _ = stack
            .infer(serde_json::json!({"input": {"q": format!("cascade-{i}")}, "budget": 10.0}))
            .await;
    }

    let response = stack
        .infer(serde_json::json!({"input": {"q": "top-tier"}, "budget": 10.0}))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["tier"], "tier2");
    assert_eq!(body["reason"], "escalated_to_tier2");
    assert_eq!(body["estimated_cost_cents"], 5.0);
    assert!(stack.tier2.calls() >= 1);
}

#[tokio::test]
async fn test_response_body_carries_the_full_contract() {
    let stack = stack(0.90, TenantRateLimiter::new_memory()).await;

    let body: serde_json::Value = stack
        .infer(serde_json::json!({
            "request_id": "req-contract",
            "user_id": "user-1",
            "input": {"q": "contract"},
            "budget": 10.0,
        }))
        .await
        .json()
        .await
        .expect("json body");

    for key in [
        "tier",
        "reason",
        "result",
        "confidence",
        "model_latency_ms",
        "estimated_cost_cents",
        "trace_id",
    ] {
        assert!(body.get(key).is_some(), "response missing {key}: {body}");
    }
    assert_eq!(Tier::parse(body["tier"].as_str().expect("tier string")), Some(Tier::Tier0));
}
