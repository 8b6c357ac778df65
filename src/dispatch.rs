//! Tier dispatcher: the escalation loop.
//!
//! Given an admitted request, produce exactly one final response or one
//! typed error. The loop is a small state machine — `Try(tier)` →
//! `Finalize`/`Fail` — driven for at most three iterations, one per tier.
//! Escalation is monotone: once a tier has been tried the dispatcher never
//! returns below it for the same request.
//!
//! A breaker rejection promotes straight to the next tier (`tier2`'s breaker
//! rejecting is fatal); any other worker failure surfaces as a typed worker
//! error — retry policy lives in the worker client, not here.

use crate::breaker::{CircuitBreaker, CircuitBreakerError};
use crate::client::{WorkerReply, WorkerRequest, WorkerTransport};
use crate::decision::{Engine, Tier};
use crate::telemetry::TelemetrySnapshot;
use crate::{metrics, InferRequest, RoutedResponse, RouterError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One step of the escalation loop.
#[derive(Debug)]
enum DispatchState {
    /// Call this tier's worker next.
    Try(Tier),
    /// Done: answer from `tier` with this reason and estimated cost.
    Finalize { tier: Tier, reason: &'static str, cost: f64 },
    /// Done: surface a typed error.
    Fail(RouterError),
}

/// Drives requests through the tier ladder.
pub struct Dispatcher {
    engine: Engine,
    workers: [Arc<dyn WorkerTransport>; 3],
    breakers: [Arc<CircuitBreaker>; 3],
}

impl Dispatcher {
    /// Dispatcher over the given per-tier workers, with the standard breaker
    /// parameters (5 failures to open, 3 successes to close, 30 s cooldown).
    pub fn new(engine: Engine, workers: [Arc<dyn WorkerTransport>; 3]) -> Self {
        let breakers = [
            Arc::new(CircuitBreaker::new(5, 3, Duration::from_secs(30))),
            Arc::new(CircuitBreaker::new(5, 3, Duration::from_secs(30))),
            Arc::new(CircuitBreaker::new(5, 3, Duration::from_secs(30))),
        ];
        Self::with_breakers(engine, workers, breakers)
    }

    /// Dispatcher with caller-supplied breakers (tests tune the timeouts).
    pub fn with_breakers(
        engine: Engine,
        workers: [Arc<dyn WorkerTransport>; 3],
        breakers: [Arc<CircuitBreaker>; 3],
    ) -> Self {
        Self {
            engine,
            workers,
            breakers,
        }
    }

    /// The breaker guarding `tier` (state gauge exports).
    pub fn breaker(&self, tier: Tier) -> &CircuitBreaker {
        &self.breakers[tier.index()]
    }

    /// The decision engine in use.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Route one request to a final response.
    pub async fn dispatch(
        &self,
        req: &InferRequest,
        telemetry: &TelemetrySnapshot,
    ) -> Result<RoutedResponse, RouterError> {
        let started = Instant::now();
        let request_id = req.request_id_or_synthesized();
        let budget = req.effective_budget();

        let mut state = DispatchState::Try(Tier::Tier0);
        let mut tier0_confidence = 0.0_f64;
        let mut last_reply: Option<WorkerReply> = None;

        // One iteration per tier; Finalize/Fail are terminal.
        for _ in 0..3 {
            let current = match state {
                DispatchState::Try(tier) => tier,
                _ => break,
            };

            let worker = Arc::clone(&self.workers[current.index()]);
            let call = WorkerRequest {
                request_id: request_id.clone(),
                payload: req.input.clone(),
            };
            let outcome = self.breakers[current.index()]
                .call(|| async move { worker.infer(&call).await })
                .await;

            state = match outcome {
                Err(CircuitBreakerError::Open) => self.on_circuit_open(current, &request_id),
                Err(CircuitBreakerError::Failed(e)) => DispatchState::Fail(e),
                Ok(reply) => {
                    let next = self.on_reply(req, telemetry, current, &reply, &mut tier0_confidence, budget);
                    last_reply = Some(reply);
                    next
                }
            };
        }

        match state {
            DispatchState::Finalize { tier, reason, cost } => {
                metrics::observe_decision_duration(started.elapsed());
                metrics::inc_decision(tier.as_str(), reason);
                // Finalize is only ever produced on a worker reply.
                let reply = last_reply.ok_or_else(|| {
                    RouterError::Internal("finalized without a worker reply".into())
                })?;
                info!(
                    request_id = %request_id,
                    tier = %tier,
                    reason,
                    "request finalized"
                );
                Ok(RoutedResponse {
                    tier,
                    reason: reason.to_string(),
                    result: reply.result,
                    confidence: reply.confidence,
                    model_latency_ms: reply.model_latency_ms,
                    estimated_cost_cents: cost,
                    trace_id: None,
                })
            }
            DispatchState::Fail(e) => Err(e),
            DispatchState::Try(tier) => Err(RouterError::Internal(format!(
                "dispatch loop exhausted at {tier}"
            ))),
        }
    }

    /// Breaker rejected the call: promote, or fail at the top of the ladder.
    fn on_circuit_open(&self, current: Tier, request_id: &str) -> DispatchState {
        match current.next_up() {
            Some(next) => {
                warn!(
                    request_id = %request_id,
                    tier = %current,
                    next = %next,
                    "circuit open, promoting"
                );
                DispatchState::Try(next)
            }
            None => DispatchState::Fail(RouterError::Worker(format!(
                "tier {current} circuit open"
            ))),
        }
    }

    /// Transition after a successful worker reply at `current`.
    fn on_reply(
        &self,
        req: &InferRequest,
        telemetry: &TelemetrySnapshot,
        current: Tier,
        reply: &WorkerReply,
        tier0_confidence: &mut f64,
        budget: f64,
    ) -> DispatchState {
        match current {
            Tier::Tier0 => {
                *tier0_confidence = reply.confidence;
                let decision = self.engine.decide(req, telemetry, *tier0_confidence);

                if decision.tier != Tier::Tier0 {
                    let (next, _) = self.engine.escalate(Tier::Tier0, *tier0_confidence, budget);
                    if next != Tier::Tier0 {
                        metrics::inc_escalation(Tier::Tier0.as_str(), next.as_str());
                        return DispatchState::Try(next);
                    }
                }

                DispatchState::Finalize {
                    tier: Tier::Tier0,
                    reason: decision.reason,
                    cost: decision.estimated_cost_cents,
                }
            }
            Tier::Tier1 => {
                // The original tier0 evidence wins: a request that escalated
                // on low confidence finalizes here regardless of tier1's own
                // confidence. Cost and reason are fixed for this path.
                if !(*tier0_confidence < 0.75 && budget >= 2.0) {
                    let (next, _) = self.engine.escalate(Tier::Tier1, reply.confidence, budget);
                    if next == Tier::Tier2 {
                        metrics::inc_escalation(Tier::Tier1.as_str(), Tier::Tier2.as_str());
                        return DispatchState::Try(Tier::Tier2);
                    }
                }
                DispatchState::Finalize {
                    tier: Tier::Tier1,
                    reason: "escalated_from_tier0",
                    cost: 2.0,
                }
            }
            Tier::Tier2 => DispatchState::Finalize {
                tier: Tier::Tier2,
                reason: "escalated_to_tier2",
                cost: 5.0,
            },
        }
    }
}
