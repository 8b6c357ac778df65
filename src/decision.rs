//! Tier decision engine.
//!
//! Pure policy: `(request, telemetry, observed tier0 confidence)` in,
//! [`Decision`] out. No I/O, no mutation, deterministic given its inputs —
//! the dispatcher owns all side effects.
//!
//! ## Policy order
//!
//! Checks are evaluated strictly in order: budget floor before latency SLO
//! before tier health. Tie-breaks always favor the cheaper tier.

use crate::telemetry::TelemetrySnapshot;
use crate::InferRequest;
use serde::{Deserialize, Serialize};

/// Identity of a model tier. `Tier0` is cheapest and fastest, `Tier2` the
/// most expensive and most accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier0,
    Tier1,
    Tier2,
}

impl Tier {
    /// All tiers, cheapest first.
    pub const ALL: [Tier; 3] = [Tier::Tier0, Tier::Tier1, Tier::Tier2];

    /// Index into per-tier tables.
    pub fn index(self) -> usize {
        match self {
            Tier::Tier0 => 0,
            Tier::Tier1 => 1,
            Tier::Tier2 => 2,
        }
    }

    /// The next tier up the ladder, or `None` at the top.
    pub fn next_up(self) -> Option<Tier> {
        match self {
            Tier::Tier0 => Some(Tier::Tier1),
            Tier::Tier1 => Some(Tier::Tier2),
            Tier::Tier2 => None,
        }
    }

    /// Wire name (`"tier0"` .. `"tier2"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Tier0 => "tier0",
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
        }
    }

    /// Parse a wire name. Anything outside the ladder is an error the caller
    /// surfaces as `unknown_tier`.
    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "tier0" => Some(Tier::Tier0),
            "tier1" => Some(Tier::Tier1),
            "tier2" => Some(Tier::Tier2),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-tier configuration.
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub name: Tier,
    pub base_cost_cents: f64,
    pub timeout_ms: u64,
    pub default_conf_threshold: f64,
    pub enabled: bool,
}

/// The outcome of one policy evaluation. Immutable once returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub tier: Tier,
    pub reason: &'static str,
    pub estimated_cost_cents: f64,
    pub estimated_latency_ms: u64,
    pub confidence_threshold: f64,
}

/// The decision engine: a fixed three-tier ladder plus the policy over it.
#[derive(Debug, Clone)]
pub struct Engine {
    tiers: [TierConfig; 3],
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine over the standard ladder: 0.5 / 2.0 / 5.0 cents,
    /// 50 / 200 / 500 ms, confidence bars 0.75 / 0.85 / 0.95.
    pub fn new() -> Self {
        Self {
            tiers: [
                TierConfig {
                    name: Tier::Tier0,
                    base_cost_cents: 0.5,
                    timeout_ms: 50,
                    default_conf_threshold: 0.75,
                    enabled: true,
                },
                TierConfig {
                    name: Tier::Tier1,
                    base_cost_cents: 2.0,
                    timeout_ms: 200,
                    default_conf_threshold: 0.85,
                    enabled: true,
                },
                TierConfig {
                    name: Tier::Tier2,
                    base_cost_cents: 5.0,
                    timeout_ms: 500,
                    default_conf_threshold: 0.95,
                    enabled: true,
                },
            ],
        }
    }

    /// Toggle a tier. Used by operators to drain a tier and by tests.
    pub fn set_enabled(&mut self, tier: Tier, enabled: bool) {
        self.tiers[tier.index()].enabled = enabled;
    }

    /// Static config for one tier.
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        &self.tiers[tier.index()]
    }

    fn pick(&self, tier: Tier, reason: &'static str, latency_ms: u64, threshold: f64) -> Decision {
        Decision {
            tier,
            reason,
            estimated_cost_cents: self.tiers[tier.index()].base_cost_cents,
            estimated_latency_ms: latency_ms,
            confidence_threshold: threshold,
        }
    }

    /// Evaluate the routing policy for one request.
    ///
    /// `tier0_confidence` is the confidence tier0's worker reported for this
    /// input (or the caller's prior when no tier0 call has happened yet).
    pub fn decide(
        &self,
        req: &InferRequest,
        telemetry: &TelemetrySnapshot,
        tier0_confidence: f64,
    ) -> Decision {
        let t0 = &self.tiers[Tier::Tier0.index()];
        let t1 = &self.tiers[Tier::Tier1.index()];
        let t2 = &self.tiers[Tier::Tier2.index()];

        if !t0.enabled {
            return self.pick(
                Tier::Tier1,
                "tier0 disabled",
                t1.timeout_ms,
                t1.default_conf_threshold,
            );
        }

        let budget = req.effective_budget();

        let conf_threshold = if req.priority == crate::Priority::Premium {
            0.70
        } else {
            t0.default_conf_threshold
        };

        if tier0_confidence >= conf_threshold {
            return self.pick(Tier::Tier0, "confidence_met", t0.timeout_ms, conf_threshold);
        }

        if budget < t1.base_cost_cents || !t1.enabled {
            return self.pick(Tier::Tier0, "budget_too_low", t0.timeout_ms, conf_threshold);
        }

        if tier0_confidence < conf_threshold && budget >= t1.base_cost_cents {
            let p99 = telemetry.health(Tier::Tier1).p99_latency_ms;
            let latency_ms = if p99 > 0 { p99 } else { t1.timeout_ms };

            if req.max_latency_ms > 0 && latency_ms > req.max_latency_ms {
                return self.pick(
                    Tier::Tier0,
                    "latency_slo_violation",
                    t0.timeout_ms,
                    conf_threshold,
                );
            }

            if telemetry.health(Tier::Tier1).error_rate > 0.10 {
                return self.pick(
                    Tier::Tier0,
                    "tier1_high_error_rate",
                    t0.timeout_ms,
                    conf_threshold,
                );
            }

            return self.pick(
                Tier::Tier1,
                "escalated_low_confidence",
                latency_ms,
                t1.default_conf_threshold,
            );
        }

        if budget >= t2.base_cost_cents && t2.enabled {
            if telemetry.health(Tier::Tier2).error_rate > 0.15 {
                return self.pick(
                    Tier::Tier1,
                    "tier2_high_error_rate",
                    t1.timeout_ms,
                    t1.default_conf_threshold,
                );
            }

            let p99 = telemetry.health(Tier::Tier2).p99_latency_ms;
            let latency_ms = if p99 > 0 { p99 } else { t2.timeout_ms };
            return self.pick(
                Tier::Tier2,
                "high_budget",
                latency_ms,
                t2.default_conf_threshold,
            );
        }

        self.pick(Tier::Tier0, "default", t0.timeout_ms, conf_threshold)
    }

    /// Escalation hint for the dispatcher: from tier0 promote when confidence
    /// missed 0.75 and at least tier1's cost remains; from tier1 promote when
    /// confidence missed 0.85 and at least tier2's cost remains. Never
    /// demotes.
    pub fn escalate(&self, current: Tier, confidence: f64, budget: f64) -> (Tier, &'static str) {
        if current == Tier::Tier0 && confidence < 0.75 && budget >= 2.0 {
            return (Tier::Tier1, "escalate_to_tier1");
        }
        if current == Tier::Tier1 && confidence < 0.85 && budget >= 5.0 {
            return (Tier::Tier2, "escalate_to_tier2");
        }
        (current, "no_escalation")
    }
}
