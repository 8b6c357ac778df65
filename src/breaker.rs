//! Per-tier circuit breaker.
//!
//! Stops traffic to a misbehaving tier and probes it periodically for
//! recovery.
//!
//! ## States
//! - **Closed**: normal operation; consecutive failures reaching the
//!   threshold open the circuit, any success resets the count
//! - **Open**: calls are rejected until `open_timeout` has elapsed since the
//!   last failure, then the next call becomes a half-open probe
//! - **HalfOpen**: at most `half_open_max_inflight` concurrent probes; one
//!   failure reopens, `success_threshold` consecutive successes close
//!
//! The lock is held only around state reads and counter updates; the wrapped
//! call itself runs unlocked.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = closed, 1 = open, 2 = half-open.
    pub fn code(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Rejection or passthrough failure from a breaker-wrapped call.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the call was rejected without running. This is an
    /// internal signal — the dispatcher reacts by promoting to the next
    /// tier, it is never surfaced to a client.
    Open,
    /// The wrapped operation ran and failed.
    Failed(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    half_open_inflight: u32,
}

/// Counter snapshot for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_inflight: u32,
}

/// Circuit breaker guarding one worker tier.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    half_open_max_inflight: u32,
}

impl CircuitBreaker {
    /// Breaker with the given thresholds and the default probe cap of 3.
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                half_open_inflight: 0,
            }),
            failure_threshold,
            success_threshold,
            open_timeout,
            half_open_max_inflight: 3,
        }
    }

    /// Override the half-open concurrent probe cap.
    pub fn with_half_open_max_inflight(mut self, max: u32) -> Self {
        self.half_open_max_inflight = max;
        self
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_inflight: inner.half_open_inflight,
        }
    }

    /// Execute `f` through the breaker.
    ///
    /// Returns `Err(CircuitBreakerError::Open)` without running `f` when the
    /// circuit rejects the call; otherwise runs `f` unlocked and records the
    /// outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        // Admission: decide under the lock, run outside it.
        let admitted_as_probe = {
            let mut inner = self.inner.lock();

            if inner.state == CircuitState::Open {
                let cooled_down = inner
                    .last_failure
                    .map(|t| t.elapsed() > self.open_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.half_open_inflight = 0;
                    debug!("circuit breaker: open -> half-open");
                } else {
                    debug!("circuit breaker: call rejected (open)");
                    return Err(CircuitBreakerError::Open);
                }
            }

            if inner.state == CircuitState::HalfOpen {
                if inner.half_open_inflight >= self.half_open_max_inflight {
                    debug!("circuit breaker: probe rejected (half-open at capacity)");
                    return Err(CircuitBreakerError::Open);
                }
                inner.half_open_inflight += 1;
                true
            } else {
                false
            }
        };

        let result = f().await;

        let mut inner = self.inner.lock();
        if admitted_as_probe {
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
        }

        match result {
            Ok(value) => {
                if inner.state == CircuitState::HalfOpen {
                    inner.success_count += 1;
                    if inner.success_count >= self.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.success_count = 0;
                        inner.failure_count = 0;
                        inner.half_open_inflight = 0;
                        debug!("circuit breaker: half-open -> closed (recovered)");
                    }
                } else {
                    inner.failure_count = 0;
                }
                Ok(value)
            }
            Err(e) => {
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());

                if inner.state == CircuitState::HalfOpen
                    || inner.failure_count >= self.failure_threshold
                {
                    warn!(
                        failures = inner.failure_count,
                        was_half_open = inner.state == CircuitState::HalfOpen,
                        "circuit breaker: opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
                Err(CircuitBreakerError::Failed(e))
            }
        }
    }
}
