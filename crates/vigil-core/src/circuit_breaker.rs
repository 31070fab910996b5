//! Circuit breaker protecting failing sites and external APIs.
//!
//! ```text
//! CLOSED --[N consecutive failures]--> OPEN --[recovery timeout]--> HALF_OPEN
//!    ^                                                                  |
//!    +--[probe succeeds]----------------------------<-------------------+
//!    (probe failure reopens)
//! ```
//!
//! The scheduler asks [`CircuitBreaker::allow_request`] before dispatching
//! a check; while open, no fetch is issued for that site until the
//! recovery timeout elapses or an operator resets it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_error: Option<String>,
    /// Extended while rate limits keep arriving.
    current_recovery: Duration,
    /// A half-open probe has been handed out and not yet resolved.
    probe_in_flight: bool,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub retry_after: Option<Duration>,
}

/// Thread-safe breaker keyed by site or API name.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    max_recovery: Duration,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        let recovery = config.recovery_timeout();
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold,
            recovery_timeout: recovery,
            max_recovery: recovery * 8,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_error: None,
                current_recovery: recovery,
                probe_in_flight: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(breaker = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Whether a request may go out now. Open circuits transition to
    /// half-open once the recovery timeout has elapsed and then admit
    /// exactly one probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.current_recovery {
                    tracing::info!(breaker = %self.name, "Circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Probe succeeded, closing circuit");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.last_error = None;
                inner.probe_in_flight = false;
                inner.current_recovery = self.recovery_timeout;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        if !error.should_trip_circuit() {
            return;
        }
        let rate_limited = matches!(error, AppError::RateLimitExceeded)
            || matches!(error, AppError::LlmError { status_code: 429, .. });

        let mut inner = self.lock();
        inner.last_error = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "Circuit opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    if rate_limited {
                        inner.current_recovery =
                            (inner.current_recovery * 2).min(self.max_recovery);
                    }
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, error = %error, "Probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                if rate_limited {
                    inner.current_recovery = (inner.current_recovery * 2).min(self.max_recovery);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        // Without transitioning: a breaker past its recovery window still
        // reports open until a probe is admitted.
        matches!(self.lock().state, CircuitState::Open)
    }

    /// Operator-initiated reset (e.g. on resume).
    pub fn reset(&self) {
        let mut inner = self.lock();
        tracing::info!(breaker = %self.name, "Circuit manually reset");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.last_error = None;
        inner.probe_in_flight = false;
        inner.current_recovery = self.recovery_timeout;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_after = match inner.state {
            CircuitState::Open => inner.opened_at.map(|t| {
                inner
                    .current_recovery
                    .saturating_sub(t.elapsed())
            }),
            _ => None,
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error.clone(),
            retry_after,
        }
    }
}
