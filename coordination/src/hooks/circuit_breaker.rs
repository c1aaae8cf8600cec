//! Circuit breaker guarding hook execution
//!
//! Trips on a run of consecutive failures or on a high failure rate over a
//! rolling window of recent outcomes. While open, events are answered with a
//! fallback result instead of running handlers; after `reset_timeout` the
//! breaker lets traffic through again in half-open state and the next outcome
//! decides whether it closes or re-opens.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy, calls pass through
    Closed,
    /// Tripped, calls are answered with a fallback
    Open,
    /// Cooldown elapsed, the next outcome decides
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Failure rate over the window that opens the circuit
    pub failure_rate_threshold: f64,
    /// Number of recent outcomes kept for the failure rate
    pub window_size: usize,
    /// Outcomes required before the failure rate is considered
    pub min_calls: usize,
    /// Open → half-open cooldown
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            window_size: 20,
            min_calls: 10,
            reset_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_failure_rate(mut self, rate: f64, window_size: usize, min_calls: usize) -> Self {
        self.failure_rate_threshold = rate;
        self.window_size = window_size;
        self.min_calls = min_calls;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err("circuit_breaker.failure_rate_threshold must be within [0, 1]".to_string());
        }
        if self.window_size == 0 || self.min_calls > self.window_size {
            return Err("circuit_breaker.min_calls must not exceed a non-zero window_size".to_string());
        }
        Ok(())
    }
}

/// A state change, reported so callers can log and notify it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Outcome of asking the breaker for permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub transition: Option<Transition>,
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_rate: f64,
    pub window_len: usize,
    pub opened_at: Option<DateTime<Utc>>,
    pub rejected: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// `true` = failure
    window: VecDeque<bool>,
    opened_at: Option<(Instant, DateTime<Utc>)>,
    rejected: u64,
}

impl BreakerInner {
    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().filter(|f| **f).count() as f64 / self.window.len() as f64
    }

    fn transition(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        match to {
            CircuitState::Open => self.opened_at = Some((Instant::now(), Utc::now())),
            CircuitState::Closed => {
                self.opened_at = None;
                self.window.clear();
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {}
        }
        Some(Transition { from, to })
    }
}

/// Failure-rate gate protecting hook execution
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = VecDeque::with_capacity(config.window_size);
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window,
                opened_at: None,
                rejected: 0,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may proceed. Moves open → half-open once the
    /// cooldown has elapsed.
    pub fn allow_request(&self) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Admission {
                allowed: true,
                transition: None,
            },
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |(at, _)| at.elapsed() >= self.config.reset_timeout());
                if cooled {
                    let transition = inner.transition(CircuitState::HalfOpen);
                    info!("Circuit breaker half-open, probing");
                    Admission {
                        allowed: true,
                        transition,
                    }
                } else {
                    inner.rejected += 1;
                    Admission {
                        allowed: false,
                        transition: None,
                    }
                }
            }
        }
    }

    fn push_outcome(&self, inner: &mut BreakerInner, failed: bool) {
        if inner.window.len() >= self.config.window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(failed);
    }

    /// Record a successful call
    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.push_outcome(&mut inner, false);
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            let transition = inner.transition(CircuitState::Closed);
            info!("Circuit breaker closed after successful trial request");
            return transition;
        }
        None
    }

    /// Record a failed call; may open the circuit
    pub fn record_failure(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.push_outcome(&mut inner, true);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::HalfOpen => {
                warn!("Probe failed, circuit breaker re-opened");
                inner.transition(CircuitState::Open)
            }
            CircuitState::Closed => {
                let rate = inner.failure_rate();
                let by_count = inner.consecutive_failures >= self.config.failure_threshold;
                let by_rate = inner.window.len() >= self.config.min_calls
                    && rate >= self.config.failure_rate_threshold;
                if by_count || by_rate {
                    warn!(
                        consecutive_failures = inner.consecutive_failures,
                        failure_rate = rate,
                        "Circuit breaker opened"
                    );
                    inner.transition(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    /// Current state, without applying the cooldown
    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_rate: inner.failure_rate(),
            window_len: inner.window.len(),
            opened_at: inner.opened_at.map(|(_, at)| at),
            rejected: inner.rejected,
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) -> Option<Transition> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.transition(CircuitState::Closed)
    }
}
