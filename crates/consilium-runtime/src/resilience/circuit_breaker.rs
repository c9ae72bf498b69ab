//! Circuit breaker per judge backend.
//!
//! When a backend fails repeatedly, its circuit opens and further units
//! for it fail fast instead of spending rate-limit tokens and timeouts.
//! After `recovery_timeout` one trial unit at a time is let through;
//! `success_threshold` trial successes close the circuit, any trial
//! failure reopens it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed units before opening the circuit
    pub failure_threshold: u32,

    /// Time before a trial unit is let through, and the longest one may
    /// stay unresolved before another is admitted
    #[serde(with = "crate::config::duration")]
    pub recovery_timeout: Duration,

    /// Trial successes needed to close a half-open circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of one backend's circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed { failures: u32 },

    Open { opened_at: Instant },

    /// Trying recovery; `trial_started` is set while a trial is in flight
    HalfOpen {
        successes: u32,
        trial_started: Option<Instant>,
    },
}

/// Tracks one circuit per backend id, each recovering independently.
#[derive(Debug)]
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Whether a unit for `backend_id` may run now.
    ///
    /// Admitting a unit on a recovering circuit makes it the trial; until
    /// that unit reports back, other units are refused. A trial that
    /// never reports (for example, cancelled mid-call) stops blocking
    /// after `recovery_timeout`.
    pub fn allow(&self, backend_id: &str) -> bool {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(backend_id) else {
            return true;
        };

        match *state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() < self.config.recovery_timeout {
                    return false;
                }
                *state = CircuitState::HalfOpen {
                    successes: 0,
                    trial_started: Some(Instant::now()),
                };
                tracing::info!(backend = %backend_id, "Circuit half-open, trying recovery");
                true
            }
            CircuitState::HalfOpen {
                successes,
                trial_started,
            } => {
                let trial_pending = trial_started
                    .is_some_and(|started| started.elapsed() < self.config.recovery_timeout);
                if trial_pending {
                    return false;
                }
                *state = CircuitState::HalfOpen {
                    successes,
                    trial_started: Some(Instant::now()),
                };
                true
            }
        }
    }

    pub fn record_success(&self, backend_id: &str) {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(backend_id) else {
            return;
        };

        match *state {
            CircuitState::HalfOpen { successes, .. } => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    *state = CircuitState::Closed { failures: 0 };
                    tracing::info!(backend = %backend_id, "Circuit closed after recovery");
                } else {
                    *state = CircuitState::HalfOpen {
                        successes,
                        trial_started: None,
                    };
                }
            }
            CircuitState::Closed { .. } => *state = CircuitState::Closed { failures: 0 },
            CircuitState::Open { .. } => {}
        }
    }

    pub fn record_failure(&self, backend_id: &str) {
        let mut states = self.states.lock();
        let state = states
            .entry(backend_id.to_string())
            .or_insert(CircuitState::Closed { failures: 0 });

        match *state {
            CircuitState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!(
                        backend = %backend_id,
                        failures,
                        "Circuit opened after repeated failures"
                    );
                } else {
                    *state = CircuitState::Closed { failures };
                }
            }
            CircuitState::HalfOpen { .. } => {
                *state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!(backend = %backend_id, "Circuit reopened after failed trial call");
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub fn state(&self, backend_id: &str) -> CircuitState {
        self.states
            .lock()
            .get(backend_id)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.lock().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
