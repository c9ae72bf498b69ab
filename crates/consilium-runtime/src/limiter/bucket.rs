//! Token bucket with lazy refill.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::RuntimeError;

/// Rate budget for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBudget {
    pub provider_id: String,
    pub capacity: f64,
    pub refill_per_second: f64,
}

impl RateBudget {
    /// Budget of `rpm` requests per minute.
    ///
    /// Capacity never drops below one token, so budgets under 1 rpm still
    /// grant a request whenever a full token has refilled. A budget that
    /// never refills (zero, negative or NaN rpm) is rejected.
    pub fn per_minute(provider_id: impl Into<String>, rpm: f64) -> Result<Self, RuntimeError> {
        let provider_id = provider_id.into();
        if !(rpm.is_finite() && rpm > 0.0) {
            return Err(RuntimeError::InvalidBudget {
                provider: provider_id,
                rpm,
            });
        }
        Ok(Self {
            provider_id,
            capacity: rpm.max(1.0),
            refill_per_second: rpm / 60.0,
        })
    }

    /// Time to refill from `available` up to one whole token.
    fn wait_for_token(&self, available: f64) -> Duration {
        let seconds = (1.0 - available) / self.refill_per_second;
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, budget: &RateBudget) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * budget.refill_per_second).min(budget.capacity);
        self.last_refill = now;
    }
}

/// Token bucket for one provider.
///
/// The state lock is held across the refill wait, so concurrent callers
/// queue in arrival order and refill-then-decrement is atomic.
#[derive(Debug)]
pub struct TokenBucket {
    budget: RateBudget,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(budget: RateBudget) -> Self {
        let state = BucketState {
            available: budget.capacity,
            last_refill: Instant::now(),
        };
        Self {
            budget,
            state: Mutex::new(state),
        }
    }

    pub fn budget(&self) -> &RateBudget {
        &self.budget
    }

    /// Take one token, waiting for refill if the bucket is empty.
    ///
    /// Returns how long the caller spent waiting for refill.
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        let mut state = self.state.lock().await;
        state.refill(&self.budget);

        while state.available < 1.0 {
            let wait = self.budget.wait_for_token(state.available);
            tracing::debug!(
                provider = %self.budget.provider_id,
                wait = ?wait,
                "Rate limit reached, waiting for refill"
            );
            tokio::time::sleep(wait).await;
            state.refill(&self.budget);
        }

        state.available -= 1.0;
        start.elapsed()
    }

    /// Take one token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };
        state.refill(&self.budget);
        if state.available >= 1.0 {
            state.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available right now, after refill.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(&self.budget);
        state.available
    }
}
