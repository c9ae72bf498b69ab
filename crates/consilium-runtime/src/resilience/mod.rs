//! Resilience patterns for backend calls.
//!
//! This module provides:
//! - Retry with exponential backoff
//! - Circuit breaker per backend

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
