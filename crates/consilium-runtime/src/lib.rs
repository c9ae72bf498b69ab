//! # consilium-runtime
//!
//! Async half of the Consilium judge ensemble.
//!
//! This crate sends prompts to many judge backends at once and hands their
//! answers to `consilium-core` for scoring. It owns everything that waits:
//! - Per-provider token buckets (requests per minute)
//! - Concurrent fan-out with per-request timeouts, retries and circuit breaking
//! - Ensemble scoring of single samples and bounded-concurrency batches
//! - Pairwise comparison with position-swap tracking
//!
//! It never talks to a network itself: backends implement
//! [`ModelBackend`] and are registered with a [`FanOutQuery`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use consilium_core::{Criterion, Rubric};
//! use consilium_runtime::{EnsembleAggregator, FanOutQuery, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("consilium.yaml")?;
//! let fanout = FanOutQuery::from_config(&config)
//!     .with_backend(Arc::new(my_anthropic_backend))
//!     .with_backend(Arc::new(my_openai_backend));
//!
//! let rubric = Rubric::new("helpfulness")
//!     .criterion(Criterion::new("accuracy", "Facts are correct"));
//! let aggregator = EnsembleAggregator::from_config(
//!     Arc::new(fanout),
//!     vec!["anthropic/claude-sonnet".into(), "openai/gpt-4o".into()],
//!     rubric,
//!     &config,
//! );
//!
//! let result = aggregator.score("Where is my order?", "It shipped yesterday.").await?;
//! if result.needs_human_review {
//!     println!("REVIEW: agreement {:.2}", result.agreement);
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod ensemble;
pub mod fanout;
pub mod limiter;
pub mod pairwise;
pub mod prompts;
pub mod resilience;

pub use backend::{
    BackendError, BackendRequest, BackendResponse, ChatMessage, ModelBackend, TokenUsage,
};
pub use cache::{CacheConfig, CacheKey, ScoreCache};
pub use config::{ConfigError, RuntimeConfig};
pub use ensemble::{EnsembleAggregator, EnsembleSample};
pub use fanout::{BackendResult, DispatchOptions, FanOutQuery};
pub use limiter::{provider_for, ProviderLimiterRegistry, RateBudget, TokenBucket};
pub use pairwise::{PairwiseComparator, SwapPolicy};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};

pub use tokio_util::sync::CancellationToken;

use thiserror::Error;

/// Caller errors from the runtime.
///
/// Per-backend failures are never errors; they come back as
/// [`BackendResult::Failure`] values.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No rate budget for provider '{0}' and no default configured")]
    UnknownProvider(String),

    #[error("Invalid rate budget for provider '{provider}': {rpm} requests per minute")]
    InvalidBudget { provider: String, rpm: f64 },

    #[error("No backend registered as '{0}'")]
    UnknownBackend(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
