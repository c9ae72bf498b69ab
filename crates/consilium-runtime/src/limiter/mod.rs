//! Per-provider rate limiting.
//!
//! Every provider gets a token bucket refilled at its requests-per-minute
//! budget. The registry is constructed explicitly and shared by reference;
//! there is no global limiter state.

mod bucket;
mod registry;

pub use bucket::{RateBudget, TokenBucket};
pub use registry::{provider_for, ProviderLimiterRegistry};
