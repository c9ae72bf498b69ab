//! Per-provider limiter registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::bucket::{RateBudget, TokenBucket};
use crate::RuntimeError;

/// Provider a backend id belongs to.
///
/// `"anthropic/claude-sonnet"` → `"anthropic"`. Bare model names are
/// mapped by well-known prefix; anything else is its own provider.
pub fn provider_for(backend_id: &str) -> String {
    if let Some((provider, _)) = backend_id.split_once('/') {
        return provider.trim().to_ascii_lowercase();
    }

    let lower = backend_id.trim().to_ascii_lowercase();
    if lower.starts_with("claude") {
        "anthropic".to_string()
    } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
        "openai".to_string()
    } else if lower.starts_with("gemini") {
        "google".to_string()
    } else {
        lower
    }
}

/// Owns one token bucket per provider.
///
/// Buckets are created on first use and live as long as the registry.
/// Acquiring for one provider never touches another provider's bucket.
#[derive(Debug)]
pub struct ProviderLimiterRegistry {
    budgets: HashMap<String, f64>,
    default_rpm: Option<f64>,
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl ProviderLimiterRegistry {
    /// Registry where unconfigured providers get `default_rpm`.
    pub fn new(default_rpm: f64) -> Self {
        Self {
            budgets: HashMap::new(),
            default_rpm: Some(default_rpm),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Registry that rejects unconfigured providers.
    pub fn strict() -> Self {
        Self {
            budgets: HashMap::new(),
            default_rpm: None,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Configure a provider's requests-per-minute budget.
    pub fn with_provider(mut self, provider_id: impl Into<String>, rpm: f64) -> Self {
        self.budgets.insert(provider_id.into().to_ascii_lowercase(), rpm);
        self
    }

    /// Budget a provider will get, without creating its bucket.
    pub fn budget_for(&self, provider_id: &str) -> Result<RateBudget, RuntimeError> {
        let key = provider_id.to_ascii_lowercase();
        let rpm = self
            .budgets
            .get(&key)
            .copied()
            .or(self.default_rpm)
            .ok_or_else(|| RuntimeError::UnknownProvider(provider_id.to_string()))?;
        RateBudget::per_minute(key, rpm)
    }

    /// Fail if `provider_id` has no usable budget.
    pub fn check(&self, provider_id: &str) -> Result<(), RuntimeError> {
        self.budget_for(provider_id).map(|_| ())
    }

    /// The provider's bucket, created on first reference.
    pub fn bucket(&self, provider_id: &str) -> Result<Arc<TokenBucket>, RuntimeError> {
        let key = provider_id.to_ascii_lowercase();
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get(&key) {
            return Ok(Arc::clone(bucket));
        }

        let budget = self.budget_for(&key)?;
        tracing::debug!(
            provider = %key,
            capacity = budget.capacity,
            configured = self.budgets.contains_key(&key),
            "Creating rate limiter"
        );
        let bucket = Arc::new(TokenBucket::new(budget));
        buckets.insert(key, Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Take one token for `provider_id`, waiting if needed.
    pub async fn acquire(&self, provider_id: &str) -> Result<Duration, RuntimeError> {
        // The map lock is released before waiting on the bucket.
        let bucket = self.bucket(provider_id)?;
        Ok(bucket.acquire().await)
    }

    /// Providers with a live bucket.
    pub fn active_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.buckets.lock().keys().cloned().collect();
        providers.sort();
        providers
    }
}

impl Default for ProviderLimiterRegistry {
    fn default() -> Self {
        Self::new(60.0)
    }
}
