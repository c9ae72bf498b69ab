//! Runtime configuration.
//!
//! Loaded from YAML or JSON. Every field has a default, so an empty
//! document is a valid configuration:
//!
//! ```yaml
//! providers:
//!   anthropic: 50
//!   openai: 500
//! default_rpm: 60
//! aggregation: median
//! pass_threshold: 0.7
//! request_timeout: 45s
//! retry:
//!   max_attempts: 4
//!   min_delay: 1s
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use consilium_core::{AggregationMethod, EnsembleSynthesizer};

use crate::cache::CacheConfig;
use crate::limiter::ProviderLimiterRegistry;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the judge runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Requests per minute by provider
    pub providers: BTreeMap<String, f64>,

    /// Budget for unconfigured providers; `None` rejects them
    pub default_rpm: Option<f64>,

    pub aggregation: AggregationMethod,
    pub pass_threshold: f64,
    pub variance_threshold: f64,

    /// Per backend unit, retries included
    #[serde(with = "duration")]
    pub request_timeout: Duration,

    /// Per sample in a batch
    #[serde(with = "duration")]
    pub batch_timeout: Duration,

    /// Samples scored at once by `score_batch`
    pub max_concurrent: usize,

    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,

    /// Chance that a pairwise comparison shows the responses swapped
    pub swap_probability: f64,

    pub cache: CacheConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            default_rpm: Some(60.0),
            aggregation: AggregationMethod::Median,
            pass_threshold: 0.7,
            variance_threshold: 0.2,
            request_timeout: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(300),
            max_concurrent: 8,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            swap_probability: 0.5,
            cache: CacheConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are JSON, anything else YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (provider, rpm) in &self.providers {
            if !(rpm.is_finite() && *rpm > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "providers.{provider}: rpm must be positive, got {rpm}"
                )));
            }
        }
        if let Some(rpm) = self.default_rpm {
            if !(rpm.is_finite() && rpm > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "default_rpm must be positive, got {rpm}"
                )));
            }
        }
        check_unit("pass_threshold", self.pass_threshold)?;
        check_unit("swap_probability", self.swap_probability)?;
        if !(self.variance_threshold.is_finite() && self.variance_threshold >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "variance_threshold must be non-negative, got {}",
                self.variance_threshold
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout must be non-zero".into()));
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError::Invalid("batch_timeout must be non-zero".into()));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry.min_delay must not exceed retry.max_delay".into(),
            ));
        }
        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker thresholds must be at least 1".into(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1 when the cache is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Build a limiter registry with this config's budgets.
    pub fn limiter_registry(&self) -> ProviderLimiterRegistry {
        let registry = match self.default_rpm {
            Some(rpm) => ProviderLimiterRegistry::new(rpm),
            None => ProviderLimiterRegistry::strict(),
        };
        self.providers.iter().fold(registry, |registry, (provider, rpm)| {
            registry.with_provider(provider.as_str(), *rpm)
        })
    }

    pub fn synthesizer(&self) -> EnsembleSynthesizer {
        EnsembleSynthesizer::new(self.aggregation, self.pass_threshold, self.variance_threshold)
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be within [0, 1], got {value}"
        )))
    }
}

/// Serde adapter for human-readable durations (`"30s"`, `"1h 30m"`).
pub(crate) mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.batch_timeout, Duration::from_secs(300));
        assert_eq!(config.aggregation, AggregationMethod::Median);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
providers:
  anthropic: 50
  openai: 500
default_rpm: 20
aggregation: mean
pass_threshold: 0.8
variance_threshold: 0.15
request_timeout: 45s
batch_timeout: 10m
max_concurrent: 4
retry:
  max_attempts: 5
  min_delay: 1s
  max_delay: 30s
  jitter: false
circuit_breaker:
  failure_threshold: 5
  recovery_timeout: 2m
swap_probability: 1.0
cache:
  enabled: false
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.providers["anthropic"], 50.0);
        assert_eq!(config.aggregation, AggregationMethod::Mean);
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.batch_timeout, Duration::from_secs(600));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.retry.jitter);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert!(!config.cache.enabled);

        let registry = config.limiter_registry();
        assert_eq!(registry.budget_for("openai").unwrap().capacity, 500.0);
        assert_eq!(registry.budget_for("mistral").unwrap().capacity, 20.0);
    }

    #[test]
    fn test_null_default_rpm_is_strict() {
        let yaml = "default_rpm: null\nproviders:\n  anthropic: 60\n";
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        let registry = config.limiter_registry();
        assert!(registry.check("anthropic").is_ok());
        assert!(registry.check("openai").is_err());
    }

    #[test]
    fn test_unknown_aggregation_falls_back_to_median() {
        let config = RuntimeConfig::from_json(r#"{"aggregation": "trimmed_mean"}"#).unwrap();
        assert_eq!(config.aggregation, AggregationMethod::Median);
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        assert!(matches!(
            RuntimeConfig::from_yaml("pass_threshold: 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("max_concurrent: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("providers:\n  openai: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("request_timeout: soon"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_duration_round_trip() {
        let json = serde_json::to_string(&RuntimeConfig::default()).unwrap();
        assert!(json.contains("\"request_timeout\":\"1m\""));
        assert_eq!(RuntimeConfig::from_json(&json).unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir()
            .join(format!("consilium-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"max_concurrent": 2}"#).unwrap();
        let config = RuntimeConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.max_concurrent, 2);

        assert!(matches!(
            RuntimeConfig::from_file("/nonexistent/consilium.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
