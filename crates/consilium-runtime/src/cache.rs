//! Score cache.
//!
//! Keeps successful judge scores in memory so repeated evaluation of the
//! same (judge, prompt, response, rubric) does not spend another call.
//! Failed scores are never stored.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use consilium_core::{JudgeScore, Rubric};

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,

    #[serde(with = "crate::config::duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Cache key for one judge's score of one response.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    backend_id: String,
    prompt_hash: u64,
    response_hash: u64,
    rubric_hash: u64,
}

impl CacheKey {
    pub fn new(backend_id: &str, prompt: &str, response: &str, rubric: &Rubric) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            prompt_hash: hash_str(prompt),
            response_hash: hash_str(response),
            rubric_hash: hash_rubric(rubric),
        }
    }
}

/// Judge score cache using moka.
#[derive(Clone)]
pub struct ScoreCache {
    cache: Cache<CacheKey, JudgeScore>,
}

impl ScoreCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Cache per config, or `None` when disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_entries, config.ttl))
    }

    pub async fn get(&self, key: &CacheKey) -> Option<JudgeScore> {
        self.cache.get(key).await
    }

    /// Store a score. Scores carrying an error are ignored.
    pub async fn insert(&self, key: CacheKey, score: JudgeScore) {
        if score.is_error() {
            return;
        }
        self.cache.insert(key, score).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ScoreCache {
    fn default() -> Self {
        let config = CacheConfig::default();
        Self::new(config.max_entries, config.ttl)
    }
}

impl std::fmt::Debug for ScoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreCache")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

fn hash_str(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn hash_rubric(rubric: &Rubric) -> u64 {
    let mut hasher = DefaultHasher::new();
    rubric.name.hash(&mut hasher);
    rubric.scale.min.to_bits().hash(&mut hasher);
    rubric.scale.max.to_bits().hash(&mut hasher);
    for criterion in &rubric.criteria {
        criterion.name.hash(&mut hasher);
        criterion.description.hash(&mut hasher);
        criterion.weight.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}
