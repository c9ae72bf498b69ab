//! Ensemble aggregator: scores a response with several judges at once.
//!
//! Fan-out goes through [`FanOutQuery`]; fan-in is the deterministic
//! [`EnsembleSynthesizer`] from `consilium-core`. Failed, timed-out and
//! unparseable judges are kept in the result as tagged scores.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use consilium_core::{
    score_judge_response, EnsembleResult, EnsembleSynthesizer, JudgeError, JudgeScore, Rubric,
};

use crate::backend::BackendRequest;
use crate::cache::{CacheKey, ScoreCache};
use crate::config::RuntimeConfig;
use crate::fanout::{BackendResult, DispatchOptions, FanOutQuery};
use crate::prompts;
use crate::RuntimeError;

/// One prompt/response pair to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSample {
    pub sample_id: String,
    pub prompt: String,
    pub response: String,
}

impl EnsembleSample {
    pub fn new(
        sample_id: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            prompt: prompt.into(),
            response: response.into(),
        }
    }
}

/// Scores responses with a fixed panel of judges.
#[derive(Debug)]
pub struct EnsembleAggregator {
    fanout: Arc<FanOutQuery>,
    judges: Vec<String>,
    rubric: Rubric,
    synthesizer: EnsembleSynthesizer,
    request_timeout: Duration,
    batch_timeout: Duration,
    max_concurrent: usize,
    cache: Option<ScoreCache>,
}

impl EnsembleAggregator {
    /// Aggregator with default thresholds, timeouts and no cache.
    pub fn new(fanout: Arc<FanOutQuery>, judges: Vec<String>, rubric: Rubric) -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            fanout,
            judges,
            rubric,
            synthesizer: defaults.synthesizer(),
            request_timeout: defaults.request_timeout,
            batch_timeout: defaults.batch_timeout,
            max_concurrent: defaults.max_concurrent,
            cache: None,
        }
    }

    /// Aggregator with thresholds, timeouts and cache per config.
    pub fn from_config(
        fanout: Arc<FanOutQuery>,
        judges: Vec<String>,
        rubric: Rubric,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            fanout,
            judges,
            rubric,
            synthesizer: config.synthesizer(),
            request_timeout: config.request_timeout,
            batch_timeout: config.batch_timeout,
            max_concurrent: config.max_concurrent.max(1),
            cache: ScoreCache::from_config(&config.cache),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: EnsembleSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_cache(mut self, cache: ScoreCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn judges(&self) -> &[String] {
        &self.judges
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// Score one response with every judge.
    pub async fn score(&self, prompt: &str, response: &str) -> Result<EnsembleResult, RuntimeError> {
        let options = DispatchOptions::new(self.request_timeout);
        self.score_with(prompt, response, &options).await
    }

    /// [`score`](Self::score) with a deadline and/or cancellation.
    pub async fn score_with(
        &self,
        prompt: &str,
        response: &str,
        options: &DispatchOptions,
    ) -> Result<EnsembleResult, RuntimeError> {
        self.score_using(prompt, response, &self.judges, &self.synthesizer, options)
            .await
    }

    /// Score with an explicit judge panel and aggregation policy.
    pub async fn score_using(
        &self,
        prompt: &str,
        response: &str,
        judges: &[String],
        synthesizer: &EnsembleSynthesizer,
        options: &DispatchOptions,
    ) -> Result<EnsembleResult, RuntimeError> {
        let messages = prompts::scoring_messages(&self.rubric, prompt, response);
        let requests: Vec<BackendRequest> = judges
            .iter()
            .map(|judge| BackendRequest::new(judge.as_str(), messages.clone()))
            .collect();
        self.fanout.validate(&requests)?;

        let mut slots: Vec<Option<JudgeScore>> = Vec::with_capacity(judges.len());
        let mut pending_slots = Vec::new();
        let mut pending = Vec::new();
        for (slot, request) in requests.into_iter().enumerate() {
            match self.cached(&request.backend_id, prompt, response).await {
                Some(mut score) => {
                    tracing::debug!(backend = %request.backend_id, "Judge score served from cache");
                    score.passed = score.weighted_score >= synthesizer.pass_threshold;
                    slots.push(Some(score));
                }
                None => {
                    slots.push(None);
                    pending_slots.push(slot);
                    pending.push(request);
                }
            }
        }

        let results = self.fanout.dispatch_with(&pending, options).await?;
        for (slot, result) in pending_slots.into_iter().zip(results) {
            let score = match result {
                BackendResult::Success {
                    backend_id,
                    response: reply,
                    ..
                } => {
                    let score = score_judge_response(
                        &backend_id,
                        reply.text(),
                        &self.rubric,
                        synthesizer.pass_threshold,
                    );
                    if let Some(cache) = &self.cache {
                        let key = CacheKey::new(&backend_id, prompt, response, &self.rubric);
                        cache.insert(key, score.clone()).await;
                    }
                    score
                }
                BackendResult::Failure {
                    backend_id,
                    kind,
                    detail,
                    ..
                } => JudgeScore::failed(backend_id, JudgeError::new(kind, detail)),
            };
            slots[slot] = Some(score);
        }

        let scores: Vec<JudgeScore> = slots.into_iter().flatten().collect();
        Ok(synthesizer.synthesize(scores))
    }

    /// Score many samples, at most `max_concurrent` at a time.
    ///
    /// Results are in sample order.
    pub async fn score_batch(
        &self,
        samples: &[EnsembleSample],
    ) -> Result<Vec<EnsembleResult>, RuntimeError> {
        self.score_batch_with_cancel(samples, &CancellationToken::new())
            .await
    }

    /// [`score_batch`](Self::score_batch) that stops when `cancel` fires.
    ///
    /// Judges still running at cancellation, or past a sample's
    /// `batch_timeout`, are reported as timeouts in that sample's result.
    /// Samples run on the calling task, so dropping the returned future
    /// also abandons all in-flight work.
    pub async fn score_batch_with_cancel(
        &self,
        samples: &[EnsembleSample],
        cancel: &CancellationToken,
    ) -> Result<Vec<EnsembleResult>, RuntimeError> {
        let preview: Vec<BackendRequest> = self
            .judges
            .iter()
            .map(|judge| BackendRequest::new(judge.as_str(), Vec::new()))
            .collect();
        self.fanout.validate(&preview)?;

        let semaphore = Semaphore::new(self.max_concurrent);
        let semaphore = &semaphore;
        let units = samples.iter().map(|sample| async move {
            // The semaphore is never closed.
            let _permit = semaphore.acquire().await.ok();
            let mut options =
                DispatchOptions::new(self.request_timeout).with_cancel(cancel.clone());
            if let Some(deadline) = Instant::now().checked_add(self.batch_timeout) {
                options = options.with_deadline(deadline);
            }
            self.score_with(&sample.prompt, &sample.response, &options)
                .await
        });
        let results = join_all(units).await;

        if cancel.is_cancelled() {
            tracing::warn!(
                samples = samples.len(),
                "Batch cancelled, unfinished judges reported as timeouts"
            );
        }
        results.into_iter().collect()
    }

    async fn cached(&self, backend_id: &str, prompt: &str, response: &str) -> Option<JudgeScore> {
        let cache = self.cache.as_ref()?;
        cache
            .get(&CacheKey::new(backend_id, prompt, response, &self.rubric))
            .await
    }
}
