//! Pairwise comparison with position-swap tracking.
//!
//! Judges favour whichever response they see first (or second), so each
//! comparison may show the two responses in swapped positions. The swap is
//! recorded and every verdict is mapped back to the caller's labels before
//! it leaves this module.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use consilium_core::{parse_pairwise_output, PairLabels, PairwiseVerdict, Rubric};

use crate::backend::BackendRequest;
use crate::config::RuntimeConfig;
use crate::fanout::{BackendResult, DispatchOptions, FanOutQuery};
use crate::prompts;
use crate::RuntimeError;

/// When to present the responses in swapped positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPolicy {
    Never,
    Always,
    Random { probability: f64 },
}

impl Default for SwapPolicy {
    fn default() -> Self {
        SwapPolicy::Random { probability: 0.5 }
    }
}

/// Compares two responses with a panel of judges.
pub struct PairwiseComparator {
    fanout: Arc<FanOutQuery>,
    judges: Vec<String>,
    rubric: Option<Rubric>,
    request_timeout: Duration,
    swap: SwapPolicy,
    rng: Mutex<ChaCha8Rng>,
}

impl PairwiseComparator {
    pub fn new(fanout: Arc<FanOutQuery>, judges: Vec<String>) -> Self {
        Self {
            fanout,
            judges,
            rubric: None,
            request_timeout: RuntimeConfig::default().request_timeout,
            swap: SwapPolicy::default(),
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
        }
    }

    pub fn from_config(fanout: Arc<FanOutQuery>, judges: Vec<String>, config: &RuntimeConfig) -> Self {
        Self::new(fanout, judges)
            .with_request_timeout(config.request_timeout)
            .with_swap_policy(SwapPolicy::Random {
                probability: config.swap_probability,
            })
    }

    /// Judge per-criterion against this rubric.
    pub fn with_rubric(mut self, rubric: Rubric) -> Self {
        self.rubric = Some(rubric);
        self
    }

    pub fn with_swap_policy(mut self, swap: SwapPolicy) -> Self {
        self.swap = swap;
        self
    }

    /// Seed the swap RNG so swap decisions are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Compare `one` against `two`; the verdict uses `labels`.
    pub async fn compare(
        &self,
        prompt: &str,
        one: &str,
        two: &str,
        labels: &PairLabels,
    ) -> Result<PairwiseVerdict, RuntimeError> {
        let options = DispatchOptions::new(self.request_timeout);
        self.compare_with(prompt, one, two, labels, &options).await
    }

    /// [`compare`](Self::compare) with a deadline and/or cancellation.
    ///
    /// Judges unresolved when `options` interrupts the dispatch count as
    /// failed; if none answered, the verdict is a flagged tie.
    pub async fn compare_with(
        &self,
        prompt: &str,
        one: &str,
        two: &str,
        labels: &PairLabels,
        options: &DispatchOptions,
    ) -> Result<PairwiseVerdict, RuntimeError> {
        let swapped = self.decide_swap();
        self.run(prompt, one, two, labels, swapped, options).await
    }

    /// [`compare`](Self::compare) with the swap decision forced.
    pub async fn compare_with_swap(
        &self,
        prompt: &str,
        one: &str,
        two: &str,
        labels: &PairLabels,
        swapped: bool,
    ) -> Result<PairwiseVerdict, RuntimeError> {
        let options = DispatchOptions::new(self.request_timeout);
        self.run(prompt, one, two, labels, swapped, &options).await
    }

    async fn run(
        &self,
        prompt: &str,
        one: &str,
        two: &str,
        labels: &PairLabels,
        swapped: bool,
        options: &DispatchOptions,
    ) -> Result<PairwiseVerdict, RuntimeError> {
        let (shown_a, shown_b) = if swapped { (two, one) } else { (one, two) };
        let messages = prompts::pairwise_messages(self.rubric.as_ref(), prompt, shown_a, shown_b);
        let requests: Vec<BackendRequest> = self
            .judges
            .iter()
            .map(|judge| BackendRequest::new(judge.as_str(), messages.clone()))
            .collect();

        let results = self.fanout.dispatch_with(&requests, options).await?;

        let mut judgements = Vec::with_capacity(results.len());
        for result in &results {
            match result {
                BackendResult::Success {
                    backend_id,
                    response,
                    ..
                } => match parse_pairwise_output(response.text()) {
                    Ok(judgement) => judgements.push(judgement.unswap(swapped)),
                    Err(e) => {
                        tracing::warn!(backend = %backend_id, error = %e, "Pairwise verdict could not be parsed");
                    }
                },
                BackendResult::Failure {
                    backend_id, kind, ..
                } => {
                    tracing::warn!(backend = %backend_id, kind = %kind, "Pairwise judge failed");
                }
            }
        }

        let verdict =
            PairwiseVerdict::from_judgements(&judgements, labels, swapped, self.judges.len());
        if verdict.parse_error {
            tracing::warn!(judges = self.judges.len(), "No judge produced a usable pairwise verdict");
        }
        Ok(verdict)
    }

    fn decide_swap(&self) -> bool {
        match self.swap {
            SwapPolicy::Never => false,
            SwapPolicy::Always => true,
            SwapPolicy::Random { probability } => {
                let probability = if probability.is_nan() {
                    0.0
                } else {
                    probability.clamp(0.0, 1.0)
                };
                self.rng.lock().gen_bool(probability)
            }
        }
    }
}

impl std::fmt::Debug for PairwiseComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairwiseComparator")
            .field("judges", &self.judges)
            .field("swap", &self.swap)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
