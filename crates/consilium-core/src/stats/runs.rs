//! Comparing two evaluation runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::{mcnemar_test, wilson_interval, McNemarResult, StatsError, WilsonInterval};
use crate::types::EnsembleResult;

/// One scored sample of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub sample_id: String,
    pub passed: bool,
}

impl Episode {
    pub fn new(sample_id: impl Into<String>, passed: bool) -> Self {
        Self {
            sample_id: sample_id.into(),
            passed,
        }
    }

    /// Episode for a sample the ensemble has already judged.
    pub fn from_result(sample_id: impl Into<String>, result: &EnsembleResult) -> Self {
        Self::new(sample_id, result.passed)
    }
}

/// Ordered pass/fail outcomes of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPassVector {
    pub run_id: String,
    pub outcomes: Vec<(String, bool)>,
}

impl RunPassVector {
    pub fn new(run_id: impl Into<String>, outcomes: Vec<(String, bool)>) -> Self {
        Self {
            run_id: run_id.into(),
            outcomes,
        }
    }

    pub fn from_episodes(
        run_id: impl Into<String>,
        episodes: impl IntoIterator<Item = Episode>,
    ) -> Self {
        let outcomes = episodes
            .into_iter()
            .map(|e| (e.sample_id, e.passed))
            .collect();
        Self::new(run_id, outcomes)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, passed)| *passed).count()
    }

    /// Wilson interval over every outcome of the run.
    pub fn wilson(&self, confidence: f64) -> Result<WilsonInterval, StatsError> {
        wilson_interval(self.passed_count(), self.len(), confidence)
    }

    fn first_occurrences(&self) -> HashMap<&str, bool> {
        let mut seen = HashMap::with_capacity(self.outcomes.len());
        for (id, passed) in &self.outcomes {
            seen.entry(id.as_str()).or_insert(*passed);
        }
        seen
    }
}

/// Side-by-side statistics for two runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub run_a: String,
    pub run_b: String,

    /// Over all of run A's outcomes
    pub wilson_a: WilsonInterval,

    /// Over all of run B's outcomes
    pub wilson_b: WilsonInterval,

    /// Over the samples both runs scored
    pub mcnemar: McNemarResult,

    pub common_sample_count: usize,
    pub evaluated_at: DateTime<Utc>,
}

impl ComparisonReport {
    /// Pass-rate difference `B - A`.
    pub fn rate_delta(&self) -> f64 {
        self.wilson_b.rate() - self.wilson_a.rate()
    }
}

/// Compare two runs.
///
/// The paired test only sees sample ids present in both runs (first
/// occurrence wins, in run A's order). The intervals are never restricted
/// to that intersection.
pub fn compare_runs(
    a: &RunPassVector,
    b: &RunPassVector,
    confidence: f64,
) -> Result<ComparisonReport, StatsError> {
    let wilson_a = a.wilson(confidence)?;
    let wilson_b = b.wilson(confidence)?;

    let b_outcomes = b.first_occurrences();
    let mut seen = HashSet::with_capacity(a.outcomes.len());
    let mut paired_a = Vec::new();
    let mut paired_b = Vec::new();
    for (id, passed) in &a.outcomes {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if let Some(&other) = b_outcomes.get(id.as_str()) {
            paired_a.push(*passed);
            paired_b.push(other);
        }
    }

    let mcnemar = mcnemar_test(&paired_a, &paired_b)?;

    tracing::debug!(
        run_a = %a.run_id,
        run_b = %b.run_id,
        common = paired_a.len(),
        p_value = mcnemar.p_value,
        "Compared runs"
    );

    Ok(ComparisonReport {
        run_a: a.run_id.clone(),
        run_b: b.run_id.clone(),
        wilson_a,
        wilson_b,
        mcnemar,
        common_sample_count: paired_a.len(),
        evaluated_at: Utc::now(),
    })
}
