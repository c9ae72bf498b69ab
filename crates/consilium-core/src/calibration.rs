//! Calibration summary over many ensemble results.
//!
//! Used to watch for judge drift over time: how often ensembles disagree,
//! how often they need a person, and how each judge backend behaves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::EnsembleResult;

/// Per-judge-backend counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendCalibration {
    /// Non-error scores produced
    pub scored: usize,

    /// Non-error scores that passed
    pub passed: usize,

    /// Scores tagged with an error
    pub errors: usize,

    /// `passed / scored` (0.0 when nothing was scored)
    pub pass_rate: f64,
}

/// Aggregate view of a list of ensemble results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub total_results: usize,
    pub mean_score: f64,
    pub mean_agreement: f64,
    pub high_variance_rate: f64,
    pub human_review_rate: f64,
    pub per_backend: BTreeMap<String, BackendCalibration>,
}

impl CalibrationSummary {
    /// Reduce a list of results. An empty list yields an all-zero summary.
    pub fn from_results(results: &[EnsembleResult]) -> Self {
        let total = results.len();
        if total == 0 {
            return Self::default();
        }

        let mut per_backend: BTreeMap<String, BackendCalibration> = BTreeMap::new();
        for result in results {
            for score in &result.individual_scores {
                let entry = per_backend.entry(score.backend_id.clone()).or_default();
                if score.is_error() {
                    entry.errors += 1;
                } else {
                    entry.scored += 1;
                    if score.passed {
                        entry.passed += 1;
                    }
                }
            }
        }
        for entry in per_backend.values_mut() {
            entry.pass_rate = if entry.scored > 0 {
                entry.passed as f64 / entry.scored as f64
            } else {
                0.0
            };
        }

        let n = total as f64;
        Self {
            total_results: total,
            mean_score: results.iter().map(|r| r.weighted_score).sum::<f64>() / n,
            mean_agreement: results.iter().map(|r| r.agreement).sum::<f64>() / n,
            high_variance_rate: results.iter().filter(|r| r.high_variance).count() as f64 / n,
            human_review_rate: results.iter().filter(|r| r.needs_human_review).count() as f64 / n,
            per_backend,
        }
    }
}
