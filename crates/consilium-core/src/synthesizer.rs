//! Synthesizer: combines individual judge scores into one ensemble verdict.
//!
//! The synthesizer is the deterministic fan-in step. It applies:
//! 1. Zero usable scores → score 0.0, failed, flagged for review
//! 2. Aggregate the usable scores with the configured method
//! 3. Agreement = `1 - min(max - min, 1)` (range-based)
//! 4. High variance = sample stdev above the variance threshold
//! 5. Review when variance is high, or when the score is borderline and the
//!    judges disagree
//!
//! Agreement folds all disagreement into the max-min range. With more than
//! three judges one outlier and two opposing outliers look the same; the
//! definition is kept as-is for comparability with existing results.

use chrono::Utc;

use crate::types::{AggregationMethod, EnsembleResult, JudgeScore};

/// Distance from the pass threshold that counts as borderline.
pub const BORDERLINE_MARGIN: f64 = 0.1;

/// Score range above which borderline verdicts need review.
pub const DISAGREEMENT_RANGE: f64 = 0.2;

/// Fraction of passing judges a majority verdict must exceed.
pub const MAJORITY_FRACTION: f64 = 0.5;

/// Aggregation policy and thresholds for one ensemble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleSynthesizer {
    pub method: AggregationMethod,
    pub pass_threshold: f64,
    pub variance_threshold: f64,
}

impl EnsembleSynthesizer {
    pub fn new(method: AggregationMethod, pass_threshold: f64, variance_threshold: f64) -> Self {
        Self {
            method,
            pass_threshold,
            variance_threshold,
        }
    }

    /// Synthesize judge scores into an ensemble result.
    ///
    /// `individual_scores` is kept verbatim (failures included) so the
    /// result accounts for every dispatched judge.
    pub fn synthesize(&self, individual_scores: Vec<JudgeScore>) -> EnsembleResult {
        let scores: Vec<f64> = individual_scores
            .iter()
            .filter(|s| !s.is_error())
            .map(|s| s.weighted_score)
            .collect();

        if scores.is_empty() {
            tracing::warn!(
                judges = individual_scores.len(),
                "No judge produced a usable score"
            );
            return EnsembleResult {
                weighted_score: 0.0,
                passed: false,
                individual_scores,
                agreement: 0.0,
                score_stdev: 0.0,
                high_variance: false,
                needs_human_review: true,
                aggregation_method: self.method,
                evaluated_at: Utc::now(),
            };
        }

        let final_score = self.aggregate(&scores);
        let range = score_range(&scores);
        let agreement = agreement(&scores);
        let score_stdev = sample_stdev(&scores);
        let high_variance = score_stdev > self.variance_threshold;

        let borderline = (final_score - self.pass_threshold).abs() < BORDERLINE_MARGIN;
        let needs_human_review = high_variance || (borderline && range > DISAGREEMENT_RANGE);

        if needs_human_review {
            tracing::info!(
                score = final_score,
                agreement,
                stdev = score_stdev,
                high_variance,
                "Ensemble flagged for human review"
            );
        }

        EnsembleResult {
            weighted_score: final_score,
            passed: final_score >= self.pass_threshold,
            individual_scores,
            agreement,
            score_stdev,
            high_variance,
            needs_human_review,
            aggregation_method: self.method,
            evaluated_at: Utc::now(),
        }
    }

    /// Apply the aggregation method to non-empty scores.
    fn aggregate(&self, scores: &[f64]) -> f64 {
        match self.method {
            AggregationMethod::Median => median(scores),
            AggregationMethod::Mean => mean(scores),
            AggregationMethod::Majority => {
                let passing = scores.iter().filter(|s| **s >= self.pass_threshold).count();
                let fraction = passing as f64 / scores.len() as f64;
                if fraction > MAJORITY_FRACTION {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Median; mean of the two middle values for even counts. 0.0 when empty.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Arithmetic mean. 0.0 when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample (n-1) standard deviation. 0.0 with fewer than two values.
pub fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// `max - min`. 0.0 with fewer than two values.
pub fn score_range(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    max - min
}

/// `1 - min(range, 1)`; a single score has range 0 and agreement 1.0.
pub fn agreement(values: &[f64]) -> f64 {
    1.0 - score_range(values).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgeOutput;
    use crate::types::{FailureKind, JudgeError};
    use std::collections::BTreeMap;

    fn score(id: &str, value: f64) -> JudgeScore {
        let raw = JudgeOutput {
            scores: BTreeMap::new(),
            overall_assessment: None,
            confidence: None,
        };
        JudgeScore::scored(id, value, 0.7, raw)
    }

    fn failed(id: &str) -> JudgeScore {
        JudgeScore::failed(id, JudgeError::new(FailureKind::BackendError, "503"))
    }

    fn synth(method: AggregationMethod) -> EnsembleSynthesizer {
        EnsembleSynthesizer::new(method, 0.7, 0.2)
    }

    #[test]
    fn test_unanimous_median() {
        let result = synth(AggregationMethod::Median)
            .synthesize(vec![score("a", 0.9), score("b", 0.9), score("c", 0.9)]);
        assert!((result.weighted_score - 0.9).abs() < 1e-12);
        assert!(result.passed);
        assert!(!result.high_variance);
        assert!(!result.needs_human_review);
        assert_eq!(result.agreement, 1.0);
    }

    #[test]
    fn test_all_failed_forces_review() {
        let result = synth(AggregationMethod::Mean).synthesize(vec![failed("a"), failed("b")]);
        assert_eq!(result.weighted_score, 0.0);
        assert!(!result.passed);
        assert!(result.needs_human_review);
        assert_eq!(result.individual_scores.len(), 2);
        assert_eq!(result.error_count(), 2);
    }

    #[test]
    fn test_failures_kept_but_ignored() {
        let result = synth(AggregationMethod::Mean).synthesize(vec![
            score("a", 0.8),
            failed("b"),
            score("c", 0.6),
        ]);
        assert!((result.weighted_score - 0.7).abs() < 1e-12);
        assert_eq!(result.individual_scores.len(), 3);
        assert_eq!(result.individual_scores[1].backend_id, "b");
        assert_eq!(result.valid_scores().count(), 2);
    }

    #[test]
    fn test_even_median() {
        assert_eq!(median(&[0.2, 0.8, 0.4, 0.6]), 0.5);
        assert_eq!(median(&[0.3]), 0.3);
    }

    #[test]
    fn test_majority_policy() {
        let result = synth(AggregationMethod::Majority)
            .synthesize(vec![score("a", 0.75), score("b", 0.71), score("c", 0.1)]);
        assert_eq!(result.weighted_score, 1.0);
        assert!(result.passed);

        let split = synth(AggregationMethod::Majority)
            .synthesize(vec![score("a", 0.9), score("b", 0.1)]);
        assert_eq!(split.weighted_score, 0.0);
        assert!(!split.passed);
    }

    #[test]
    fn test_single_score_agreement() {
        let result = synth(AggregationMethod::Median).synthesize(vec![score("a", 0.4)]);
        assert_eq!(result.agreement, 1.0);
        assert_eq!(result.score_stdev, 0.0);
        assert!(!result.high_variance);
    }

    #[test]
    fn test_high_variance_flags_review() {
        let result = synth(AggregationMethod::Median)
            .synthesize(vec![score("a", 0.1), score("b", 0.5), score("c", 0.95)]);
        assert!(result.high_variance);
        assert!(result.needs_human_review);
        assert!((result.agreement - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_borderline_disagreement_flags_review() {
        // stdev ~0.18 stays under 0.2, but the mean sits next to the threshold
        // and the judges are 0.25 apart.
        let synth = EnsembleSynthesizer::new(AggregationMethod::Mean, 0.7, 0.2);
        let result = synth.synthesize(vec![score("a", 0.58), score("b", 0.83)]);
        assert!(!result.high_variance);
        assert!(result.needs_human_review);
        assert!(result.passed);
    }

    #[test]
    fn test_borderline_with_agreement_no_review() {
        let result = synth(AggregationMethod::Median)
            .synthesize(vec![score("a", 0.68), score("b", 0.72)]);
        assert!(!result.needs_human_review);
    }

    #[test]
    fn test_stdev_is_sample() {
        let sd = sample_stdev(&[0.0, 1.0]);
        assert!((sd - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }
}
