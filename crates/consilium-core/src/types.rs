//! Shared result types for judge scoring and ensemble aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::judge::JudgeOutput;

/// Why a single dispatched unit produced no usable result.
///
/// All three kinds are isolated to the unit that produced them and are
/// treated identically by aggregation: the unit contributes no score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network/API failure from one backend
    BackendError,

    /// Judge output could not be turned into a score
    ParseError,

    /// Unit exceeded its allotted time (or was cancelled)
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::BackendError => write!(f, "backend_error"),
            FailureKind::ParseError => write!(f, "parse_error"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Error attached to a judge score that contributes no numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeError {
    pub kind: FailureKind,
    pub detail: String,
}

impl JudgeError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for JudgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// One judge backend's score for a single response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeScore {
    /// Judge backend that produced the score
    pub backend_id: String,

    /// Rubric-weighted score in [0, 1] (0.0 when `error` is set)
    pub weighted_score: f64,

    /// Whether `weighted_score` met the pass threshold
    pub passed: bool,

    /// Parsed judge output, when parsing succeeded
    pub raw: Option<JudgeOutput>,

    /// Set when the judge failed, timed out, or produced malformed output
    pub error: Option<JudgeError>,
}

impl JudgeScore {
    /// A successfully parsed score.
    pub fn scored(
        backend_id: impl Into<String>,
        weighted_score: f64,
        pass_threshold: f64,
        raw: JudgeOutput,
    ) -> Self {
        let weighted_score = weighted_score.clamp(0.0, 1.0);
        Self {
            backend_id: backend_id.into(),
            weighted_score,
            passed: weighted_score >= pass_threshold,
            raw: Some(raw),
            error: None,
        }
    }

    /// A score that carries only an error.
    pub fn failed(backend_id: impl Into<String>, error: JudgeError) -> Self {
        Self {
            backend_id: backend_id.into(),
            weighted_score: 0.0,
            passed: false,
            raw: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Policy for combining several judges' scores into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregationMethod {
    /// Median of scores (mean of the two middle values for even counts)
    #[default]
    Median,

    /// Arithmetic mean of scores
    Mean,

    /// 1.0 if more than half the scores pass, else 0.0
    Majority,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::Median => "median",
            AggregationMethod::Mean => "mean",
            AggregationMethod::Majority => "majority",
        }
    }

    /// Parse a policy name, falling back to `Median` for anything unknown.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "mean" | "average" => AggregationMethod::Mean,
            "majority" | "vote" => AggregationMethod::Majority,
            "median" => AggregationMethod::Median,
            other => {
                tracing::warn!(method = other, "Unknown aggregation method, using median");
                AggregationMethod::Median
            }
        }
    }
}

impl FromStr for AggregationMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl From<String> for AggregationMethod {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl From<AggregationMethod> for String {
    fn from(value: AggregationMethod) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined verdict of an ensemble of judges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    /// Aggregated score in [0, 1]
    pub weighted_score: f64,

    /// `weighted_score >= pass_threshold`
    pub passed: bool,

    /// One entry per dispatched judge, in judge order, failures included
    pub individual_scores: Vec<JudgeScore>,

    /// `1 - min(max - min, 1)` over non-error scores
    pub agreement: f64,

    /// Sample standard deviation of non-error scores (0 with fewer than 2)
    pub score_stdev: f64,

    /// `score_stdev > variance_threshold`
    pub high_variance: bool,

    /// Set when the verdict should be checked by a person
    pub needs_human_review: bool,

    pub aggregation_method: AggregationMethod,

    pub evaluated_at: DateTime<Utc>,
}

impl EnsembleResult {
    /// Non-error scores, in judge order.
    pub fn valid_scores(&self) -> impl Iterator<Item = &JudgeScore> {
        self.individual_scores.iter().filter(|s| !s.is_error())
    }

    /// Number of judges that failed to produce a score.
    pub fn error_count(&self) -> usize {
        self.individual_scores.iter().filter(|s| s.is_error()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_method_fallback() {
        assert_eq!(AggregationMethod::from_name("mean"), AggregationMethod::Mean);
        assert_eq!(
            AggregationMethod::from_name(" MAJORITY "),
            AggregationMethod::Majority
        );
        assert_eq!(
            AggregationMethod::from_name("trimmed_mean"),
            AggregationMethod::Median
        );
        assert_eq!(
            "geometric".parse::<AggregationMethod>().unwrap(),
            AggregationMethod::Median
        );
    }

    #[test]
    fn test_aggregation_method_serde() {
        let method: AggregationMethod = serde_json::from_str("\"mean\"").unwrap();
        assert_eq!(method, AggregationMethod::Mean);

        let unknown: AggregationMethod = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(unknown, AggregationMethod::Median);

        assert_eq!(
            serde_json::to_string(&AggregationMethod::Majority).unwrap(),
            "\"majority\""
        );
    }

    #[test]
    fn test_failed_score_contributes_nothing() {
        let score = JudgeScore::failed(
            "openai/gpt-4o",
            JudgeError::new(FailureKind::Timeout, "after 30s"),
        );
        assert!(score.is_error());
        assert_eq!(score.weighted_score, 0.0);
        assert!(!score.passed);
        assert_eq!(
            score.error.unwrap().to_string(),
            "timeout: after 30s"
        );
    }
}
