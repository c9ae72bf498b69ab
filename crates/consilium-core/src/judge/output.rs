//! Judge score output: parsing and rubric weighting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::extract::extract_json_object;
use super::schema::{validate_output, OutputSchema};
use crate::rubric::Rubric;
use crate::types::{FailureKind, JudgeError, JudgeScore};

/// Errors turning judge text into a score.
#[derive(Error, Debug)]
pub enum JudgeParseError {
    #[error("No JSON object found in judge output")]
    NoJson,

    #[error("Judge output failed schema validation: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Failed to decode judge output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Judge output scored none of the rubric criteria")]
    NoUsableCriteria,

    #[error("Unrecognized pairwise winner '{0}'")]
    UnrecognizedWinner(String),
}

/// Score a judge gave for one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CriterionScoreRepr")]
pub struct CriterionScore {
    pub score: f64,
    pub justification: Option<String>,
}

/// Judges emit either `"criterion": 4` or `"criterion": {"score": 4, ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CriterionScoreRepr {
    Bare(f64),
    Detailed {
        score: f64,
        #[serde(default)]
        justification: Option<String>,
    },
}

impl From<CriterionScoreRepr> for CriterionScore {
    fn from(repr: CriterionScoreRepr) -> Self {
        match repr {
            CriterionScoreRepr::Bare(score) => Self {
                score,
                justification: None,
            },
            CriterionScoreRepr::Detailed {
                score,
                justification,
            } => Self {
                score,
                justification,
            },
        }
    }
}

/// Structured output of a scoring judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeOutput {
    pub scores: BTreeMap<String, CriterionScore>,

    #[serde(default)]
    pub overall_assessment: Option<String>,

    #[serde(default)]
    pub confidence: Option<f64>,
}

impl JudgeOutput {
    /// Rubric-weighted score in [0, 1].
    ///
    /// Only rubric criteria present in the output count. A rubric with no
    /// criteria weights every scored criterion equally.
    pub fn weighted_score(&self, rubric: &Rubric) -> Result<f64, JudgeParseError> {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        if rubric.criteria.is_empty() {
            for score in self.scores.values() {
                weighted_sum += rubric.scale.normalize(score.score);
                total_weight += 1.0;
            }
        } else {
            for criterion in &rubric.criteria {
                if criterion.weight <= 0.0 {
                    continue;
                }
                let found = self
                    .scores
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&criterion.name));
                if let Some((_, score)) = found {
                    weighted_sum += criterion.weight * rubric.scale.normalize(score.score);
                    total_weight += criterion.weight;
                }
            }
        }

        if total_weight <= 0.0 {
            return Err(JudgeParseError::NoUsableCriteria);
        }

        Ok((weighted_sum / total_weight).clamp(0.0, 1.0))
    }
}

/// Parse free-form judge text into a [`JudgeOutput`].
pub fn parse_judge_output(text: &str) -> Result<JudgeOutput, JudgeParseError> {
    let (value, strategy) = extract_json_object(text).ok_or(JudgeParseError::NoJson)?;
    tracing::trace!(strategy = ?strategy, "Extracted judge JSON");

    validate_output(OutputSchema::Score, &value).map_err(JudgeParseError::Schema)?;

    Ok(serde_json::from_value(value)?)
}

/// Turn one judge's raw text into a [`JudgeScore`].
///
/// Malformed output never errors: it becomes a score tagged `ParseError`
/// that contributes nothing to aggregation.
pub fn score_judge_response(
    backend_id: &str,
    text: &str,
    rubric: &Rubric,
    pass_threshold: f64,
) -> JudgeScore {
    let parsed = parse_judge_output(text)
        .and_then(|output| output.weighted_score(rubric).map(|score| (output, score)));

    match parsed {
        Ok((output, score)) => JudgeScore::scored(backend_id, score, pass_threshold, output),
        Err(e) => {
            tracing::warn!(backend = backend_id, error = %e, "Judge output could not be scored");
            JudgeScore::failed(
                backend_id,
                JudgeError::new(FailureKind::ParseError, e.to_string()),
            )
        }
    }
}
