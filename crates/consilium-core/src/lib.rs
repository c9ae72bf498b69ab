//! # consilium-core
//!
//! Deterministic half of the Consilium judge ensemble.
//!
//! This crate turns what LLM judges said into decisions, answering:
//! - What score does the ensemble give this response?
//! - Do the judges agree, or does a person need to look?
//! - Which of two responses is better?
//! - Did run B really do better than run A?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same judge outputs always produce the same verdict
//! 2. **No I/O**: Dispatching to judges lives in `consilium-runtime`
//! 3. **Total**: Malformed judge output becomes a tagged score, never a panic
//! 4. **Order-preserving**: Every dispatched judge is accounted for in order
//!
//! ## Example
//!
//! ```rust,ignore
//! use consilium_core::{
//!     score_judge_response, AggregationMethod, Criterion, EnsembleSynthesizer, Rubric,
//! };
//!
//! let rubric = Rubric::new("helpfulness")
//!     .criterion(Criterion::new("accuracy", "Facts are correct").with_weight(2.0))
//!     .criterion(Criterion::new("clarity", "Easy to follow"));
//!
//! let scores = judge_texts
//!     .iter()
//!     .map(|(backend, text)| score_judge_response(backend, text, &rubric, 0.7))
//!     .collect();
//!
//! let result = EnsembleSynthesizer::new(AggregationMethod::Median, 0.7, 0.2).synthesize(scores);
//! if result.needs_human_review {
//!     println!("REVIEW: agreement {:.2}", result.agreement);
//! }
//! ```

pub mod calibration;
pub mod judge;
pub mod pairwise;
pub mod rubric;
pub mod stats;
pub mod synthesizer;
pub mod types;

// Re-export main types at crate root
pub use calibration::{BackendCalibration, CalibrationSummary};
pub use judge::{
    extract_json_object, parse_judge_output, score_judge_response, validate_output,
    CriterionScore, ExtractionStrategy, JudgeOutput, JudgeParseError, OutputSchema,
};
pub use pairwise::{
    parse_pairwise_output, CriterionJudgement, CriterionVerdict, PairLabels, PairwiseChoice,
    PairwiseJudgement, PairwiseVerdict,
};
pub use rubric::{Criterion, Rubric, ScoreScale};
pub use stats::{
    compare_runs, mcnemar_test, wilson_interval, ComparisonReport, Episode, McNemarResult,
    RunPassVector, StatsError, WilsonInterval, DEFAULT_CONFIDENCE,
};
pub use synthesizer::EnsembleSynthesizer;
pub use types::{AggregationMethod, EnsembleResult, FailureKind, JudgeError, JudgeScore};
