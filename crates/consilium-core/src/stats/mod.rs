//! Run comparison statistics.
//!
//! Pure functions over already-materialized results: a Wilson interval for
//! one run's pass rate and McNemar's exact test for whether two runs differ
//! on the same samples.

mod interval;
mod mcnemar;
mod runs;

use thiserror::Error;

pub use interval::{wilson_interval, z_critical, WilsonInterval, DEFAULT_CONFIDENCE};
pub use mcnemar::{mcnemar_test, McNemarResult, SIGNIFICANCE_LEVEL};
pub use runs::{compare_runs, ComparisonReport, Episode, RunPassVector};

/// Caller contract violations in the statistics functions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Paired vectors differ in length: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Confidence level must lie strictly between 0 and 1, got {0}")]
    InvalidConfidence(f64),

    #[error("Passed count {passed} exceeds total {total}")]
    PassedExceedsTotal { passed: usize, total: usize },

    #[error("Distribution error: {0}")]
    Distribution(String),
}
