//! Wilson score interval.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use super::StatsError;

pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Confidence interval for a pass rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WilsonInterval {
    pub passed: usize,
    pub total: usize,
    pub confidence: f64,
    pub lower: f64,
    pub upper: f64,
}

impl WilsonInterval {
    /// Observed pass rate (0.0 for an empty run).
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Wilson score interval for `passed` successes out of `total`.
///
/// An empty run is maximally uncertain: `(0.0, 1.0)`.
pub fn wilson_interval(
    passed: usize,
    total: usize,
    confidence: f64,
) -> Result<WilsonInterval, StatsError> {
    let z = z_critical(confidence)?;
    if passed > total {
        return Err(StatsError::PassedExceedsTotal { passed, total });
    }

    if total == 0 {
        return Ok(WilsonInterval {
            passed,
            total,
            confidence,
            lower: 0.0,
            upper: 1.0,
        });
    }

    let n = total as f64;
    let p = passed as f64 / n;
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let margin = z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt() / denom;

    Ok(WilsonInterval {
        passed,
        total,
        confidence,
        lower: (center - margin).clamp(0.0, 1.0),
        upper: (center + margin).clamp(0.0, 1.0),
    })
}

/// Two-sided standard normal critical value for `confidence`.
///
/// `z_critical(0.95)` is about 1.96.
pub fn z_critical(confidence: f64) -> Result<f64, StatsError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(StatsError::InvalidConfidence(confidence));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| StatsError::Distribution(e.to_string()))?;
    Ok(normal.inverse_cdf(1.0 - (1.0 - confidence) / 2.0))
}
