//! McNemar's paired test, exact binomial form.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, DiscreteCDF};

use super::StatsError;

/// p-values below this are significant.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Outcome of a paired comparison between runs A and B.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McNemarResult {
    pub p_value: f64,
    pub significant: bool,

    /// A passed, B failed
    pub a_only_count: usize,

    /// A failed, B passed
    pub b_only_count: usize,

    pub both_pass_count: usize,
    pub both_fail_count: usize,
}

impl McNemarResult {
    pub fn discordant(&self) -> usize {
        self.a_only_count + self.b_only_count
    }
}

/// Test whether two paired pass vectors differ.
///
/// Index `i` of both vectors must refer to the same sample. With no
/// discordant pairs there is no evidence of a difference and `p = 1.0`.
pub fn mcnemar_test(a: &[bool], b: &[bool]) -> Result<McNemarResult, StatsError> {
    if a.len() != b.len() {
        return Err(StatsError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut result = McNemarResult {
        p_value: 1.0,
        significant: false,
        a_only_count: 0,
        b_only_count: 0,
        both_pass_count: 0,
        both_fail_count: 0,
    };
    for (&pa, &pb) in a.iter().zip(b) {
        match (pa, pb) {
            (true, true) => result.both_pass_count += 1,
            (true, false) => result.a_only_count += 1,
            (false, true) => result.b_only_count += 1,
            (false, false) => result.both_fail_count += 1,
        }
    }

    let n = result.discordant();
    if n == 0 {
        return Ok(result);
    }

    let k = result.a_only_count.min(result.b_only_count);
    let binomial =
        Binomial::new(0.5, n as u64).map_err(|e| StatsError::Distribution(e.to_string()))?;
    result.p_value = (2.0 * binomial.cdf(k as u64)).min(1.0);
    result.significant = result.p_value < SIGNIFICANCE_LEVEL;
    Ok(result)
}
