//! Scoring rubrics supplied by the caller.
//!
//! Rubrics are plain data. Loading them from disk is the caller's concern;
//! this module only defines the shape and the normalization rules used to
//! turn per-criterion judge scores into one weighted score.

use serde::{Deserialize, Serialize};

/// Range of raw scores a judge is asked to use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self { min: 1.0, max: 5.0 }
    }
}

impl ScoreScale {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Map a raw score onto [0, 1], clamping out-of-scale values.
    pub fn normalize(&self, raw: f64) -> f64 {
        let span = self.max - self.min;
        if span <= 0.0 || !span.is_finite() {
            return if raw >= self.max { 1.0 } else { 0.0 };
        }
        ((raw - self.min) / span).clamp(0.0, 1.0)
    }
}

/// A single rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Key the judge must use in its `scores` object
    pub name: String,

    /// What the judge should look for
    #[serde(default)]
    pub description: String,

    /// Relative weight in the final score
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Criterion {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// A named set of weighted criteria on a shared scale.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Rubric {
    pub name: String,

    #[serde(default)]
    pub criteria: Vec<Criterion>,

    #[serde(default)]
    pub scale: ScoreScale,
}

impl Rubric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn with_scale(mut self, scale: ScoreScale) -> Self {
        self.scale = scale;
        self
    }

    /// Look up a criterion by name (case-insensitive).
    pub fn find(&self, name: &str) -> Option<&Criterion> {
        self.criteria
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}
