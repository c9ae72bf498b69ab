//! Pairwise (A/B) verdicts and position-swap mapping.
//!
//! Judges favour whichever response they see first, so the runtime may
//! present the caller's two responses in swapped order. Everything a judge
//! says is in the *presented* A/B space; everything this module returns
//! is in the *caller's* space, where `A` is always response one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::judge::{extract_json_object, validate_output, JudgeParseError, OutputSchema};

/// One side of a comparison, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairwiseChoice {
    A,
    B,
    Tie,
}

impl PairwiseChoice {
    /// Map through a position swap. Applying it twice is the identity.
    pub fn unswap(self, swapped: bool) -> Self {
        match (self, swapped) {
            (PairwiseChoice::A, true) => PairwiseChoice::B,
            (PairwiseChoice::B, true) => PairwiseChoice::A,
            (choice, _) => choice,
        }
    }

    /// Parse a judge's winner field.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.')
            .to_ascii_lowercase();
        let stripped = normalized
            .trim_start_matches("response")
            .trim_start_matches("output")
            .trim_start_matches(['_', ' ', '-'])
            .trim();

        match stripped {
            "a" | "1" | "first" => Some(PairwiseChoice::A),
            "b" | "2" | "second" => Some(PairwiseChoice::B),
            "tie" | "draw" | "equal" | "none" | "neither" | "both" => Some(PairwiseChoice::Tie),
            _ => None,
        }
    }
}

/// Caller-supplied names for response one and response two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLabels {
    pub one: String,
    pub two: String,
}

impl PairLabels {
    pub fn new(one: impl Into<String>, two: impl Into<String>) -> Self {
        Self {
            one: one.into(),
            two: two.into(),
        }
    }

    /// Caller label for a caller-space choice (`"tie"` for ties).
    pub fn label_for(&self, choice: PairwiseChoice) -> String {
        match choice {
            PairwiseChoice::A => self.one.clone(),
            PairwiseChoice::B => self.two.clone(),
            PairwiseChoice::Tie => "tie".to_string(),
        }
    }
}

/// A judge's call on a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionJudgement {
    pub winner: PairwiseChoice,
    pub reasoning: Option<String>,
}

/// One judge's parsed pairwise output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseJudgement {
    pub winner: PairwiseChoice,
    pub criteria: BTreeMap<String, CriterionJudgement>,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
}

impl PairwiseJudgement {
    /// Map from presented space into caller space.
    ///
    /// The overall winner and every criterion are mapped independently.
    pub fn unswap(mut self, swapped: bool) -> Self {
        self.winner = self.winner.unswap(swapped);
        for criterion in self.criteria.values_mut() {
            criterion.winner = criterion.winner.unswap(swapped);
        }
        self
    }
}

#[derive(Deserialize)]
struct PairwiseOutputRepr {
    winner: String,
    #[serde(default)]
    criteria: BTreeMap<String, CriterionRepr>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CriterionRepr {
    Bare(String),
    Detailed {
        winner: String,
        #[serde(default)]
        reasoning: Option<String>,
    },
}

/// Parse a pairwise judge's free-form text (presented space).
///
/// An unrecognizable overall winner is a parse error; an unrecognizable
/// criterion winner only drops that criterion.
pub fn parse_pairwise_output(text: &str) -> Result<PairwiseJudgement, JudgeParseError> {
    let (value, _) = extract_json_object(text).ok_or(JudgeParseError::NoJson)?;
    validate_output(OutputSchema::Pairwise, &value).map_err(JudgeParseError::Schema)?;

    let repr: PairwiseOutputRepr = serde_json::from_value(value)?;
    let winner = PairwiseChoice::parse(&repr.winner)
        .ok_or_else(|| JudgeParseError::UnrecognizedWinner(repr.winner.clone()))?;

    let mut criteria = BTreeMap::new();
    for (name, raw) in repr.criteria {
        let (raw_winner, reasoning) = match raw {
            CriterionRepr::Bare(w) => (w, None),
            CriterionRepr::Detailed { winner, reasoning } => (winner, reasoning),
        };
        match PairwiseChoice::parse(&raw_winner) {
            Some(choice) => {
                criteria.insert(
                    name,
                    CriterionJudgement {
                        winner: choice,
                        reasoning,
                    },
                );
            }
            None => {
                tracing::debug!(criterion = %name, winner = %raw_winner, "Dropping unparseable criterion");
            }
        }
    }

    Ok(PairwiseJudgement {
        winner,
        criteria,
        confidence: repr.confidence.map(|c| c.clamp(0.0, 1.0)),
        reasoning: repr.reasoning,
    })
}

/// Per-criterion verdict in caller space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub winner: PairwiseChoice,
    pub winner_label: String,
    pub reasoning: Option<String>,
}

/// Final verdict of a pairwise comparison, in caller space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseVerdict {
    /// `A` = response one, `B` = response two
    pub winner: PairwiseChoice,

    /// The caller's label for the winner, or `"tie"`
    pub winner_label: String,

    pub per_criterion: BTreeMap<String, CriterionVerdict>,

    /// Vote share of the winner times mean reported confidence
    pub confidence: f64,

    /// Whether responses were shown to judges in swapped order
    pub order_swapped: bool,

    /// No judge produced a parseable verdict; `winner` is a placeholder tie
    pub parse_error: bool,

    /// Judges dispatched
    pub judge_count: usize,

    /// Judges whose output parsed
    pub parsed_count: usize,
}

impl PairwiseVerdict {
    /// Verdict when nothing could be judged.
    pub fn unparsed(labels: &PairLabels, order_swapped: bool, judge_count: usize) -> Self {
        Self {
            winner: PairwiseChoice::Tie,
            winner_label: labels.label_for(PairwiseChoice::Tie),
            per_criterion: BTreeMap::new(),
            confidence: 0.0,
            order_swapped,
            parse_error: true,
            judge_count,
            parsed_count: 0,
        }
    }

    /// Combine caller-space judgements by majority vote.
    ///
    /// A choice wins only with a strict plurality; anything else is a tie.
    /// Judges that report no confidence count as fully confident.
    pub fn from_judgements(
        judgements: &[PairwiseJudgement],
        labels: &PairLabels,
        order_swapped: bool,
        judge_count: usize,
    ) -> Self {
        if judgements.is_empty() {
            return Self::unparsed(labels, order_swapped, judge_count);
        }

        let winner = plurality(judgements.iter().map(|j| j.winner));
        let votes = judgements.iter().filter(|j| j.winner == winner).count();
        let mean_confidence = judgements
            .iter()
            .filter(|j| j.winner == winner)
            .map(|j| j.confidence.unwrap_or(1.0))
            .sum::<f64>()
            / votes.max(1) as f64;
        let confidence = if votes == 0 {
            0.0
        } else {
            (votes as f64 / judgements.len() as f64) * mean_confidence
        };

        let mut names: Vec<&String> = judgements.iter().flat_map(|j| j.criteria.keys()).collect();
        names.sort();
        names.dedup();

        let per_criterion = names
            .into_iter()
            .map(|name| {
                let calls: Vec<&CriterionJudgement> =
                    judgements.iter().filter_map(|j| j.criteria.get(name)).collect();
                let choice = plurality(calls.iter().map(|c| c.winner));
                let reasoning = calls
                    .iter()
                    .find(|c| c.winner == choice)
                    .and_then(|c| c.reasoning.clone());
                (
                    name.clone(),
                    CriterionVerdict {
                        winner: choice,
                        winner_label: labels.label_for(choice),
                        reasoning,
                    },
                )
            })
            .collect();

        Self {
            winner,
            winner_label: labels.label_for(winner),
            per_criterion,
            confidence,
            order_swapped,
            parse_error: false,
            judge_count,
            parsed_count: judgements.len(),
        }
    }
}

fn plurality(choices: impl Iterator<Item = PairwiseChoice>) -> PairwiseChoice {
    let (mut a, mut b, mut tie) = (0usize, 0usize, 0usize);
    for choice in choices {
        match choice {
            PairwiseChoice::A => a += 1,
            PairwiseChoice::B => b += 1,
            PairwiseChoice::Tie => tie += 1,
        }
    }
    if a > b && a > tie {
        PairwiseChoice::A
    } else if b > a && b > tie {
        PairwiseChoice::B
    } else {
        PairwiseChoice::Tie
    }
}
