//! Judge output handling.
//!
//! Judges answer in free text that should contain a JSON object. This
//! module extracts that object, validates it against a JSON Schema and
//! converts it into scores. Anything that cannot be converted is reported
//! as a parse failure, never a panic.

mod extract;
mod output;
mod schema;

pub use extract::{extract_json_object, ExtractionStrategy};
pub use output::{
    parse_judge_output, score_judge_response, CriterionScore, JudgeOutput, JudgeParseError,
};
pub use schema::{validate_output, OutputSchema};
