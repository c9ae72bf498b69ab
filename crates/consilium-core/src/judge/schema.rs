//! JSON Schema validation for judge output.
//!
//! Extracted judge JSON is validated against the schemas in `schema/`
//! before it is deserialized, so a structurally wrong object is reported
//! with a precise location instead of a generic serde error.

use std::sync::OnceLock;

const JUDGE_OUTPUT_SCHEMA_JSON: &str = include_str!("../../schema/judge_output.schema.json");
const PAIRWISE_OUTPUT_SCHEMA_JSON: &str =
    include_str!("../../schema/pairwise_output.schema.json");

static JUDGE_OUTPUT_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
static PAIRWISE_OUTPUT_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Which judge output shape to validate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    /// Rubric scoring output (`scores`, `overall_assessment`, `confidence`)
    Score,
    /// Pairwise comparison output (`winner`, `criteria`, `confidence`)
    Pairwise,
}

impl OutputSchema {
    fn source(&self) -> &'static str {
        match self {
            OutputSchema::Score => JUDGE_OUTPUT_SCHEMA_JSON,
            OutputSchema::Pairwise => PAIRWISE_OUTPUT_SCHEMA_JSON,
        }
    }

    fn cell(&self) -> &'static OnceLock<Result<jsonschema::Validator, String>> {
        match self {
            OutputSchema::Score => &JUDGE_OUTPUT_SCHEMA,
            OutputSchema::Pairwise => &PAIRWISE_OUTPUT_SCHEMA,
        }
    }

    fn validator(&self) -> Result<&'static jsonschema::Validator, String> {
        let source = self.source();
        let result = self.cell().get_or_init(|| {
            let schema_value: serde_json::Value = serde_json::from_str(source)
                .map_err(|e| format!("Invalid schema JSON: {}", e))?;

            jsonschema::options()
                .build(&schema_value)
                .map_err(|e| format!("Failed to compile schema: {}", e))
        });

        result.as_ref().map_err(|e| e.clone())
    }
}

/// Validate a judge output value against the given schema.
///
/// Returns the list of violations (`"<message> at <path>"`) on failure.
pub fn validate_output(
    schema: OutputSchema,
    value: &serde_json::Value,
) -> Result<(), Vec<String>> {
    let validator = schema.validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schemas_compile() {
        assert!(OutputSchema::Score.validator().is_ok());
        assert!(OutputSchema::Pairwise.validator().is_ok());
    }

    #[test]
    fn test_valid_score_output() {
        let value = json!({
            "scores": {
                "accuracy": {"score": 4, "justification": "mostly right"},
                "tone": 5
            },
            "overall_assessment": "good",
            "confidence": 0.8
        });
        assert!(validate_output(OutputSchema::Score, &value).is_ok());
    }

    #[test]
    fn test_missing_scores_rejected() {
        let value = json!({"overall_assessment": "good"});
        let errors = validate_output(OutputSchema::Score, &value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_non_numeric_score_rejected() {
        let value = json!({"scores": {"accuracy": {"score": "high"}}});
        assert!(validate_output(OutputSchema::Score, &value).is_err());
    }

    #[test]
    fn test_pairwise_output() {
        let ok = json!({"winner": "A", "criteria": {"accuracy": "B"}, "confidence": 0.7});
        assert!(validate_output(OutputSchema::Pairwise, &ok).is_ok());

        let bad = json!({"criteria": {}});
        assert!(validate_output(OutputSchema::Pairwise, &bad).is_err());
    }
}
