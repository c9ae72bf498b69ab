//! Locating a JSON object inside free-form judge text.
//!
//! Judges are asked for JSON but routinely wrap it in prose or a code
//! fence. Extraction tries, in order:
//! 1. fenced code blocks (```json ... ``` or bare ```)
//! 2. a balanced-brace scan starting at every `{`
//! 3. the whole string
//!
//! The first candidate that parses as a JSON object wins.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    /// Fenced code block, optional language tag, lazily matched body.
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap();
}

/// Which strategy produced the extracted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    FencedBlock,
    BalancedBraces,
    WholeString,
}

/// Extract the first JSON object found in `text`.
pub fn extract_json_object(text: &str) -> Option<(Value, ExtractionStrategy)> {
    for caps in FENCED_BLOCK.captures_iter(text) {
        if let Some(body) = caps.get(1) {
            if let Some(value) = parse_object(body.as_str()) {
                return Some((value, ExtractionStrategy::FencedBlock));
            }
        }
    }

    for (start, _) in text.match_indices('{') {
        if let Some(end) = matching_brace(text, start) {
            if let Some(value) = parse_object(&text[start..=end]) {
                return Some((value, ExtractionStrategy::BalancedBraces));
            }
        }
    }

    parse_object(text).map(|value| (value, ExtractionStrategy::WholeString))
}

fn parse_object(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Index of the `}` closing the `{` at `start`, skipping braces in strings.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block() {
        let text = "Here is my evaluation:\n```json\n{\"scores\": {\"accuracy\": 4}}\n```\nThanks.";
        let (value, strategy) = extract_json_object(text).unwrap();
        assert_eq!(strategy, ExtractionStrategy::FencedBlock);
        assert_eq!(value["scores"]["accuracy"], 4);
    }

    #[test]
    fn test_bare_fence_without_language() {
        let text = "```\n{\"winner\": \"B\"}\n```";
        let (value, strategy) = extract_json_object(text).unwrap();
        assert_eq!(strategy, ExtractionStrategy::FencedBlock);
        assert_eq!(value["winner"], "B");
    }

    #[test]
    fn test_balanced_braces_in_prose() {
        let text = "I think {this} matters. Result: {\"scores\": {\"tone\": {\"score\": 3, \"justification\": \"uses {braces} inside\"}}} done";
        let (value, strategy) = extract_json_object(text).unwrap();
        assert_eq!(strategy, ExtractionStrategy::BalancedBraces);
        assert_eq!(value["scores"]["tone"]["score"], 3);
    }

    #[test]
    fn test_fence_with_invalid_json_falls_through() {
        let text = "```python\nprint('hi')\n```\nFinal: {\"winner\": \"tie\"}";
        let (value, strategy) = extract_json_object(text).unwrap();
        assert_eq!(strategy, ExtractionStrategy::BalancedBraces);
        assert_eq!(value["winner"], "tie");
    }

    #[test]
    fn test_escaped_quotes_in_strings() {
        let text = r#"{"overall_assessment": "said \"}\" twice", "scores": {"a": 1}}"#;
        let (value, _) = extract_json_object(text).unwrap();
        assert_eq!(value["scores"]["a"], 1);
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json_object("The response is good, 4/5.").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("{unterminated").is_none());
    }
}
