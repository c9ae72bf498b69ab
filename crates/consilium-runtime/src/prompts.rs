//! Judge prompt templates.
//!
//! Prompts are fixed templates. The system prompt carries the output
//! contract; the user message carries the rubric and the material to judge.
//! The JSON shapes requested here are exactly what
//! `consilium_core::parse_judge_output` and `parse_pairwise_output` accept.

use consilium_core::Rubric;

use crate::backend::ChatMessage;

/// System prompt for scoring a single response.
pub const SCORING_SYSTEM_PROMPT: &str = r#"
You are an evaluation judge scoring one AI response against a rubric.

## Judging Constraints
1. Score ONLY the criteria you are given - do not invent criteria
2. Judge the response as written, not what it might have meant
3. Keep justifications to one or two sentences
4. Use the full scale; do not default to the middle

## Output Format (JSON)
{
  "scores": {
    "<criterion name>": {"score": <number on the rubric scale>, "justification": "string"}
  },
  "overall_assessment": "string",
  "confidence": 0.0-1.0
}

Respond with the JSON object only.
"#;

/// System prompt for comparing two responses.
pub const PAIRWISE_SYSTEM_PROMPT: &str = r#"
You are an evaluation judge comparing two AI responses to the same prompt.

## Judging Constraints
1. The order in which the responses appear carries no information
2. Response length is not a criterion unless the rubric says so
3. Declare a tie only when neither response is meaningfully better

## Output Format (JSON)
{
  "winner": "A" | "B" | "tie",
  "criteria": {
    "<criterion name>": {"winner": "A" | "B" | "tie", "reasoning": "string"}
  },
  "confidence": 0.0-1.0,
  "reasoning": "string"
}

Respond with the JSON object only.
"#;

/// Render the rubric as a markdown section.
pub fn render_rubric(rubric: &Rubric) -> String {
    let mut out = format!(
        "## Rubric: {}\nScale: {} (worst) to {} (best)\n",
        rubric.name, rubric.scale.min, rubric.scale.max
    );
    if rubric.criteria.is_empty() {
        out.push_str("- overall: Overall quality of the response\n");
    }
    for criterion in &rubric.criteria {
        out.push_str(&format!("- {} (weight {})", criterion.name, criterion.weight));
        if !criterion.description.is_empty() {
            out.push_str(&format!(": {}", criterion.description));
        }
        out.push('\n');
    }
    out
}

/// Messages asking a judge to score `response`.
pub fn scoring_messages(rubric: &Rubric, prompt: &str, response: &str) -> Vec<ChatMessage> {
    let user = format!(
        "{}\n## Prompt\n{}\n\n## Response\n{}\n",
        render_rubric(rubric),
        prompt,
        response
    );
    vec![
        ChatMessage::system(SCORING_SYSTEM_PROMPT.trim()),
        ChatMessage::user(user),
    ]
}

/// Messages asking a judge to compare two responses, as presented.
pub fn pairwise_messages(
    rubric: Option<&Rubric>,
    prompt: &str,
    response_a: &str,
    response_b: &str,
) -> Vec<ChatMessage> {
    let rubric_section = rubric.map(render_rubric).unwrap_or_default();
    let user = format!(
        "{}\n## Prompt\n{}\n\n## Response A\n{}\n\n## Response B\n{}\n",
        rubric_section, prompt, response_a, response_b
    );
    vec![
        ChatMessage::system(PAIRWISE_SYSTEM_PROMPT.trim()),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use consilium_core::Criterion;

    #[test]
    fn test_scoring_messages_include_rubric() {
        let rubric = Rubric::new("support").criterion(
            Criterion::new("empathy", "Acknowledges the customer's frustration").with_weight(2.0),
        );
        let messages = scoring_messages(&rubric, "Where is my order?", "It shipped yesterday.");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("\"scores\""));
        assert!(messages[1].content.contains("- empathy (weight 2)"));
        assert!(messages[1].content.contains("It shipped yesterday."));
    }

    #[test]
    fn test_pairwise_messages_order() {
        let messages = pairwise_messages(None, "Say hi", "first", "second");
        let user = &messages[1].content;
        let a = user.find("## Response A").unwrap();
        let b = user.find("## Response B").unwrap();
        assert!(a < b);
        assert!(user[a..b].contains("first"));
        assert!(user[b..].contains("second"));
    }

    #[test]
    fn test_empty_rubric_asks_for_overall() {
        let rendered = render_rubric(&Rubric::new("freeform"));
        assert!(rendered.contains("- overall"));
    }
}
