//! Dialogue-level annotators over whole-conversation statistics: length
//! buckets, prompt-size profile, first-exchange shape, interaction
//! patterns, and coding-assistance detection.

use serde_json::json;

use crate::data::DialogueData;
use crate::result::{AnnotationResult, AnnotatorSpec};
use crate::traits::DialogueAnnotator;

fn mean(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<i64>() as f64 / values.len() as f64
}

fn variance(values: &[i64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values
        .iter()
        .map(|v| {
            let d = *v as f64 - m;
            d * d
        })
        .sum::<f64>()
        / (values.len() - 1) as f64
}

/// Coefficient of variation; 0 when the mean is 0
fn coefficient_of_variation(values: &[i64]) -> f64 {
    let m = mean(values);
    if m <= 0.0 {
        return 0.0;
    }
    variance(values).sqrt() / m
}

/// Bucket the dialogue by exchange count
pub struct DialogueLengthAnnotator;

impl DialogueAnnotator for DialogueLengthAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("DialogueLengthAnnotator", "dialogue_length", "1.0", 50);
        &SPEC
    }

    fn annotate(&self, data: &DialogueData) -> Vec<AnnotationResult> {
        let category = match data.exchange_count {
            0 => "empty",
            1 => "single",
            2..=3 => "short",
            4..=10 => "medium",
            11..=25 => "long",
            _ => "very_long",
        };

        vec![
            AnnotationResult::string("dialogue_length", category).with_confidence(1.0),
            AnnotationResult::json(
                "dialogue_length_stats",
                json!({
                    "exchange_count": data.exchange_count,
                    "message_count": data.message_count,
                    "user_message_count": data.user_message_count,
                    "assistant_message_count": data.assistant_message_count,
                }),
            ),
        ]
    }
}

/// Length x consistency tag over user-prompt word counts. Mean word count
/// picks the length bucket; the coefficient of variation picks
/// consistency.
pub struct PromptStatsAnnotator;

impl DialogueAnnotator for PromptStatsAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("PromptStatsAnnotator", "prompt_stats", "1.0", 50);
        &SPEC
    }

    fn annotate(&self, data: &DialogueData) -> Vec<AnnotationResult> {
        if data.user_word_counts.is_empty() {
            return vec![AnnotationResult::string("prompt_stats", "none").with_confidence(1.0)];
        }

        let counts = &data.user_word_counts;
        let mean_wc = mean(counts);
        let cv = coefficient_of_variation(counts);

        let length_category = if mean_wc < 10.0 {
            "very_short"
        } else if mean_wc < 50.0 {
            "short"
        } else if mean_wc < 200.0 {
            "medium"
        } else if mean_wc < 500.0 {
            "long"
        } else {
            "very_long"
        };

        let consistency = if cv < 0.3 {
            "consistent"
        } else if cv < 0.7 {
            "mixed"
        } else {
            "variable"
        };

        vec![
            AnnotationResult::string("prompt_stats", format!("{}_{}", length_category, consistency))
                .with_confidence(1.0),
            AnnotationResult::json(
                "prompt_stats_detail",
                json!({
                    "count": counts.len(),
                    "mean": (mean_wc * 10.0).round() / 10.0,
                    "cv": (cv * 100.0).round() / 100.0,
                    "length_category": length_category,
                    "consistency": consistency,
                }),
            ),
        ]
    }
}

/// First-exchange shape: large initial content, code openers, and the
/// context-dump pattern (short dialogue with a big first message)
pub struct FirstExchangeAnnotator;

const LARGE_CONTENT_THRESHOLD: usize = 2000;
const CODE_INDICATORS: &[&str] = &["```", "def ", "function ", "class ", "import ", "#include"];

impl DialogueAnnotator for FirstExchangeAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("FirstExchangeAnnotator", "first_exchange", "1.0", 50);
        &SPEC
    }

    fn annotate(&self, data: &DialogueData) -> Vec<AnnotationResult> {
        let first_text = data.first_user_text.as_deref().unwrap_or("");
        let mut results = Vec::new();

        if first_text.len() > LARGE_CONTENT_THRESHOLD {
            results.push(
                AnnotationResult::flag("starts_large_content")
                    .with_confidence(1.0)
                    .with_reason(format!("{} chars", first_text.len())),
            );
        }

        let code_found: Vec<&str> = CODE_INDICATORS
            .iter()
            .copied()
            .filter(|indicator| first_text.contains(indicator))
            .collect();
        if !code_found.is_empty() {
            results.push(
                AnnotationResult::flag("starts_with_code")
                    .with_confidence(0.9)
                    .with_reason(code_found.join(" ")),
            );
        }

        if data.exchange_count <= 3 && first_text.len() > LARGE_CONTENT_THRESHOLD {
            results.push(AnnotationResult::flag("context_dump").with_confidence(0.85));
        }

        results
    }
}

/// Brief / extended / interactive / evolving interaction tags
pub struct InteractionPatternAnnotator;

impl DialogueAnnotator for InteractionPatternAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base(
            "InteractionPatternAnnotator",
            "interaction_pattern",
            "1.0",
            40,
        );
        &SPEC
    }

    fn annotate(&self, data: &DialogueData) -> Vec<AnnotationResult> {
        let mut results = Vec::new();

        if data.exchange_count <= 3 {
            results.push(
                AnnotationResult::string("interaction_pattern", "brief_interaction")
                    .with_confidence(1.0),
            );
        } else if data.exchange_count >= 10 {
            results.push(
                AnnotationResult::string("interaction_pattern", "extended_conversation")
                    .with_confidence(1.0),
            );
        }

        if data.exchange_count >= 5 && data.user_word_counts.len() >= 5 {
            let cv = coefficient_of_variation(&data.user_word_counts);
            if cv < 0.3 {
                results.push(
                    AnnotationResult::string("interaction_pattern", "interactive_session")
                        .with_confidence(0.8),
                );
            } else if cv > 0.7 {
                results.push(
                    AnnotationResult::string("interaction_pattern", "evolving_discussion")
                        .with_confidence(0.8),
                );
            }
        }

        results
    }
}

/// Whole-dialogue coding-assistance detection, conservative tiers below
/// the platform code-execution evidence
pub struct CodingAssistanceAnnotator;

const STRONG_INDICATORS: &[&str] = &["```", "#!/", "#include <", "#include \""];
const MODERATE_INDICATORS: &[&str] = &["def ", "function ", "class ", "import ", "from "];

impl DialogueAnnotator for CodingAssistanceAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base(
            "CodingAssistanceAnnotator",
            "coding_assistance",
            "1.0",
            40,
        );
        &SPEC
    }

    fn annotate(&self, data: &DialogueData) -> Vec<AnnotationResult> {
        let all_text = format!(
            "{} {}",
            data.user_texts.join(" "),
            data.assistant_texts.join(" ")
        );

        let strong_count = STRONG_INDICATORS
            .iter()
            .filter(|indicator| all_text.contains(*indicator))
            .count();
        let moderate_count = MODERATE_INDICATORS
            .iter()
            .filter(|indicator| all_text.contains(*indicator))
            .count();

        if strong_count >= 2 {
            vec![
                AnnotationResult::flag("coding_assistance")
                    .with_confidence(0.95)
                    .with_reason(format!("{} strong indicators", strong_count)),
            ]
        } else if strong_count >= 1 || moderate_count >= 3 {
            vec![
                AnnotationResult::flag("coding_assistance")
                    .with_confidence(0.7)
                    .with_reason(format!(
                        "{} strong, {} moderate indicators",
                        strong_count, moderate_count
                    )),
            ]
        } else {
            Vec::new()
        }
    }
}

pub fn standard_annotators() -> Vec<Box<dyn DialogueAnnotator>> {
    vec![
        Box::new(DialogueLengthAnnotator),
        Box::new(PromptStatsAnnotator),
        Box::new(FirstExchangeAnnotator),
        Box::new(InteractionPatternAnnotator),
        Box::new(CodingAssistanceAnnotator),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AnnotationValue;
    use uuid::Uuid;

    fn data(exchange_count: i64, user_word_counts: Vec<i64>) -> DialogueData {
        DialogueData {
            dialogue_id: Uuid::new_v4(),
            exchange_count,
            message_count: exchange_count * 2,
            user_message_count: exchange_count,
            assistant_message_count: exchange_count,
            user_word_counts,
            first_user_text: None,
            user_texts: Vec::new(),
            assistant_texts: Vec::new(),
        }
    }

    fn first_string(results: &[AnnotationResult]) -> &str {
        results
            .iter()
            .find_map(|r| match &r.value {
                AnnotationValue::String(s) => Some(s.as_str()),
                _ => None,
            })
            .expect("expected a string result")
    }

    #[test]
    fn test_length_buckets() {
        for (count, expected) in [
            (0, "empty"),
            (1, "single"),
            (3, "short"),
            (10, "medium"),
            (25, "long"),
            (26, "very_long"),
        ] {
            let results = DialogueLengthAnnotator.annotate(&data(count, vec![]));
            assert_eq!(first_string(&results), expected, "count {}", count);
        }
    }

    #[test]
    fn test_prompt_stats_none() {
        let results = PromptStatsAnnotator.annotate(&data(2, vec![]));
        assert_eq!(first_string(&results), "none");
    }

    #[test]
    fn test_prompt_stats_consistent_short() {
        let results = PromptStatsAnnotator.annotate(&data(4, vec![20, 22, 19, 21]));
        assert_eq!(first_string(&results), "short_consistent");
    }

    #[test]
    fn test_prompt_stats_variable() {
        let results = PromptStatsAnnotator.annotate(&data(4, vec![2, 300, 5, 450]));
        assert!(first_string(&results).ends_with("_variable"));
    }

    #[test]
    fn test_first_exchange_context_dump() {
        let mut d = data(2, vec![500]);
        d.first_user_text = Some("x".repeat(3000));
        let results = FirstExchangeAnnotator.annotate(&d);
        let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
        assert!(keys.contains(&"starts_large_content"));
        assert!(keys.contains(&"context_dump"));
    }

    #[test]
    fn test_interaction_patterns() {
        let brief = InteractionPatternAnnotator.annotate(&data(2, vec![10, 11]));
        assert_eq!(first_string(&brief), "brief_interaction");

        let interactive =
            InteractionPatternAnnotator.annotate(&data(6, vec![20, 21, 19, 20, 22, 20]));
        let values: Vec<&str> = interactive
            .iter()
            .filter_map(|r| match &r.value {
                AnnotationValue::String(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert!(values.contains(&"interactive_session"));
    }

    #[test]
    fn test_coding_assistance_tiers() {
        let mut strong = data(2, vec![10]);
        strong.assistant_texts = vec!["```rust\nfn main() {}\n```\n#!/bin/sh".to_string()];
        let results = CodingAssistanceAnnotator.annotate(&strong);
        assert_eq!(results[0].confidence, Some(0.95));

        let mut moderate = data(2, vec![10]);
        moderate.assistant_texts =
            vec!["def parse, then import json, then class Config".to_string()];
        let results = CodingAssistanceAnnotator.annotate(&moderate);
        assert_eq!(results[0].confidence, Some(0.7));

        let mut none = data(2, vec![10]);
        none.assistant_texts = vec!["just prose about cooking".to_string()];
        assert!(CodingAssistanceAnnotator.annotate(&none).is_empty());
    }
}
