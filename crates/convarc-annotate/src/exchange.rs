//! Exchange-level annotators over aggregated exchange content: type
//! classification, code-evidence strength, and title extraction.

use crate::data::ExchangeData;
use crate::result::{AnnotationResult, AnnotatorSpec};
use crate::traits::ExchangeAnnotator;

/// Classify exchanges into coarse types with per-rule confidences
pub struct ExchangeTypeAnnotator;

impl ExchangeTypeAnnotator {
    fn classify(data: &ExchangeData) -> (&'static str, f64) {
        let assistant_text = data.assistant_text.as_deref().unwrap_or("");

        if assistant_text.matches("```").count() >= 2 {
            return ("coding", 0.8);
        }

        if assistant_text.contains("[[") && assistant_text.contains("]]") {
            return ("wiki_article", 0.9);
        }

        // Short question, long answer
        if data.user_word_count < 50 && data.assistant_word_count > 200 {
            return ("qa", 0.6);
        }

        if data.assistant_word_count > 500 {
            if assistant_text.starts_with('#') || assistant_text.starts_with("**") {
                return ("article", 0.7);
            }
            return ("generation", 0.5);
        }

        ("discussion", 0.4)
    }
}

impl ExchangeAnnotator for ExchangeTypeAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("ExchangeTypeAnnotator", "exchange_type", "1.0", 50);
        &SPEC
    }

    fn annotate(&self, data: &ExchangeData) -> Vec<AnnotationResult> {
        let (exchange_type, confidence) = Self::classify(data);
        vec![AnnotationResult::string("exchange_type", exchange_type).with_confidence(confidence)]
    }
}

/// Grade the strength of textual code evidence. Runs below the platform
/// code-execution detector so ground truth always lands first.
pub struct CodeEvidenceAnnotator;

const STRONG_INDICATORS: &[&str] = &["```", "#!/", "#include"];
const MODERATE_KEYWORDS: &[&str] = &["def ", "function ", "class ", "import ", "from "];
const DENSITY_KEYWORDS: &[&str] = &[
    "function", "class", "import", "return", "if ", "for ", "while ", "const ", "let ", "var ",
    "async", "await", "try", "catch",
];

impl ExchangeAnnotator for CodeEvidenceAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("CodeEvidenceAnnotator", "code_evidence", "1.0", 40);
        &SPEC
    }

    fn annotate(&self, data: &ExchangeData) -> Vec<AnnotationResult> {
        let all_text = format!(
            "{} {}",
            data.user_text.as_deref().unwrap_or(""),
            data.assistant_text.as_deref().unwrap_or("")
        );

        let strong_count = STRONG_INDICATORS
            .iter()
            .filter(|indicator| all_text.contains(*indicator))
            .count();
        let moderate_count = MODERATE_KEYWORDS
            .iter()
            .filter(|keyword| all_text.contains(*keyword))
            .count();
        let lowered = all_text.to_lowercase();
        let density_count = DENSITY_KEYWORDS
            .iter()
            .filter(|keyword| lowered.contains(*keyword))
            .count();
        let has_high_density = all_text.len() > 500 && density_count >= 5;

        if strong_count > 0 {
            vec![
                AnnotationResult::string("code_evidence", "strong")
                    .with_confidence(0.95)
                    .with_reason(format!("{} strong indicators", strong_count)),
            ]
        } else if moderate_count >= 2 {
            vec![
                AnnotationResult::string("code_evidence", "moderate")
                    .with_confidence(0.7)
                    .with_reason(format!("{} moderate keywords", moderate_count)),
            ]
        } else if has_high_density {
            vec![
                AnnotationResult::string("code_evidence", "weak")
                    .with_confidence(0.5)
                    .with_reason(format!("{} density keywords", density_count)),
            ]
        } else {
            Vec::new()
        }
    }
}

/// Title from the first line of the assistant text when it is a markdown
/// heading or bold-wrapped
pub struct TitleExtractionAnnotator;

pub(crate) fn extract_title(text: &str) -> Option<String> {
    let first_line = text.trim().lines().next()?.trim();

    if first_line.starts_with('#') {
        let title = first_line.trim_start_matches('#').trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
    }

    if first_line.starts_with("**") && first_line.ends_with("**") && first_line.len() > 4 {
        let title = first_line.trim_matches('*').trim();
        if !title.is_empty() {
            return Some(title.to_string());
        }
    }

    None
}

impl ExchangeAnnotator for TitleExtractionAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("TitleExtractionAnnotator", "proposed_title", "1.0", 50);
        &SPEC
    }

    fn annotate(&self, data: &ExchangeData) -> Vec<AnnotationResult> {
        let Some(assistant_text) = data.assistant_text.as_deref() else {
            return Vec::new();
        };
        match extract_title(assistant_text) {
            Some(title) => {
                vec![AnnotationResult::string("proposed_title", title).with_confidence(0.8)]
            }
            None => Vec::new(),
        }
    }
}

pub fn standard_annotators() -> Vec<Box<dyn ExchangeAnnotator>> {
    vec![
        Box::new(ExchangeTypeAnnotator),
        Box::new(CodeEvidenceAnnotator),
        Box::new(TitleExtractionAnnotator),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AnnotationValue;
    use uuid::Uuid;

    fn data(user: &str, assistant: &str) -> ExchangeData {
        ExchangeData {
            exchange_id: Uuid::new_v4(),
            user_word_count: user.split_whitespace().count() as i64,
            assistant_word_count: assistant.split_whitespace().count() as i64,
            total_word_count: (user.split_whitespace().count()
                + assistant.split_whitespace().count()) as i64,
            user_text: Some(user.to_string()),
            assistant_text: Some(assistant.to_string()),
            full_text: Some(format!("{}\n\n{}", user, assistant)),
        }
    }

    fn string_value(results: &[AnnotationResult]) -> &str {
        match &results[0].value {
            AnnotationValue::String(s) => s.as_str(),
            _ => panic!("expected string value"),
        }
    }

    #[test]
    fn test_coding_classification() {
        let results = ExchangeTypeAnnotator.annotate(&data(
            "write it",
            "```python\nprint(1)\n```\nand\n```python\nprint(2)\n```",
        ));
        assert_eq!(string_value(&results), "coding");
        assert_eq!(results[0].confidence, Some(0.8));
    }

    #[test]
    fn test_wiki_article_classification() {
        let results =
            ExchangeTypeAnnotator.annotate(&data("topic", "An entry on [[Rust]] and [[Cargo]]"));
        assert_eq!(string_value(&results), "wiki_article");
        assert_eq!(results[0].confidence, Some(0.9));
    }

    #[test]
    fn test_qa_classification() {
        let answer = "answer ".repeat(250);
        let results = ExchangeTypeAnnotator.annotate(&data("why is the sky blue", &answer));
        assert_eq!(string_value(&results), "qa");
    }

    #[test]
    fn test_article_vs_generation() {
        let prompt = "write something long ".repeat(10);
        let body = "word ".repeat(600);

        let article = ExchangeTypeAnnotator.annotate(&data(&prompt, &format!("# Title\n{}", body)));
        assert_eq!(string_value(&article), "article");

        let generation = ExchangeTypeAnnotator.annotate(&data(&prompt, &body));
        assert_eq!(string_value(&generation), "generation");
    }

    #[test]
    fn test_discussion_fallback() {
        let results = ExchangeTypeAnnotator.annotate(&data("hello", "hi, how can I help"));
        assert_eq!(string_value(&results), "discussion");
        assert_eq!(results[0].confidence, Some(0.4));
    }

    #[test]
    fn test_code_evidence_tiers() {
        let strong = CodeEvidenceAnnotator.annotate(&data("run this", "```rust\nfn x() {}\n```"));
        assert_eq!(string_value(&strong), "strong");

        let moderate =
            CodeEvidenceAnnotator.annotate(&data("explain", "def foo means a function, import too"));
        assert_eq!(string_value(&moderate), "moderate");

        assert!(CodeEvidenceAnnotator.annotate(&data("hi", "hello")).is_empty());
    }

    #[test]
    fn test_title_extraction() {
        assert_eq!(
            extract_title("# The Borrow Checker\nBody"),
            Some("The Borrow Checker".to_string())
        );
        assert_eq!(
            extract_title("**Bold Title**\nBody"),
            Some("Bold Title".to_string())
        );
        assert_eq!(extract_title("Just prose"), None);
        assert_eq!(extract_title("####   "), None);
    }
}
