//! Annotators over the tree-free prompt-response view. These run even when
//! a provider export lacks reliable parent pointers.

use crate::data::PromptResponseData;
use crate::exchange::extract_title;
use crate::result::{AnnotationResult, AnnotatorSpec};
use crate::traits::PromptResponseAnnotator;

/// Wiki-article candidate: a substantial response written with
/// [[wiki links]]
pub struct WikiCandidateAnnotator;

impl PromptResponseAnnotator for WikiCandidateAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("WikiCandidateAnnotator", "wiki_candidate", "1.0", 50);
        &SPEC
    }

    fn annotate(&self, data: &PromptResponseData) -> Vec<AnnotationResult> {
        let Some(response) = data.response_text.as_deref() else {
            return Vec::new();
        };

        if response.contains("[[") && response.contains("]]") {
            let confidence = if data.response_word_count >= 100 { 0.9 } else { 0.7 };
            vec![AnnotationResult::flag("wiki_candidate").with_confidence(confidence)]
        } else {
            Vec::new()
        }
    }
}

/// First-line title for wiki candidates. Requires the `wiki_candidate`
/// flag, so it only ever runs behind WikiCandidateAnnotator.
pub struct NaiveTitleAnnotator;

impl PromptResponseAnnotator for NaiveTitleAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "NaiveTitleAnnotator",
            key: "naive_title",
            version: "1.0",
            priority: 40,
            requires_flags: &["wiki_candidate"],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: None,
            part_type_filter: None,
        };
        &SPEC
    }

    fn annotate(&self, data: &PromptResponseData) -> Vec<AnnotationResult> {
        let Some(response) = data.response_text.as_deref() else {
            return Vec::new();
        };
        match extract_title(response) {
            Some(title) => {
                vec![AnnotationResult::string("naive_title", title).with_confidence(0.8)]
            }
            None => Vec::new(),
        }
    }
}

pub fn standard_annotators() -> Vec<Box<dyn PromptResponseAnnotator>> {
    vec![Box::new(WikiCandidateAnnotator), Box::new(NaiveTitleAnnotator)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use convarc_types::Role;
    use uuid::Uuid;

    fn data(response: &str) -> PromptResponseData {
        PromptResponseData {
            pair_id: Uuid::new_v4(),
            dialogue_id: Uuid::new_v4(),
            response_role: Role::Assistant,
            prompt_text: Some("write an entry".to_string()),
            response_text: Some(response.to_string()),
            prompt_word_count: 3,
            response_word_count: response.split_whitespace().count() as i64,
        }
    }

    #[test]
    fn test_wiki_candidate() {
        let long_body = format!("# Entry\nSee [[Rust]]. {}", "word ".repeat(120));
        let results = WikiCandidateAnnotator.annotate(&data(&long_body));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].confidence, Some(0.9));

        let short = WikiCandidateAnnotator.annotate(&data("short [[link]]"));
        assert_eq!(short[0].confidence, Some(0.7));

        assert!(WikiCandidateAnnotator.annotate(&data("no links here")).is_empty());
    }

    #[test]
    fn test_naive_title_extracts_heading() {
        let results = NaiveTitleAnnotator.annotate(&data("# Ownership\nSee [[Borrowing]]"));
        assert_eq!(results.len(), 1);
        match &results[0].value {
            crate::AnnotationValue::String(title) => assert_eq!(title, "Ownership"),
            _ => panic!("expected string title"),
        }

        assert!(NaiveTitleAnnotator.annotate(&data("plain first line")).is_empty());
    }
}
