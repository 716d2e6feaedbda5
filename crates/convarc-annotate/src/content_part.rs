//! Content-part annotators: fine-grained versions of the message-text
//! detectors that record where inside a message a feature occurs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::data::ContentPartData;
use crate::result::{AnnotationResult, AnnotatorSpec};
use crate::traits::ContentPartAnnotator;
use convarc_types::{PartType, Role};

static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[.+?\]\]").unwrap());
static LATEX_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\$\$.+?\$\$").unwrap());

/// ``` fences within a single text part
pub struct PartCodeBlockAnnotator;

impl ContentPartAnnotator for PartCodeBlockAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "PartCodeBlockAnnotator",
            key: "has_code",
            version: "1.0",
            priority: 90,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: None,
            part_type_filter: Some(PartType::Text),
        };
        &SPEC
    }

    fn annotate(&self, data: &ContentPartData) -> Vec<AnnotationResult> {
        if !data.text.contains("```") {
            return Vec::new();
        }
        vec![
            AnnotationResult::flag("has_code").with_confidence(1.0),
            AnnotationResult::json(
                "code_location",
                json!({
                    "message_id": data.message_id.to_string(),
                    "sequence": data.sequence,
                    "fence_count": data.text.matches("```").count() / 2,
                }),
            ),
        ]
    }
}

/// LaTeX display blocks within an assistant text part
pub struct PartLatexAnnotator;

impl ContentPartAnnotator for PartLatexAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "PartLatexAnnotator",
            key: "has_latex",
            version: "1.0",
            priority: 50,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: Some(Role::Assistant),
            part_type_filter: Some(PartType::Text),
        };
        &SPEC
    }

    fn annotate(&self, data: &ContentPartData) -> Vec<AnnotationResult> {
        if !LATEX_BLOCK.is_match(&data.text) {
            return Vec::new();
        }
        vec![
            AnnotationResult::flag("has_latex").with_confidence(1.0),
            AnnotationResult::json(
                "latex_location",
                json!({
                    "message_id": data.message_id.to_string(),
                    "sequence": data.sequence,
                }),
            ),
        ]
    }
}

/// [[wiki links]] within an assistant text part
pub struct PartWikiLinkAnnotator;

impl ContentPartAnnotator for PartWikiLinkAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "PartWikiLinkAnnotator",
            key: "has_wiki_links",
            version: "1.0",
            priority: 50,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: Some(Role::Assistant),
            part_type_filter: Some(PartType::Text),
        };
        &SPEC
    }

    fn annotate(&self, data: &ContentPartData) -> Vec<AnnotationResult> {
        let count = WIKI_LINK.find_iter(&data.text).count();
        if count == 0 {
            return Vec::new();
        }
        vec![
            AnnotationResult::flag("has_wiki_links").with_confidence(1.0),
            AnnotationResult::numeric("wiki_link_count", count as f64),
        ]
    }
}

pub fn standard_annotators() -> Vec<Box<dyn ContentPartAnnotator>> {
    vec![
        Box::new(PartCodeBlockAnnotator),
        Box::new(PartLatexAnnotator),
        Box::new(PartWikiLinkAnnotator),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn data(role: Role, sequence: i64, text: &str) -> ContentPartData {
        ContentPartData {
            part_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            sequence,
            role,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_part_code_block_records_location() {
        let results = PartCodeBlockAnnotator.annotate(&data(
            Role::Assistant,
            2,
            "```rust\nfn main() {}\n```",
        ));
        assert_eq!(results.len(), 2);
        match &results[1].value {
            crate::AnnotationValue::Json(value) => {
                assert_eq!(value["sequence"], 2);
                assert_eq!(value["fence_count"], 1);
            }
            _ => panic!("expected json location"),
        }
    }

    #[test]
    fn test_part_wiki_links() {
        let results = PartWikiLinkAnnotator.annotate(&data(Role::Assistant, 0, "[[A]] [[B]]"));
        assert_eq!(results.len(), 2);
        assert!(
            PartWikiLinkAnnotator
                .annotate(&data(Role::Assistant, 0, "no links"))
                .is_empty()
        );
    }
}
