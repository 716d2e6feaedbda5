//! Exchange annotators backed by provider side tables. All run at
//! priority 100: platform rows are ground truth, so they land before any
//! text heuristic and let lower tiers short-circuit.

use serde_json::json;

use crate::data::ExchangePlatformData;
use crate::result::{AnnotationResult, AnnotatorSpec};
use crate::traits::ExchangePlatformAnnotator;

/// Web search evidence from stored search-result groups
pub struct WebSearchAnnotator;

impl ExchangePlatformAnnotator for WebSearchAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("WebSearchAnnotator", "web_search", "1.0", 100);
        &SPEC
    }

    fn annotate(&self, data: &ExchangePlatformData) -> Vec<AnnotationResult> {
        if data.search_groups.is_empty() {
            return Vec::new();
        }

        let mut domains: Vec<&str> = data
            .search_groups
            .iter()
            .filter_map(|group| group.domain.as_deref())
            .collect();
        domains.sort();
        domains.dedup();
        domains.truncate(10);

        vec![
            AnnotationResult::flag("has_web_search").with_confidence(1.0),
            AnnotationResult::json(
                "web_search_summary",
                json!({
                    "search_group_count": data.search_groups.len(),
                    "domains": domains,
                }),
            ),
        ]
    }
}

/// Sandbox code-execution evidence
pub struct CodeExecutionAnnotator;

impl ExchangePlatformAnnotator for CodeExecutionAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base("CodeExecutionAnnotator", "code", "1.0", 100);
        &SPEC
    }

    fn annotate(&self, data: &ExchangePlatformData) -> Vec<AnnotationResult> {
        if data.code_executions.is_empty() {
            return Vec::new();
        }

        let successful = data
            .code_executions
            .iter()
            .filter(|execution| execution.status.as_deref() == Some("success"))
            .count();
        let failed = data
            .code_executions
            .iter()
            .filter(|execution| execution.exception_name.is_some())
            .count();

        vec![
            AnnotationResult::flag("has_code_execution").with_confidence(1.0),
            AnnotationResult::json(
                "code_execution_summary",
                json!({
                    "execution_count": data.code_executions.len(),
                    "successful": successful,
                    "failed": failed,
                }),
            ),
        ]
    }
}

/// Canvas / document-editing evidence
pub struct CanvasAnnotator;

impl ExchangePlatformAnnotator for CanvasAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base("CanvasAnnotator", "canvas", "1.0", 100);
        &SPEC
    }

    fn annotate(&self, data: &ExchangePlatformData) -> Vec<AnnotationResult> {
        if data.canvas_docs.is_empty() {
            return Vec::new();
        }

        let mut doc_types: Vec<&str> = data
            .canvas_docs
            .iter()
            .filter_map(|doc| doc.textdoc_type.as_deref())
            .collect();
        doc_types.sort();
        doc_types.dedup();

        vec![
            AnnotationResult::flag("has_canvas_operations").with_confidence(1.0),
            AnnotationResult::json(
                "canvas_summary",
                json!({
                    "doc_count": data.canvas_docs.len(),
                    "doc_types": doc_types,
                }),
            ),
        ]
    }
}

/// Custom-assistant (gizmo) usage evidence
pub struct GizmoAnnotator;

impl ExchangePlatformAnnotator for GizmoAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base("GizmoAnnotator", "gizmo", "1.0", 100);
        &SPEC
    }

    fn annotate(&self, data: &ExchangePlatformData) -> Vec<AnnotationResult> {
        if data.gizmo_ids.is_empty() {
            return Vec::new();
        }

        let mut results = vec![
            AnnotationResult::flag("has_gizmo_usage").with_confidence(1.0),
            AnnotationResult::json(
                "gizmo_summary",
                json!({
                    "gizmo_count": data.gizmo_ids.len(),
                    "gizmo_ids": data.gizmo_ids,
                }),
            ),
        ];
        for gizmo_id in &data.gizmo_ids {
            results.push(AnnotationResult::string("gizmo_id", gizmo_id.clone()));
        }
        results
    }
}

/// User file uploads; code-related files also feed the `code` key
pub struct AttachmentAnnotator;

const CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".java", ".cpp", ".c", ".h", ".go", ".rs", ".jsx", ".tsx", ".sql", ".sh",
    ".rb", ".php", ".swift", ".kt",
];

const CODE_MIMES: &[&str] = &[
    "text/x-python",
    "text/x-java",
    "application/javascript",
    "text/x-script",
    "text/x-c",
    "text/x-c++",
];

impl ExchangePlatformAnnotator for AttachmentAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("AttachmentAnnotator", "attachment", "1.0", 100);
        &SPEC
    }

    fn annotate(&self, data: &ExchangePlatformData) -> Vec<AnnotationResult> {
        if data.attachments.is_empty() {
            return Vec::new();
        }

        let mut file_types: Vec<&str> = data
            .attachments
            .iter()
            .filter_map(|attachment| attachment.file_type.as_deref())
            .collect();
        file_types.sort();
        file_types.dedup();

        let code_files: Vec<String> = data
            .attachments
            .iter()
            .filter_map(|attachment| {
                let name = attachment.file_name.as_deref().unwrap_or("").to_lowercase();
                let mime = attachment.file_type.as_deref().unwrap_or("").to_lowercase();
                let is_code = CODE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
                    || CODE_MIMES.iter().any(|code_mime| mime.contains(code_mime));
                is_code.then_some(name)
            })
            .collect();

        let mut results = vec![
            AnnotationResult::flag("has_attachments").with_confidence(1.0),
            AnnotationResult::json(
                "attachment_summary",
                json!({
                    "count": data.attachments.len(),
                    "file_types": file_types,
                }),
            ),
        ];

        if !code_files.is_empty() {
            results.push(AnnotationResult::flag("has_code_attachments").with_confidence(1.0));
            results.push(AnnotationResult::json(
                "code_attachments",
                json!({
                    "count": code_files.len(),
                    "files": code_files.iter().take(10).collect::<Vec<_>>(),
                }),
            ));
        }

        results
    }
}

/// Image-generation evidence from stored DALL-E rows
pub struct DalleAnnotator;

impl ExchangePlatformAnnotator for DalleAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("DalleAnnotator", "image_generation", "1.0", 100);
        &SPEC
    }

    fn annotate(&self, data: &ExchangePlatformData) -> Vec<AnnotationResult> {
        if data.dalle_generations.is_empty() {
            return Vec::new();
        }

        let has_edits = data
            .dalle_generations
            .iter()
            .any(|generation| generation.edit_op.is_some());

        vec![
            AnnotationResult::flag("has_dalle_generation").with_confidence(1.0),
            AnnotationResult::json(
                "dalle_summary",
                json!({
                    "generation_count": data.dalle_generations.len(),
                    "has_edits": has_edits,
                }),
            ),
        ]
    }
}

pub fn standard_annotators() -> Vec<Box<dyn ExchangePlatformAnnotator>> {
    vec![
        Box::new(WebSearchAnnotator),
        Box::new(CodeExecutionAnnotator),
        Box::new(CanvasAnnotator),
        Box::new(GizmoAnnotator),
        Box::new(AttachmentAnnotator),
        Box::new(DalleAnnotator),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use convarc_store::{AttachmentRecord, ChatGptSearchGroupRecord};
    use serde_json::json as j;
    use uuid::Uuid;

    fn empty_data() -> ExchangePlatformData {
        ExchangePlatformData {
            exchange_id: Uuid::new_v4(),
            message_ids: Vec::new(),
            user_message_ids: Vec::new(),
            search_groups: Vec::new(),
            code_executions: Vec::new(),
            canvas_docs: Vec::new(),
            gizmo_ids: Vec::new(),
            attachments: Vec::new(),
            dalle_generations: Vec::new(),
        }
    }

    #[test]
    fn test_no_platform_rows_no_annotations() {
        let data = empty_data();
        assert!(WebSearchAnnotator.annotate(&data).is_empty());
        assert!(CodeExecutionAnnotator.annotate(&data).is_empty());
        assert!(AttachmentAnnotator.annotate(&data).is_empty());
    }

    #[test]
    fn test_web_search_summary_dedupes_domains() {
        let mut data = empty_data();
        for domain in ["docs.rs", "docs.rs", "crates.io"] {
            data.search_groups.push(ChatGptSearchGroupRecord {
                id: Uuid::new_v4(),
                message_id: Uuid::new_v4(),
                group_type: Some("search".to_string()),
                domain: Some(domain.to_string()),
                source_json: j!({}),
            });
        }

        let results = WebSearchAnnotator.annotate(&data);
        assert_eq!(results.len(), 2);
        match &results[1].value {
            crate::AnnotationValue::Json(value) => {
                assert_eq!(value["search_group_count"], 3);
                assert_eq!(value["domains"], j!(["crates.io", "docs.rs"]));
            }
            _ => panic!("expected json summary"),
        }
    }

    #[test]
    fn test_code_attachment_detection() {
        let mut data = empty_data();
        for (name, mime) in [("script.py", "text/x-python"), ("notes.pdf", "application/pdf")] {
            data.attachments.push(AttachmentRecord {
                id: Uuid::new_v4(),
                message_id: Uuid::new_v4(),
                file_name: Some(name.to_string()),
                file_type: Some(mime.to_string()),
                file_size: None,
                extracted_text: None,
                source_json: None,
            });
        }

        let results = AttachmentAnnotator.annotate(&data);
        let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
        assert!(keys.contains(&"has_attachments"));
        assert!(keys.contains(&"has_code_attachments"));
    }
}
