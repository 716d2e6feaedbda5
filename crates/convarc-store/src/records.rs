use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use convarc_types::{BranchReason, EntityType, HashScope, Normalization, PartType, Role};

/// One imported conversation. Natural key is (source, source_id); the
/// internal id never changes once assigned.
#[derive(Debug, Clone)]
pub struct DialogueRecord {
    pub id: Uuid,
    pub source: String,
    pub source_id: String,
    pub title: Option<String>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub source_json: Value,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: Uuid,
    pub dialogue_id: Uuid,
    pub source_id: String,
    pub parent_id: Option<Uuid>,
    pub role: Role,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ContentPartRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub sequence: i64,
    pub part_type: PartType,
    pub text_content: Option<String>,
    pub language: Option<String>,
    pub media_type: Option<String>,
    pub url: Option<String>,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub tool_input: Option<Value>,
    pub is_error: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct CitationRecord {
    pub id: Uuid,
    pub content_part_id: Uuid,
    pub source_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub start_index: Option<i64>,
    pub end_index: Option<i64>,
    pub citation_type: Option<String>,
    pub source_json: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct AttachmentRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub extracted_text: Option<String>,
    pub source_json: Option<Value>,
}

// ChatGPT side tables

#[derive(Debug, Clone)]
pub struct ChatGptMessageMetaRecord {
    pub message_id: Uuid,
    pub model_slug: Option<String>,
    pub status: Option<String>,
    pub end_turn: Option<bool>,
    pub gizmo_id: Option<String>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ChatGptSearchGroupRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub group_type: Option<String>,
    pub domain: Option<String>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ChatGptSearchEntryRecord {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sequence: i64,
    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub attribution: Option<String>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ChatGptCodeExecutionRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub run_id: Option<String>,
    pub status: Option<String>,
    pub code: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_output: Option<String>,
    pub exception_name: Option<String>,
    pub exception_traceback: Option<String>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ChatGptCodeOutputRecord {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub sequence: i64,
    pub output_type: Option<String>,
    pub stream_name: Option<String>,
    pub text_content: Option<String>,
    pub image_url: Option<String>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ChatGptDalleGenerationRecord {
    pub id: Uuid,
    pub content_part_id: Uuid,
    pub gen_id: Option<String>,
    pub prompt: Option<String>,
    pub seed: Option<i64>,
    pub parent_gen_id: Option<String>,
    pub edit_op: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ChatGptCanvasDocRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub textdoc_id: Option<String>,
    pub textdoc_type: Option<String>,
    pub version: Option<i64>,
    pub title: Option<String>,
    pub from_version: Option<i64>,
    pub content_length: Option<i64>,
    pub has_user_edit: Option<bool>,
    pub source_json: Value,
}

#[derive(Debug, Clone)]
pub struct ClaudeMessageMetaRecord {
    pub message_id: Uuid,
    pub source_json: Value,
}

// Derived records

#[derive(Debug, Clone)]
pub struct DialogueTreeRecord {
    pub dialogue_id: Uuid,
    pub total_nodes: i64,
    pub max_depth: i64,
    pub branch_count: i64,
    pub leaf_count: i64,
    pub primary_leaf_id: Option<Uuid>,
    pub primary_path_length: i64,
    pub has_regenerations: bool,
    pub has_edits: bool,
}

#[derive(Debug, Clone)]
pub struct MessagePathRecord {
    pub message_id: Uuid,
    pub dialogue_id: Uuid,
    /// Ancestor ids from root to parent (excludes the message itself)
    pub ancestor_path: Vec<Uuid>,
    pub depth: i64,
    pub is_root: bool,
    pub is_leaf: bool,
    pub child_count: i64,
    pub sibling_index: i64,
    pub is_on_primary_path: bool,
}

#[derive(Debug, Clone)]
pub struct LinearSequenceRecord {
    pub id: Uuid,
    pub dialogue_id: Uuid,
    pub leaf_message_id: Uuid,
    pub sequence_length: i64,
    pub is_primary: bool,
    pub branch_reason: Option<BranchReason>,
    pub branched_at_message_id: Option<Uuid>,
    pub branched_at_depth: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SequenceMessageRecord {
    pub sequence_id: Uuid,
    pub message_id: Uuid,
    pub position: i64,
}

#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub position: i64,
    pub first_message_id: Uuid,
    pub last_message_id: Uuid,
    pub message_count: i64,
    pub user_message_count: i64,
    pub assistant_message_count: i64,
    pub is_continuation: bool,
    pub merged_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ExchangeMessageRecord {
    pub exchange_id: Uuid,
    pub message_id: Uuid,
    pub position: i64,
}

#[derive(Debug, Clone)]
pub struct ExchangeContentRecord {
    pub exchange_id: Uuid,
    pub user_text: Option<String>,
    pub assistant_text: Option<String>,
    pub full_text: Option<String>,
    pub user_text_hash: Option<String>,
    pub assistant_text_hash: Option<String>,
    pub full_text_hash: Option<String>,
    pub user_word_count: i64,
    pub assistant_word_count: i64,
    pub total_word_count: i64,
}

#[derive(Debug, Clone)]
pub struct ContentHashRecord {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub hash_scope: HashScope,
    pub normalization: Normalization,
    pub hash_sha256: String,
}

#[derive(Debug, Clone)]
pub struct PromptResponseRecord {
    pub id: Uuid,
    pub dialogue_id: Uuid,
    pub prompt_message_id: Uuid,
    pub response_message_id: Uuid,
    pub prompt_position: i64,
    pub response_position: i64,
    pub prompt_role: Role,
    pub response_role: Role,
}

#[derive(Debug, Clone)]
pub struct PromptResponseContentRecord {
    pub prompt_response_id: Uuid,
    pub prompt_text: Option<String>,
    pub response_text: Option<String>,
    pub prompt_word_count: i64,
    pub response_word_count: i64,
}

/// Incremental-processing cursor for one annotator version
#[derive(Debug, Clone)]
pub struct AnnotatorCursorRecord {
    pub id: Uuid,
    pub annotator_name: String,
    pub annotator_version: String,
    pub entity_type: EntityType,
    pub high_water_mark: DateTime<Utc>,
    pub entities_processed: i64,
    pub annotations_created: i64,
    pub cumulative_runtime_seconds: f64,
    pub updated_at: DateTime<Utc>,
}
