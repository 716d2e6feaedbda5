use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::Result;
use crate::base::{
    DialogueDecision, Extractor, ExtractorOptions, IncomingMessage, IngestContext,
    decide_dialogue, dialogue_record,
};
use crate::classify::{ClassifiedPart, classify_part};
use crate::claude::schema::{ChatMessage, Conversation};
use convarc_store::{AttachmentRecord, CitationRecord, ClaudeMessageMetaRecord, Store};
use convarc_types::{ExtractOutcome, PartType, Role, parse_timestamp};

/// Extractor for the linear provider format: an ordered message array with
/// no parent pointers. The chain is reconstructed with a running pointer;
/// each message's parent is the previous one's internal id.
pub struct ClaudeExtractor {
    options: ExtractorOptions,
}

impl ClaudeExtractor {
    pub fn new(options: ExtractorOptions) -> Self {
        Self { options }
    }
}

impl Default for ClaudeExtractor {
    fn default() -> Self {
        Self::new(ExtractorOptions::default())
    }
}

impl Extractor for ClaudeExtractor {
    fn source_id(&self) -> &'static str {
        "claude"
    }

    fn extract_dialogue(&self, store: &Store, raw: &Value) -> Result<Option<ExtractOutcome>> {
        let conversation: Conversation = serde_json::from_value(raw.clone())?;

        let Some(source_id) = conversation.uuid.clone() else {
            warn!("conversation missing uuid");
            return Ok(None);
        };

        let created_at = parse_timestamp(&conversation.created_at);
        let updated_at = parse_timestamp(&conversation.updated_at);

        let (dialogue_id, outcome) =
            match decide_dialogue(store, self.source_id(), &source_id, updated_at)? {
                DialogueDecision::Insert(id) => {
                    store.insert_dialogue(&dialogue_record(
                        id,
                        self.source_id(),
                        &source_id,
                        conversation.name.clone(),
                        created_at,
                        updated_at,
                        raw.clone(),
                    ))?;
                    (id, ExtractOutcome::New)
                }
                DialogueDecision::Update(id) => {
                    store.update_dialogue(&dialogue_record(
                        id,
                        self.source_id(),
                        &source_id,
                        conversation.name.clone(),
                        created_at,
                        updated_at,
                        raw.clone(),
                    ))?;
                    (id, ExtractOutcome::Updated)
                }
                DialogueDecision::Skip => return Ok(Some(ExtractOutcome::Skipped)),
            };

        let mut ctx = IngestContext::new(store, dialogue_id, self.source_id(), self.options)?;

        let mut previous: Option<Uuid> = None;
        for message_value in &conversation.chat_messages {
            let message: ChatMessage = serde_json::from_value(message_value.clone())?;
            let Some(message_source_id) = message.uuid.clone() else {
                continue;
            };

            let upsert = ctx.upsert_message(
                dialogue_id,
                IncomingMessage {
                    source_id: message_source_id,
                    parent_id: previous,
                    role: Role::normalize(message.sender.as_deref()),
                    author_id: None,
                    author_name: None,
                    created_at: parse_timestamp(&message.created_at),
                    updated_at: parse_timestamp(&message.updated_at),
                    source_json: message_value.clone(),
                },
            )?;

            if upsert.write_content {
                extract_content(&ctx, upsert.id, &message)?;
                extract_attachments(&ctx, upsert.id, &message)?;
                ctx.store().insert_claude_meta(&ClaudeMessageMetaRecord {
                    message_id: upsert.id,
                    source_json: message_value.clone(),
                })?;
            } else {
                // Unchanged message in a re-import: the chain pointer may
                // still differ when earlier messages were removed upstream
                ctx.store().set_message_parent(upsert.id, previous)?;
            }

            previous = Some(upsert.id);
        }

        ctx.finish()?;
        Ok(Some(outcome))
    }
}

fn extract_content(ctx: &IngestContext<'_>, message_id: Uuid, message: &ChatMessage) -> Result<()> {
    if !message.content.is_empty() {
        for (sequence, fragment) in message.content.iter().enumerate() {
            let classified = classify_part(fragment);
            let part_id = ctx.write_part(
                message_id,
                sequence as i64,
                classified,
                fragment.get("start_timestamp").and_then(parse_timestamp),
                fragment.get("stop_timestamp").and_then(parse_timestamp),
            )?;

            if let Some(citations) = fragment.get("citations").and_then(Value::as_array) {
                extract_citations(ctx, part_id, citations)?;
            }
        }
        return Ok(());
    }

    if let Some(text) = &message.text {
        ctx.write_part(
            message_id,
            0,
            ClassifiedPart {
                part_type: PartType::Text,
                text_content: Some(text.clone()),
                source_json: json!({"text": text}),
                ..Default::default()
            },
            None,
            None,
        )?;
    }

    Ok(())
}

fn extract_citations(
    ctx: &IngestContext<'_>,
    content_part_id: Uuid,
    citations: &[Value],
) -> Result<()> {
    for citation in citations {
        let details = citation.get("details").cloned().unwrap_or(Value::Null);
        ctx.store().insert_citation(&CitationRecord {
            id: Uuid::new_v4(),
            content_part_id,
            source_id: str_of(citation, "uuid"),
            url: str_of(&details, "url"),
            title: None,
            snippet: None,
            published_at: None,
            start_index: int_of(citation, "start_index"),
            end_index: int_of(citation, "end_index"),
            citation_type: str_of(&details, "type"),
            source_json: Some(citation.clone()),
        })?;
    }
    Ok(())
}

fn extract_attachments(
    ctx: &IngestContext<'_>,
    message_id: Uuid,
    message: &ChatMessage,
) -> Result<()> {
    for attachment in &message.attachments {
        ctx.store().insert_attachment(&AttachmentRecord {
            id: Uuid::new_v4(),
            message_id,
            file_name: str_of(attachment, "file_name"),
            file_type: str_of(attachment, "file_type"),
            file_size: int_of(attachment, "file_size"),
            extracted_text: str_of(attachment, "extracted_content"),
            source_json: Some(attachment.clone()),
        })?;
    }

    for file in &message.files {
        if str_of(file, "file_name").is_some() {
            ctx.store().insert_attachment(&AttachmentRecord {
                id: Uuid::new_v4(),
                message_id,
                file_name: str_of(file, "file_name"),
                file_type: None,
                file_size: None,
                extracted_text: None,
                source_json: Some(file.clone()),
            })?;
        }
    }

    Ok(())
}

fn str_of(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_of(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}
