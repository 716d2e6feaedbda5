use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::Result;
use crate::base::{
    DialogueDecision, Extractor, ExtractorOptions, IncomingMessage, IngestContext,
    decide_dialogue, dialogue_record,
};
use crate::chatgpt::schema::{Conversation, Node, NodeMessage};
use convarc_store::{
    AttachmentRecord, ChatGptCanvasDocRecord, ChatGptCodeExecutionRecord, ChatGptCodeOutputRecord,
    ChatGptDalleGenerationRecord, ChatGptMessageMetaRecord, ChatGptSearchEntryRecord,
    ChatGptSearchGroupRecord, CitationRecord, Store, WriteContext,
};
use convarc_types::{EntityType, ExtractOutcome, Role, parse_timestamp};

/// Extractor for the branched provider format: conversations arrive as a
/// node map with parent/children pointers, where parents may appear after
/// their children. Extraction is two-pass; every message is created with a
/// null parent first and pointers are resolved afterwards through the
/// node-id map.
pub struct ChatGptExtractor {
    options: ExtractorOptions,
}

impl ChatGptExtractor {
    pub fn new(options: ExtractorOptions) -> Self {
        Self { options }
    }
}

impl Default for ChatGptExtractor {
    fn default() -> Self {
        Self::new(ExtractorOptions::default())
    }
}

impl Extractor for ChatGptExtractor {
    fn source_id(&self) -> &'static str {
        "chatgpt"
    }

    fn extract_dialogue(&self, store: &Store, raw: &Value) -> Result<Option<ExtractOutcome>> {
        let conversation: Conversation = serde_json::from_value(raw.clone())?;

        let Some(source_id) = conversation
            .conversation_id
            .clone()
            .or_else(|| conversation.id.clone())
        else {
            warn!("conversation missing id");
            return Ok(None);
        };

        let created_at = parse_timestamp(&conversation.create_time);
        let updated_at = parse_timestamp(&conversation.update_time);

        let (dialogue_id, outcome) =
            match decide_dialogue(store, self.source_id(), &source_id, updated_at)? {
                DialogueDecision::Insert(id) => {
                    store.insert_dialogue(&dialogue_record(
                        id,
                        self.source_id(),
                        &source_id,
                        conversation.title.clone(),
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
                        conversation.title.clone(),
                        created_at,
                        updated_at,
                        raw.clone(),
                    ))?;
                    (id, ExtractOutcome::Updated)
                }
                DialogueDecision::Skip => return Ok(Some(ExtractOutcome::Skipped)),
            };

        let mut ctx = IngestContext::new(store, dialogue_id, self.source_id(), self.options)?;

        // First pass: upsert every message with parent_id = null and record
        // the node-id -> parent-node-id links for the second pass
        let mut parent_links: HashMap<String, String> = HashMap::new();
        for (node_id, node_value) in &conversation.mapping {
            let node: Node = serde_json::from_value(node_value.clone())?;
            if let Some(parent) = node.parent.clone() {
                parent_links.insert(node_id.clone(), parent);
            }

            let Some(message) = node.message else {
                continue;
            };
            let Some(role) = message.author.role.clone() else {
                continue;
            };
            let message_source_id = message.id.clone().unwrap_or_else(|| node_id.clone());

            let upsert = ctx.upsert_message(
                dialogue_id,
                IncomingMessage {
                    source_id: message_source_id.clone(),
                    parent_id: None,
                    role: Role::normalize(Some(&role)),
                    author_id: message.author.name.clone(),
                    author_name: message.author.name.clone(),
                    created_at: parse_timestamp(&message.create_time),
                    updated_at: parse_timestamp(&message.update_time),
                    source_json: node_value.clone(),
                },
            )?;

            ctx.register(node_id, upsert.id);
            if message_source_id != *node_id {
                ctx.register(&message_source_id, upsert.id);
            }

            if upsert.write_content {
                extract_content(&ctx, upsert.id, &message)?;
                extract_meta(&ctx, upsert.id, &message)?;
                extract_attachments(&ctx, upsert.id, &message.metadata)?;
                emit_platform_annotations(&ctx, upsert.id, &message.metadata)?;
            }
        }

        // Second pass: resolve parent pointers; incoming trees whose parent
        // chain closes on itself are rejected wholesale
        ctx.reject_cycles(&parent_links)?;
        for (node_id, parent_node_id) in &parent_links {
            if let (Some(child), Some(parent)) = (ctx.resolve(node_id), ctx.resolve(parent_node_id))
            {
                store.set_message_parent(child, Some(parent))?;
            }
        }

        ctx.finish()?;
        Ok(Some(outcome))
    }
}

fn extract_content(ctx: &IngestContext<'_>, message_id: Uuid, message: &NodeMessage) -> Result<()> {
    let part_ids = ctx.write_parts(message_id, &message.content.parts)?;

    for (part_id, fragment) in part_ids.iter().zip(&message.content.parts) {
        if fragment.is_object() {
            extract_dalle_generation(ctx, *part_id, fragment)?;
        }
    }

    // Citations live in message metadata and attach to the first part
    if let (Some(first_part), Some(citations)) = (
        part_ids.first(),
        message.metadata.get("citations").and_then(Value::as_array),
    ) {
        for citation in citations {
            let meta = citation.get("metadata").cloned().unwrap_or(Value::Null);
            ctx.store().insert_citation(&CitationRecord {
                id: Uuid::new_v4(),
                content_part_id: *first_part,
                source_id: None,
                url: str_of(&meta, "url"),
                title: str_of(&meta, "title"),
                snippet: str_of(&meta, "text"),
                published_at: meta.get("pub_date").and_then(parse_timestamp_ref),
                start_index: int_of(citation, "start_ix"),
                end_index: int_of(citation, "end_ix"),
                citation_type: str_of(&meta, "type"),
                source_json: Some(citation.clone()),
            })?;
        }
    }

    Ok(())
}

fn extract_meta(ctx: &IngestContext<'_>, message_id: Uuid, message: &NodeMessage) -> Result<()> {
    let metadata = &message.metadata;

    ctx.store().insert_chatgpt_meta(&ChatGptMessageMetaRecord {
        message_id,
        model_slug: str_of(metadata, "model_slug"),
        status: message.status.clone(),
        end_turn: message.end_turn,
        gizmo_id: str_of(metadata, "gizmo_id"),
        source_json: metadata.clone(),
    })?;

    if let Some(groups) = metadata.get("search_result_groups").and_then(Value::as_array) {
        for group in groups {
            extract_search_group(ctx, message_id, group)?;
        }
    }

    if let Some(aggregate) = metadata.get("aggregate_result") {
        if aggregate.is_object() {
            extract_code_execution(ctx, message_id, aggregate)?;
        }
    }

    if let Some(canvas) = metadata.get("canvas") {
        if canvas.is_object() {
            ctx.store().insert_canvas_doc(&ChatGptCanvasDocRecord {
                id: Uuid::new_v4(),
                message_id,
                textdoc_id: str_of(canvas, "textdoc_id"),
                textdoc_type: str_of(canvas, "textdoc_type"),
                version: int_of(canvas, "version"),
                title: str_of(canvas, "title"),
                from_version: int_of(canvas, "from_version"),
                content_length: int_of(canvas, "textdoc_content_length"),
                has_user_edit: canvas.get("has_user_edit").and_then(Value::as_bool),
                source_json: canvas.clone(),
            })?;
        }
    }

    Ok(())
}

fn extract_search_group(ctx: &IngestContext<'_>, message_id: Uuid, group: &Value) -> Result<()> {
    let group_id = Uuid::new_v4();
    ctx.store().insert_search_group(&ChatGptSearchGroupRecord {
        id: group_id,
        message_id,
        group_type: str_of(group, "type"),
        domain: str_of(group, "domain"),
        source_json: group.clone(),
    })?;

    if let Some(entries) = group.get("entries").and_then(Value::as_array) {
        for (sequence, entry) in entries.iter().enumerate() {
            ctx.store().insert_search_entry(&ChatGptSearchEntryRecord {
                id: Uuid::new_v4(),
                group_id,
                sequence: sequence as i64,
                url: str_of(entry, "url"),
                title: str_of(entry, "title"),
                snippet: str_of(entry, "snippet"),
                published_at: entry.get("pub_date").and_then(parse_timestamp_ref),
                attribution: str_of(entry, "attribution"),
                source_json: entry.clone(),
            })?;
        }
    }

    Ok(())
}

fn extract_code_execution(
    ctx: &IngestContext<'_>,
    message_id: Uuid,
    aggregate: &Value,
) -> Result<()> {
    let exception = aggregate.get("in_kernel_exception").cloned().unwrap_or(Value::Null);
    let traceback = exception
        .get("traceback")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|t| !t.is_empty());

    let execution_id = Uuid::new_v4();
    ctx.store()
        .insert_code_execution(&ChatGptCodeExecutionRecord {
            id: execution_id,
            message_id,
            run_id: str_of(aggregate, "run_id"),
            status: str_of(aggregate, "status"),
            code: str_of(aggregate, "code"),
            started_at: aggregate.get("start_time").and_then(parse_timestamp_ref),
            ended_at: aggregate.get("end_time").and_then(parse_timestamp_ref),
            final_output: str_of(aggregate, "final_expression_output"),
            exception_name: str_of(&exception, "name"),
            exception_traceback: traceback,
            source_json: aggregate.clone(),
        })?;

    if let Some(outputs) = aggregate.get("messages").and_then(Value::as_array) {
        for (sequence, output) in outputs.iter().enumerate() {
            ctx.store().insert_code_output(&ChatGptCodeOutputRecord {
                id: Uuid::new_v4(),
                execution_id,
                sequence: sequence as i64,
                output_type: str_of(output, "message_type"),
                stream_name: str_of(output, "stream_name"),
                text_content: str_of(output, "text"),
                image_url: str_of(output, "image_url"),
                source_json: output.clone(),
            })?;
        }
    }

    Ok(())
}

fn extract_dalle_generation(
    ctx: &IngestContext<'_>,
    content_part_id: Uuid,
    fragment: &Value,
) -> Result<()> {
    let metadata = fragment.get("metadata").cloned().unwrap_or(Value::Null);
    let Some(dalle) = metadata
        .get("dalle")
        .or_else(|| metadata.get("generation"))
        .filter(|d| d.is_object())
    else {
        return Ok(());
    };

    ctx.store()
        .insert_dalle_generation(&ChatGptDalleGenerationRecord {
            id: Uuid::new_v4(),
            content_part_id,
            gen_id: str_of(dalle, "gen_id"),
            prompt: str_of(dalle, "prompt"),
            seed: int_of(dalle, "seed"),
            parent_gen_id: str_of(dalle, "parent_gen_id"),
            edit_op: str_of(dalle, "edit_op"),
            width: int_of(dalle, "width").or_else(|| int_of(fragment, "width")),
            height: int_of(dalle, "height").or_else(|| int_of(fragment, "height")),
            source_json: dalle.clone(),
        })?;

    Ok(())
}

fn extract_attachments(ctx: &IngestContext<'_>, message_id: Uuid, metadata: &Value) -> Result<()> {
    let Some(attachments) = metadata.get("attachments").and_then(Value::as_array) else {
        return Ok(());
    };

    for attachment in attachments {
        ctx.store().insert_attachment(&AttachmentRecord {
            id: Uuid::new_v4(),
            message_id,
            file_name: str_of(attachment, "name"),
            file_type: str_of(attachment, "mime_type").or_else(|| str_of(attachment, "mimeType")),
            file_size: int_of(attachment, "size"),
            extracted_text: None,
            source_json: Some(attachment.clone()),
        })?;
    }

    Ok(())
}

/// Model slug and gizmo evidence double as message annotations so the
/// annotation substrate can filter on them without touching side tables
fn emit_platform_annotations(
    ctx: &IngestContext<'_>,
    message_id: Uuid,
    metadata: &Value,
) -> Result<()> {
    let writer = ctx.writer();

    if let Some(slug) = str_of(metadata, "model_slug") {
        writer.write_string(
            EntityType::Message,
            message_id,
            "model_slug",
            &slug,
            "chatgpt",
            WriteContext::default(),
        )?;
    }

    if let Some(gizmo_id) = str_of(metadata, "gizmo_id") {
        writer.write_string(
            EntityType::Message,
            message_id,
            "gizmo_id",
            &gizmo_id,
            "chatgpt",
            WriteContext::default(),
        )?;
        writer.write_flag(
            EntityType::Message,
            message_id,
            "has_gizmo",
            "chatgpt",
            WriteContext::default(),
        )?;
    }

    Ok(())
}

fn str_of(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_of(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

fn parse_timestamp_ref(value: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    parse_timestamp(value)
}
