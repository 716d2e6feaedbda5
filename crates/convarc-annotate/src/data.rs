use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;
use convarc_store::{
    AttachmentRecord, ChatGptCanvasDocRecord, ChatGptCodeExecutionRecord,
    ChatGptDalleGenerationRecord, ChatGptSearchGroupRecord, Store,
};
use convarc_types::{Role, word_count};

/// One message with its concatenated text content
#[derive(Debug, Clone)]
pub struct MessageTextData {
    pub message_id: Uuid,
    pub dialogue_id: Uuid,
    pub role: Role,
    pub text: String,
}

/// One exchange's aggregated content
#[derive(Debug, Clone)]
pub struct ExchangeData {
    pub exchange_id: Uuid,
    pub user_text: Option<String>,
    pub assistant_text: Option<String>,
    pub full_text: Option<String>,
    pub user_word_count: i64,
    pub assistant_word_count: i64,
    pub total_word_count: i64,
}

/// One exchange plus the provider side-table evidence for its messages,
/// prefetched so platform annotators stay pure functions
#[derive(Debug, Clone)]
pub struct ExchangePlatformData {
    pub exchange_id: Uuid,
    pub message_ids: Vec<Uuid>,
    pub user_message_ids: Vec<Uuid>,
    pub search_groups: Vec<ChatGptSearchGroupRecord>,
    pub code_executions: Vec<ChatGptCodeExecutionRecord>,
    pub canvas_docs: Vec<ChatGptCanvasDocRecord>,
    pub gizmo_ids: Vec<String>,
    pub attachments: Vec<AttachmentRecord>,
    pub dalle_generations: Vec<ChatGptDalleGenerationRecord>,
}

/// Aggregate statistics over one dialogue
#[derive(Debug, Clone)]
pub struct DialogueData {
    pub dialogue_id: Uuid,
    pub exchange_count: i64,
    pub message_count: i64,
    pub user_message_count: i64,
    pub assistant_message_count: i64,
    pub user_word_counts: Vec<i64>,
    pub first_user_text: Option<String>,
    pub user_texts: Vec<String>,
    pub assistant_texts: Vec<String>,
}

/// One text content part with its location inside the message
#[derive(Debug, Clone)]
pub struct ContentPartData {
    pub part_id: Uuid,
    pub message_id: Uuid,
    pub sequence: i64,
    pub role: Role,
    pub text: String,
}

/// One prompt-response pair with its aggregated content
#[derive(Debug, Clone)]
pub struct PromptResponseData {
    pub pair_id: Uuid,
    pub dialogue_id: Uuid,
    pub response_role: Role,
    pub prompt_text: Option<String>,
    pub response_text: Option<String>,
    pub prompt_word_count: i64,
    pub response_word_count: i64,
}

type Loaded<D> = Vec<(Uuid, D, DateTime<Utc>)>;

/// Messages with text content after the mark (text-less messages are
/// outside every message annotator's scope)
pub fn load_messages_after(store: &Store, mark: DateTime<Utc>) -> Result<Loaded<MessageTextData>> {
    let mut items = Vec::new();
    for (message, sort_ts) in store.messages_after(mark)? {
        let Some(text) = store.message_text(message.id)? else {
            continue;
        };
        items.push((
            message.id,
            MessageTextData {
                message_id: message.id,
                dialogue_id: message.dialogue_id,
                role: message.role,
                text,
            },
            sort_ts,
        ));
    }
    Ok(items)
}

pub fn load_exchanges_after(store: &Store, mark: DateTime<Utc>) -> Result<Loaded<ExchangeData>> {
    let mut items = Vec::new();
    for (exchange, sort_ts) in store.exchanges_after(mark)? {
        let Some(content) = store.get_exchange_content(exchange.id)? else {
            continue;
        };
        items.push((
            exchange.id,
            ExchangeData {
                exchange_id: exchange.id,
                user_text: content.user_text,
                assistant_text: content.assistant_text,
                full_text: content.full_text,
                user_word_count: content.user_word_count,
                assistant_word_count: content.assistant_word_count,
                total_word_count: content.total_word_count,
            },
            sort_ts,
        ));
    }
    Ok(items)
}

pub fn load_platform_exchanges_after(
    store: &Store,
    mark: DateTime<Utc>,
) -> Result<Loaded<ExchangePlatformData>> {
    let mut items = Vec::new();
    for (exchange, sort_ts) in store.exchanges_after(mark)? {
        let message_ids = store.exchange_message_ids(exchange.id)?;
        let mut user_message_ids = Vec::new();
        for message_id in &message_ids {
            if let Some(message) = store.get_message(*message_id)? {
                if message.role == Role::User {
                    user_message_ids.push(*message_id);
                }
            }
        }

        items.push((
            exchange.id,
            ExchangePlatformData {
                exchange_id: exchange.id,
                search_groups: store.search_groups_for_messages(&message_ids)?,
                code_executions: store.code_executions_for_messages(&message_ids)?,
                canvas_docs: store.canvas_docs_for_messages(&message_ids)?,
                gizmo_ids: store.gizmo_ids_for_messages(&message_ids)?,
                attachments: store.attachments_for_messages(&user_message_ids)?,
                dalle_generations: store.dalle_generations_for_messages(&message_ids)?,
                message_ids,
                user_message_ids,
            },
            sort_ts,
        ));
    }
    Ok(items)
}

pub fn load_dialogues_after(store: &Store, mark: DateTime<Utc>) -> Result<Loaded<DialogueData>> {
    let mut items = Vec::new();
    for (dialogue, sort_ts) in store.dialogues_after(mark)? {
        let messages = store.messages_for_dialogue(dialogue.id, false)?;
        let exchange_count = store.primary_exchanges_for_dialogue(dialogue.id)?.len() as i64;

        let mut data = DialogueData {
            dialogue_id: dialogue.id,
            exchange_count,
            message_count: messages.len() as i64,
            user_message_count: 0,
            assistant_message_count: 0,
            user_word_counts: Vec::new(),
            first_user_text: None,
            user_texts: Vec::new(),
            assistant_texts: Vec::new(),
        };

        for message in &messages {
            match message.role {
                Role::User => {
                    data.user_message_count += 1;
                    if let Some(text) = store.message_text(message.id)? {
                        data.user_word_counts.push(word_count(Some(&text)) as i64);
                        if data.first_user_text.is_none() {
                            data.first_user_text = Some(text.clone());
                        }
                        data.user_texts.push(text);
                    }
                }
                Role::Assistant => {
                    data.assistant_message_count += 1;
                    if let Some(text) = store.message_text(message.id)? {
                        data.assistant_texts.push(text);
                    }
                }
                _ => {}
            }
        }

        items.push((dialogue.id, data, sort_ts));
    }
    Ok(items)
}

pub fn load_text_parts_after(
    store: &Store,
    mark: DateTime<Utc>,
) -> Result<Loaded<ContentPartData>> {
    let mut items = Vec::new();
    for (part, role, sort_ts) in store.text_parts_after(mark)? {
        let Some(text) = part.text_content else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        items.push((
            part.id,
            ContentPartData {
                part_id: part.id,
                message_id: part.message_id,
                sequence: part.sequence,
                role,
                text,
            },
            sort_ts,
        ));
    }
    Ok(items)
}

pub fn load_prompt_responses_after(
    store: &Store,
    mark: DateTime<Utc>,
) -> Result<Loaded<PromptResponseData>> {
    let mut items = Vec::new();
    for (pair, sort_ts) in store.prompt_responses_after(mark)? {
        let Some(content) = store.get_prompt_response_content(pair.id)? else {
            continue;
        };
        items.push((
            pair.id,
            PromptResponseData {
                pair_id: pair.id,
                dialogue_id: pair.dialogue_id,
                response_role: pair.response_role,
                prompt_text: content.prompt_text,
                response_text: content.response_text,
                prompt_word_count: content.prompt_word_count,
                response_word_count: content.response_word_count,
            },
            sort_ts,
        ));
    }
    Ok(items)
}
