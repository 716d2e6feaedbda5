use std::collections::{HashMap, HashSet};

use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;
use convarc_store::{MessageRecord, PromptResponseContentRecord, PromptResponseRecord, Store};
use convarc_types::{Role, word_count};

/// Per-dialogue result of one prompt-response build
#[derive(Debug, Clone, Copy, Default)]
pub struct DialoguePromptResponseCounts {
    pub prompt_responses: usize,
    pub content_records: usize,
}

/// Batch totals for one prompt-response run
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptResponseCounts {
    pub dialogues: usize,
    pub prompt_responses: usize,
    pub content_records: usize,
    pub failed: usize,
}

/// Pairs each non-user message with its eliciting user prompt without any
/// tree dependency: the parent chain when pointers exist (walking up
/// through non-user parents), the most recent user message otherwise.
/// Orthogonal to LinearSequence; a subset of annotators reads this view.
pub struct PromptResponseBuilder<'a> {
    store: &'a Store,
}

impl<'a> PromptResponseBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn build_all(&self) -> PromptResponseCounts {
        info!("prompt-response building started");
        let mut counts = PromptResponseCounts::default();

        let dialogues = match self.store.list_dialogues() {
            Ok(dialogues) => dialogues,
            Err(err) => {
                warn!(error = %err, "could not list dialogues");
                counts.failed += 1;
                return counts;
            }
        };

        for dialogue in dialogues {
            if self.store.begin().is_err() {
                counts.failed += 1;
                continue;
            }
            match self.build_for_dialogue(dialogue.id) {
                Ok(result) => {
                    if self.store.commit().is_err() {
                        let _ = self.store.rollback();
                        counts.failed += 1;
                        continue;
                    }
                    counts.dialogues += 1;
                    counts.prompt_responses += result.prompt_responses;
                    counts.content_records += result.content_records;
                }
                Err(err) => {
                    warn!(dialogue = %dialogue.id, error = %err, "prompt-response build failed");
                    let _ = self.store.rollback();
                    counts.failed += 1;
                }
            }
        }

        info!(
            dialogues = counts.dialogues,
            prompt_responses = counts.prompt_responses,
            failed = counts.failed,
            "prompt-response building finished"
        );
        counts
    }

    pub fn build_for_dialogue(&self, dialogue_id: Uuid) -> Result<DialoguePromptResponseCounts> {
        self.store.clear_prompt_responses_for_dialogue(dialogue_id)?;

        let messages = self.store.messages_for_dialogue(dialogue_id, false)?;
        if messages.is_empty() {
            return Ok(DialoguePromptResponseCounts::default());
        }

        let by_id: HashMap<Uuid, &MessageRecord> = messages.iter().map(|m| (m.id, m)).collect();
        let position_by_id: HashMap<Uuid, i64> = messages
            .iter()
            .enumerate()
            .map(|(index, m)| (m.id, index as i64))
            .collect();

        let mut counts = DialoguePromptResponseCounts::default();
        let mut last_user: Option<&MessageRecord> = None;

        for message in &messages {
            if message.role == Role::User {
                last_user = Some(message);
                continue;
            }

            let Some(prompt) = find_prompt(message, &by_id, last_user) else {
                // A response without any prompt (e.g. a system greeting)
                continue;
            };

            let pair = PromptResponseRecord {
                id: Uuid::new_v4(),
                dialogue_id,
                prompt_message_id: prompt.id,
                response_message_id: message.id,
                prompt_position: position_by_id.get(&prompt.id).copied().unwrap_or(0),
                response_position: position_by_id.get(&message.id).copied().unwrap_or(0),
                prompt_role: prompt.role.clone(),
                response_role: message.role.clone(),
            };
            self.store.insert_prompt_response(&pair)?;
            counts.prompt_responses += 1;

            let prompt_text = self.store.message_plain_text(prompt.id)?;
            let response_text = self.store.message_plain_text(message.id)?;
            self.store
                .insert_prompt_response_content(&PromptResponseContentRecord {
                    prompt_response_id: pair.id,
                    prompt_word_count: word_count(prompt_text.as_deref()) as i64,
                    response_word_count: word_count(response_text.as_deref()) as i64,
                    prompt_text,
                    response_text,
                })?;
            counts.content_records += 1;
        }

        Ok(counts)
    }
}

/// Find the user prompt that elicited a response. Parent chain first,
/// walking up through non-user parents (assistant -> tool_result ->
/// assistant chains); most recent user message as fallback.
fn find_prompt<'m>(
    response: &MessageRecord,
    by_id: &HashMap<Uuid, &'m MessageRecord>,
    last_user: Option<&'m MessageRecord>,
) -> Option<&'m MessageRecord> {
    if let Some(parent_id) = response.parent_id {
        if let Some(parent) = by_id.get(&parent_id).copied() {
            if parent.role == Role::User {
                return Some(parent);
            }
            let mut visited: HashSet<Uuid> = HashSet::new();
            visited.insert(response.id);
            let mut current = parent;
            while visited.insert(current.id) {
                if current.role == Role::User {
                    return Some(current);
                }
                match current.parent_id.and_then(|id| by_id.get(&id).copied()) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
    }

    last_user
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn message(
        dialogue_id: Uuid,
        role: Role,
        parent_id: Option<Uuid>,
        epoch: i64,
    ) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            dialogue_id,
            source_id: Uuid::new_v4().to_string(),
            parent_id,
            role,
            author_id: None,
            author_name: None,
            created_at: Some(Utc.timestamp_opt(epoch, 0).unwrap()),
            updated_at: None,
            content_hash: None,
            deleted_at: None,
            source_json: json!({}),
        }
    }

    #[test]
    fn test_find_prompt_prefers_parent_chain() {
        let dialogue_id = Uuid::new_v4();
        let early_user = message(dialogue_id, Role::User, None, 1);
        let late_user = message(dialogue_id, Role::User, None, 5);
        let response = message(dialogue_id, Role::Assistant, Some(early_user.id), 6);

        let by_id: HashMap<Uuid, &MessageRecord> = [&early_user, &late_user, &response]
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let prompt = find_prompt(&response, &by_id, Some(&late_user)).unwrap();
        assert_eq!(prompt.id, early_user.id);
    }

    #[test]
    fn test_find_prompt_walks_through_non_user_parents() {
        let dialogue_id = Uuid::new_v4();
        let user = message(dialogue_id, Role::User, None, 1);
        let assistant = message(dialogue_id, Role::Assistant, Some(user.id), 2);
        let tool = message(dialogue_id, Role::Tool, Some(assistant.id), 3);
        let response = message(dialogue_id, Role::Assistant, Some(tool.id), 4);

        let by_id: HashMap<Uuid, &MessageRecord> = [&user, &assistant, &tool, &response]
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let prompt = find_prompt(&response, &by_id, None).unwrap();
        assert_eq!(prompt.id, user.id);
    }

    #[test]
    fn test_find_prompt_falls_back_to_most_recent_user() {
        let dialogue_id = Uuid::new_v4();
        let user = message(dialogue_id, Role::User, None, 1);
        let response = message(dialogue_id, Role::Assistant, None, 2);

        let by_id: HashMap<Uuid, &MessageRecord> =
            [&user, &response].into_iter().map(|m| (m.id, m)).collect();

        let prompt = find_prompt(&response, &by_id, Some(&user)).unwrap();
        assert_eq!(prompt.id, user.id);
    }

    #[test]
    fn test_no_prompt_available() {
        let dialogue_id = Uuid::new_v4();
        let response = message(dialogue_id, Role::Assistant, None, 2);
        let by_id: HashMap<Uuid, &MessageRecord> =
            [&response].into_iter().map(|m| (m.id, m)).collect();

        assert!(find_prompt(&response, &by_id, None).is_none());
    }
}
