use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;
use convarc_store::{
    ExchangeContentRecord, ExchangeMessageRecord, ExchangeRecord, Store,
};
use convarc_types::{Role, sha256_hex, word_count};

/// Short user texts matching one of these (exactly, or as a prefix followed
/// by a space or `?`) are continuation prompts
const CONTINUATION_VOCABULARY: &[&str] = &[
    "continue",
    "more",
    "keep going",
    "go on",
    "next",
    "tell me more",
    "expand",
    "keep writing",
    "finish",
    "elaborate",
    "do go on",
    "make it so",
    "yes",
    "please",
    "do it",
    "proceed",
    "carry on",
    "and then",
    "what else",
    "go ahead",
    "sure",
    "ok",
    "okay",
    "yes please",
];

/// Detect a continuation prompt: a short message asking the assistant to
/// keep going, or a markdown quote whose last line is an elaboration cue.
pub fn is_continuation_prompt(text: Option<&str>) -> bool {
    let Some(text) = text else {
        return false;
    };
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return false;
    }

    if text.split_whitespace().count() <= 5 {
        for pattern in CONTINUATION_VOCABULARY {
            if text == *pattern
                || text.starts_with(&format!("{} ", pattern))
                || text.starts_with(&format!("{}?", pattern))
            {
                return true;
            }
        }
    }

    if text.starts_with('>') {
        let last_line = text.lines().last().map(str::trim).unwrap_or("");
        if matches!(last_line, "elaborate" | "continue" | "expand" | "more") {
            return true;
        }
    }

    false
}

/// SHA-256 over whitespace-normalized text; `None` for empty input
fn compute_hash(text: Option<&str>) -> Option<String> {
    let text = text?;
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }
    Some(sha256_hex(&normalized))
}

/// Lightweight message view for exchange building
#[derive(Debug, Clone)]
struct MessageInfo {
    message_id: Uuid,
    role: Role,
    created_at: Option<DateTime<Utc>>,
    text_content: Option<String>,
}

/// Pre-merge prompt/response unit
#[derive(Debug, Default)]
struct Dyad {
    messages: Vec<MessageInfo>,
}

impl Dyad {
    fn first_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.text_content.as_deref())
    }
}

/// Per-sequence result of one exchange build
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceExchangeCounts {
    pub exchanges: usize,
    pub exchange_messages: usize,
    pub continuations: usize,
}

/// Batch totals for one exchange-building run
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeCounts {
    pub sequences: usize,
    pub exchanges: usize,
    pub exchange_messages: usize,
    pub continuations: usize,
    pub failed: usize,
}

/// Groups each linear sequence into prompt-plus-response exchanges.
///
/// Dyadic segmentation first (a group closes when its last two messages are
/// user then assistant), then continuation prompts merge consecutive dyads
/// into one exchange. A continuation opening a sequence has nothing to
/// merge into and stays its own exchange.
pub struct ExchangeBuilder<'a> {
    store: &'a Store,
}

impl<'a> ExchangeBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn build_all(&self) -> ExchangeCounts {
        info!("exchange building started");
        let mut counts = ExchangeCounts::default();

        let sequences = match self.store.list_sequences() {
            Ok(sequences) => sequences,
            Err(err) => {
                warn!(error = %err, "could not list sequences");
                counts.failed += 1;
                return counts;
            }
        };

        for sequence in sequences {
            if self.store.begin().is_err() {
                counts.failed += 1;
                continue;
            }
            match self.build_for_sequence(sequence.id) {
                Ok(result) => {
                    if self.store.commit().is_err() {
                        let _ = self.store.rollback();
                        counts.failed += 1;
                        continue;
                    }
                    counts.sequences += 1;
                    counts.exchanges += result.exchanges;
                    counts.exchange_messages += result.exchange_messages;
                    counts.continuations += result.continuations;
                }
                Err(err) => {
                    warn!(sequence = %sequence.id, error = %err, "exchange build failed");
                    let _ = self.store.rollback();
                    counts.failed += 1;
                }
            }
        }

        info!(
            sequences = counts.sequences,
            exchanges = counts.exchanges,
            continuations = counts.continuations,
            failed = counts.failed,
            "exchange building finished"
        );
        counts
    }

    /// Rebuild exchanges for one sequence; clears ExchangeContent,
    /// ExchangeMessages and Exchanges in that order first.
    pub fn build_for_sequence(&self, sequence_id: Uuid) -> Result<SequenceExchangeCounts> {
        self.store.clear_exchanges_for_sequence(sequence_id)?;

        let messages = self.load_sequence_messages(sequence_id)?;
        if messages.is_empty() {
            return Ok(SequenceExchangeCounts::default());
        }

        let dyads = segment_dyads(messages);
        let groups = merge_continuations(dyads);

        let mut counts = SequenceExchangeCounts::default();
        for (position, group) in groups.iter().enumerate() {
            let written = self.persist_exchange(sequence_id, position as i64, group)?;
            counts.exchanges += 1;
            counts.exchange_messages += written;
            if group.len() > 1 {
                counts.continuations += 1;
            }
        }

        Ok(counts)
    }

    fn load_sequence_messages(&self, sequence_id: Uuid) -> Result<Vec<MessageInfo>> {
        let mut messages = Vec::new();
        for message_id in self.store.sequence_message_ids(sequence_id)? {
            let Some(record) = self.store.get_message(message_id)? else {
                continue;
            };
            messages.push(MessageInfo {
                message_id,
                role: record.role,
                created_at: record.created_at,
                text_content: self.store.message_text(message_id)?,
            });
        }
        Ok(messages)
    }

    fn persist_exchange(
        &self,
        sequence_id: Uuid,
        position: i64,
        group: &[Dyad],
    ) -> Result<usize> {
        let all_messages: Vec<&MessageInfo> =
            group.iter().flat_map(|dyad| dyad.messages.iter()).collect();

        let (Some(first), Some(last)) = (all_messages.first(), all_messages.last()) else {
            return Ok(0);
        };
        let user_count = all_messages.iter().filter(|m| m.role == Role::User).count() as i64;
        let assistant_count = all_messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count() as i64;

        let exchange = ExchangeRecord {
            id: Uuid::new_v4(),
            sequence_id,
            position,
            first_message_id: first.message_id,
            last_message_id: last.message_id,
            message_count: all_messages.len() as i64,
            user_message_count: user_count,
            assistant_message_count: assistant_count,
            is_continuation: group.len() > 1,
            merged_count: group.len() as i64,
            started_at: first.created_at,
            ended_at: last.created_at,
        };
        self.store.insert_exchange(&exchange)?;

        for (message_position, message) in all_messages.iter().enumerate() {
            self.store.insert_exchange_message(&ExchangeMessageRecord {
                exchange_id: exchange.id,
                message_id: message.message_id,
                position: message_position as i64,
            })?;
        }

        let user_texts: Vec<&str> = all_messages
            .iter()
            .filter(|m| m.role == Role::User)
            .filter_map(|m| m.text_content.as_deref())
            .collect();
        let assistant_texts: Vec<&str> = all_messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .filter_map(|m| m.text_content.as_deref())
            .collect();

        let user_text = (!user_texts.is_empty()).then(|| user_texts.join("\n\n"));
        let assistant_text = (!assistant_texts.is_empty()).then(|| assistant_texts.join("\n\n"));
        let full_text = match (&user_text, &assistant_text) {
            (Some(u), Some(a)) => Some(format!("{}\n\n{}", u, a)),
            (Some(u), None) => Some(u.clone()),
            (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };

        self.store.insert_exchange_content(&ExchangeContentRecord {
            exchange_id: exchange.id,
            user_text_hash: compute_hash(user_text.as_deref()),
            assistant_text_hash: compute_hash(assistant_text.as_deref()),
            full_text_hash: compute_hash(full_text.as_deref()),
            user_word_count: word_count(user_text.as_deref()) as i64,
            assistant_word_count: word_count(assistant_text.as_deref()) as i64,
            total_word_count: word_count(full_text.as_deref()) as i64,
            user_text,
            assistant_text,
            full_text,
        })?;

        Ok(all_messages.len())
    }
}

/// Walk the sequence and close a group whenever its last two messages are
/// (user, assistant) in that order. Roles other than user/assistant are
/// ignored; a trailing partial group becomes its own dyad.
fn segment_dyads(messages: Vec<MessageInfo>) -> Vec<Dyad> {
    let mut dyads = Vec::new();
    let mut current = Dyad::default();

    for message in messages {
        if message.role != Role::User && message.role != Role::Assistant {
            continue;
        }
        current.messages.push(message);

        let n = current.messages.len();
        if n >= 2
            && current.messages[n - 2].role == Role::User
            && current.messages[n - 1].role == Role::Assistant
        {
            dyads.push(std::mem::take(&mut current));
        }
    }

    if !current.messages.is_empty() {
        dyads.push(current);
    }

    dyads
}

/// Merge each continuation dyad into the group before it. The first dyad
/// has no predecessor, so a continuation there opens its own group.
fn merge_continuations(dyads: Vec<Dyad>) -> Vec<Vec<Dyad>> {
    let mut groups: Vec<Vec<Dyad>> = Vec::new();
    let mut current: Vec<Dyad> = Vec::new();

    for dyad in dyads {
        if current.is_empty() {
            current.push(dyad);
            continue;
        }
        if is_continuation_prompt(dyad.first_user_text()) {
            current.push(dyad);
        } else {
            groups.push(std::mem::take(&mut current));
            current.push(dyad);
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn info(role: Role, epoch: i64, text: &str) -> MessageInfo {
        MessageInfo {
            message_id: Uuid::new_v4(),
            role,
            created_at: Some(Utc.timestamp_opt(epoch, 0).unwrap()),
            text_content: Some(text.to_string()),
        }
    }

    #[test]
    fn test_continuation_vocabulary_matching() {
        assert!(is_continuation_prompt(Some("continue")));
        assert!(is_continuation_prompt(Some("Continue")));
        assert!(is_continuation_prompt(Some("keep going please")));
        assert!(is_continuation_prompt(Some("more?")));
        assert!(is_continuation_prompt(Some("  ok  ")));

        // Over five words fails the length gate
        assert!(!is_continuation_prompt(Some(
            "continue but first explain the previous answer again"
        )));
        assert!(!is_continuation_prompt(Some("what is rust")));
        assert!(!is_continuation_prompt(Some("")));
        assert!(!is_continuation_prompt(Some("   ")));
        assert!(!is_continuation_prompt(None));
    }

    #[test]
    fn test_quote_elaborate_pattern() {
        assert!(is_continuation_prompt(Some(
            "> the borrow checker enforces aliasing rules\nelaborate"
        )));
        assert!(!is_continuation_prompt(Some(
            "> the borrow checker enforces aliasing rules\nwhy though"
        )));
    }

    #[test]
    fn test_segment_dyads_pairs_user_assistant() {
        let messages = vec![
            info(Role::User, 1, "q1"),
            info(Role::Assistant, 2, "a1"),
            info(Role::User, 3, "q2"),
            info(Role::Assistant, 4, "a2"),
        ];
        let dyads = segment_dyads(messages);
        assert_eq!(dyads.len(), 2);
        assert_eq!(dyads[0].messages.len(), 2);
    }

    #[test]
    fn test_segment_dyads_ignores_system_and_keeps_trailing() {
        let messages = vec![
            info(Role::System, 0, "sys"),
            info(Role::User, 1, "q1"),
            info(Role::Assistant, 2, "a1"),
            info(Role::User, 3, "dangling"),
        ];
        let dyads = segment_dyads(messages);
        assert_eq!(dyads.len(), 2);
        assert_eq!(dyads[1].messages.len(), 1);
    }

    #[test]
    fn test_merge_continuations_groups() {
        let dyads = vec![
            Dyad {
                messages: vec![info(Role::User, 1, "write a story"), info(Role::Assistant, 2, "...")],
            },
            Dyad {
                messages: vec![info(Role::User, 3, "continue"), info(Role::Assistant, 4, "...")],
            },
            Dyad {
                messages: vec![info(Role::User, 5, "new topic now"), info(Role::Assistant, 6, "...")],
            },
        ];
        let groups = merge_continuations(dyads);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn test_leading_continuation_merges_nothing() {
        let dyads = vec![
            Dyad {
                messages: vec![info(Role::User, 1, "continue"), info(Role::Assistant, 2, "...")],
            },
            Dyad {
                messages: vec![info(Role::User, 3, "unrelated question"), info(Role::Assistant, 4, "...")],
            },
        ];
        let groups = merge_continuations(dyads);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
    }

    #[test]
    fn test_compute_hash_normalizes_whitespace() {
        let a = compute_hash(Some("hello   world"));
        let b = compute_hash(Some(" hello world "));
        assert_eq!(a, b);
        assert!(compute_hash(Some("   ")).is_none());
        assert!(compute_hash(None).is_none());
    }
}
