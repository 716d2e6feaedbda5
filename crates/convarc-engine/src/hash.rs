use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;
use convarc_store::{DuplicateGroup, Store};
use convarc_types::{EntityType, HashScope, Normalization, sha256_hex};

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Collapse whitespace runs to single spaces and trim the ends
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, strip punctuation, then whitespace-normalize. The loosest
/// regime: "Hello,  World!" and "hello world" collide on purpose.
pub fn normalize_for_comparison(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    normalize_whitespace(&stripped)
}

fn apply(normalization: Normalization, text: &str) -> String {
    match normalization {
        Normalization::None => text.to_string(),
        Normalization::Whitespace => normalize_whitespace(text),
        Normalization::Normalized => normalize_for_comparison(text),
    }
}

/// Batch totals for one hash-building run
#[derive(Debug, Clone, Copy, Default)]
pub struct HashCounts {
    pub messages: usize,
    pub exchanges: usize,
    pub total_hashes: usize,
    pub failed: usize,
}

/// Computes SHA-256 content hashes for deduplication.
///
/// Message level: one `full` scope over the newline-joined text parts.
/// Exchange level: `user` / `assistant` / `full` scopes from the
/// aggregated exchange content. Every scope is hashed under all three
/// normalizations; empty normalized text produces no row.
pub struct HashBuilder<'a> {
    store: &'a Store,
}

impl<'a> HashBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn build_all(&self) -> HashCounts {
        info!("hash building started");
        let mut counts = HashCounts::default();

        match self.hash_messages() {
            Ok((messages, hashes)) => {
                counts.messages = messages;
                counts.total_hashes += hashes;
            }
            Err(err) => {
                warn!(error = %err, "message hashing failed");
                counts.failed += 1;
            }
        }

        match self.hash_exchanges() {
            Ok((exchanges, hashes)) => {
                counts.exchanges = exchanges;
                counts.total_hashes += hashes;
            }
            Err(err) => {
                warn!(error = %err, "exchange hashing failed");
                counts.failed += 1;
            }
        }

        info!(
            messages = counts.messages,
            exchanges = counts.exchanges,
            total_hashes = counts.total_hashes,
            failed = counts.failed,
            "hash building finished"
        );
        counts
    }

    fn hash_messages(&self) -> Result<(usize, usize)> {
        let mut message_count = 0;
        let mut hash_count = 0;

        for dialogue in self.store.list_dialogues()? {
            for message in self.store.messages_for_dialogue(dialogue.id, false)? {
                let Some(text) = self.store.message_text(message.id)? else {
                    continue;
                };
                hash_count +=
                    self.create_hashes(EntityType::Message, message.id, &text, HashScope::Full)?;
                message_count += 1;
            }
        }

        Ok((message_count, hash_count))
    }

    fn hash_exchanges(&self) -> Result<(usize, usize)> {
        let mut exchange_count = 0;
        let mut hash_count = 0;

        for content in self.store.list_exchange_contents()? {
            if let Some(user_text) = &content.user_text {
                hash_count += self.create_hashes(
                    EntityType::Exchange,
                    content.exchange_id,
                    user_text,
                    HashScope::User,
                )?;
            }
            if let Some(assistant_text) = &content.assistant_text {
                hash_count += self.create_hashes(
                    EntityType::Exchange,
                    content.exchange_id,
                    assistant_text,
                    HashScope::Assistant,
                )?;
            }
            if let Some(full_text) = &content.full_text {
                hash_count += self.create_hashes(
                    EntityType::Exchange,
                    content.exchange_id,
                    full_text,
                    HashScope::Full,
                )?;
            }
            exchange_count += 1;
        }

        Ok((exchange_count, hash_count))
    }

    /// Hash one (entity, scope) under every normalization; upserts count
    /// only when a row was created or changed
    fn create_hashes(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        text: &str,
        scope: HashScope,
    ) -> Result<usize> {
        let mut count = 0;
        for normalization in Normalization::ALL {
            let normalized = apply(normalization, text);
            if normalized.is_empty() {
                continue;
            }
            let hash = sha256_hex(&normalized);
            if self
                .store
                .upsert_content_hash(entity_type, entity_id, scope, normalization, &hash)?
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Hash values shared by more than one entity
    pub fn find_duplicates(
        &self,
        entity_type: EntityType,
        scope: HashScope,
        normalization: Normalization,
    ) -> Result<Vec<DuplicateGroup>> {
        Ok(self
            .store
            .find_duplicate_groups(entity_type, scope, normalization)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a\t b\n\nc "), "a b c");
    }

    #[test]
    fn test_normalize_for_comparison() {
        assert_eq!(normalize_for_comparison("Hello,  World!"), "hello world");
        assert_eq!(
            normalize_for_comparison("Don't  panic?"),
            normalize_for_comparison("dont panic")
        );
    }

    #[test]
    fn test_different_capitalization_collides_under_normalized() {
        let a = sha256_hex(&normalize_for_comparison("Hello world"));
        let b = sha256_hex(&normalize_for_comparison("hello   WORLD!"));
        assert_eq!(a, b);

        let c = sha256_hex(&apply(Normalization::Whitespace, "Hello world"));
        let d = sha256_hex(&apply(Normalization::Whitespace, "hello   WORLD!"));
        assert_ne!(c, d);
    }
}
