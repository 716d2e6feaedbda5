//! End-to-end pipeline tests over extraction, tree analysis, exchange
//! building and hashing, including the rebuild-idempotence properties.

use convarc_engine::{ExchangeBuilder, HashBuilder, PromptResponseBuilder, TreeBuilder};
use convarc_providers::{ChatGptExtractor, ClaudeExtractor, Extractor};
use convarc_store::Store;
use convarc_testing::{BranchedConversation, LinearConversation};
use convarc_types::{BranchReason, EntityType, HashScope, Normalization, sha256_hex};

fn import_linear_continuation(store: &Store) -> uuid::Uuid {
    let conversation = LinearConversation::new("conv-linear")
        .message("m1", "human", "Hello", "1970-01-01T00:16:40Z") // t=1000
        .message("m2", "assistant", "Hi", "1970-01-01T00:33:20Z") // t=2000
        .message("m3", "human", "continue", "1970-01-01T00:50:00Z") // t=3000
        .message("m4", "assistant", "More", "1970-01-01T01:06:40Z") // t=4000
        .build();
    ClaudeExtractor::default()
        .extract_dialogue(store, &conversation)
        .unwrap();
    store.find_dialogue("claude", "conv-linear").unwrap().unwrap().id
}

#[test]
fn test_linear_conversation_single_merged_exchange() {
    let store = Store::open_in_memory().unwrap();
    let dialogue_id = import_linear_continuation(&store);

    TreeBuilder::new(&store).build_all();

    let tree = store.get_dialogue_tree(dialogue_id).unwrap().unwrap();
    assert_eq!(tree.total_nodes, 4);
    assert_eq!(tree.branch_count, 0);
    assert_eq!(tree.leaf_count, 1);
    assert_eq!(tree.max_depth, 3);
    assert!(!tree.has_regenerations);
    assert!(!tree.has_edits);

    let sequences = store.sequences_for_dialogue(dialogue_id).unwrap();
    assert_eq!(sequences.len(), 1);
    assert_eq!(sequences[0].sequence_length, 4);
    assert!(sequences[0].is_primary);

    ExchangeBuilder::new(&store).build_all();

    // The "continue" dyad merges into the first one: a single exchange
    let exchanges = store.exchanges_for_sequence(sequences[0].id).unwrap();
    assert_eq!(exchanges.len(), 1);
    let exchange = &exchanges[0];
    assert!(exchange.is_continuation);
    assert_eq!(exchange.merged_count, 2);
    assert_eq!(exchange.user_message_count, 2);
    assert_eq!(exchange.assistant_message_count, 2);
    assert_eq!(exchange.message_count, 4);
    assert!(exchange.started_at.unwrap() <= exchange.ended_at.unwrap());

    let content = store.get_exchange_content(exchange.id).unwrap().unwrap();
    assert_eq!(content.user_text.as_deref(), Some("Hello\n\ncontinue"));
    assert_eq!(content.assistant_text.as_deref(), Some("Hi\n\nMore"));
    assert_eq!(
        content.full_text.as_deref(),
        Some("Hello\n\ncontinue\n\nHi\n\nMore")
    );
    assert_eq!(content.total_word_count, 4);
}

#[test]
fn test_regeneration_branch() {
    let store = Store::open_in_memory().unwrap();
    let conversation = BranchedConversation::new("conv-regen")
        .message("q", None, "user", "Q", 1.0)
        .message("a1", Some("q"), "assistant", "A1", 2.0)
        .message("a2", Some("q"), "assistant", "A2", 3.0)
        .build();
    ChatGptExtractor::default()
        .extract_dialogue(&store, &conversation)
        .unwrap();
    let dialogue_id = store.find_dialogue("chatgpt", "conv-regen").unwrap().unwrap().id;

    TreeBuilder::new(&store).build_all();

    let tree = store.get_dialogue_tree(dialogue_id).unwrap().unwrap();
    assert_eq!(tree.branch_count, 1);
    assert_eq!(tree.leaf_count, 2);
    assert!(tree.has_regenerations);
    assert!(!tree.has_edits);

    // The later regeneration wins the timestamp tiebreak
    let messages = store.messages_for_dialogue(dialogue_id, false).unwrap();
    let a2 = messages.iter().find(|m| m.source_id == "a2").unwrap();
    assert_eq!(tree.primary_leaf_id, Some(a2.id));

    let sequences = store.sequences_for_dialogue(dialogue_id).unwrap();
    assert_eq!(sequences.len(), 2);
    assert!(sequences.iter().all(|s| s.sequence_length == 2));

    let secondary = sequences.iter().find(|s| !s.is_primary).unwrap();
    assert_eq!(secondary.branch_reason, Some(BranchReason::Regeneration));
    assert_eq!(secondary.branched_at_depth, Some(0));
    let q = messages.iter().find(|m| m.source_id == "q").unwrap();
    assert_eq!(secondary.branched_at_message_id, Some(q.id));
}

#[test]
fn test_edit_branch() {
    let store = Store::open_in_memory().unwrap();
    let conversation = BranchedConversation::new("conv-edit")
        .message("q", None, "user", "Q", 1.0)
        .message("edit", Some("q"), "user", "Q, edited", 2.0)
        .message("a", Some("q"), "assistant", "A", 3.0)
        .build();
    ChatGptExtractor::default()
        .extract_dialogue(&store, &conversation)
        .unwrap();
    let dialogue_id = store.find_dialogue("chatgpt", "conv-edit").unwrap().unwrap().id;

    TreeBuilder::new(&store).build_all();

    let tree = store.get_dialogue_tree(dialogue_id).unwrap().unwrap();
    assert!(tree.has_edits);
    assert!(!tree.has_regenerations);

    let sequences = store.sequences_for_dialogue(dialogue_id).unwrap();
    let secondary = sequences.iter().find(|s| !s.is_primary).unwrap();
    assert_eq!(secondary.branch_reason, Some(BranchReason::Edit));
}

#[test]
fn test_message_path_invariants() {
    let store = Store::open_in_memory().unwrap();
    let dialogue_id = import_linear_continuation(&store);

    TreeBuilder::new(&store).build_all();

    let messages = store.messages_for_dialogue(dialogue_id, false).unwrap();
    let root_id = messages[0].id;

    for message in &messages {
        let path = store.get_message_path(message.id).unwrap().unwrap();
        // depth equals the ancestor count; the first ancestor is the root
        assert_eq!(path.depth, path.ancestor_path.len() as i64);
        if !path.ancestor_path.is_empty() {
            assert_eq!(path.ancestor_path[0], root_id);
        }
    }

    // Sum of sequence messages equals the sum of leaf-path lengths
    let sequences = store.sequences_for_dialogue(dialogue_id).unwrap();
    let expected: i64 = sequences.iter().map(|s| s.sequence_length).sum();
    assert_eq!(store.count_sequence_messages(dialogue_id).unwrap(), expected);

    // Sequence positions are contiguous from zero
    for sequence in &sequences {
        let ids = store.sequence_message_ids(sequence.id).unwrap();
        assert_eq!(ids.len() as i64, sequence.sequence_length);
    }
}

#[test]
fn test_duplicate_detection_across_dialogues() {
    let store = Store::open_in_memory().unwrap();

    let first = LinearConversation::new("conv-dup-1")
        .message("m1", "human", "Hello world", "2024-01-01T00:00:00Z")
        .build();
    let second = LinearConversation::new("conv-dup-2")
        .message("m1", "human", "hello   World", "2024-01-02T00:00:00Z")
        .build();
    let extractor = ClaudeExtractor::default();
    extractor.extract_dialogue(&store, &first).unwrap();
    extractor.extract_dialogue(&store, &second).unwrap();

    TreeBuilder::new(&store).build_all();
    ExchangeBuilder::new(&store).build_all();
    let hash_builder = HashBuilder::new(&store);
    hash_builder.build_all();

    let groups = hash_builder
        .find_duplicates(EntityType::Message, HashScope::Full, Normalization::Normalized)
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].entity_ids.len(), 2);

    // Under exact hashing the two spellings stay distinct
    let exact = hash_builder
        .find_duplicates(EntityType::Message, HashScope::Full, Normalization::None)
        .unwrap();
    assert!(exact.is_empty());
}

#[test]
fn test_stored_hashes_reproducible_from_live_content() {
    let store = Store::open_in_memory().unwrap();
    let dialogue_id = import_linear_continuation(&store);

    TreeBuilder::new(&store).build_all();
    ExchangeBuilder::new(&store).build_all();
    HashBuilder::new(&store).build_all();

    for message in store.messages_for_dialogue(dialogue_id, false).unwrap() {
        let text = store.message_text(message.id).unwrap().unwrap();
        for row in store
            .content_hashes_for_entity(EntityType::Message, message.id)
            .unwrap()
        {
            let normalized = match row.normalization {
                Normalization::None => text.clone(),
                Normalization::Whitespace => convarc_engine::normalize_whitespace(&text),
                Normalization::Normalized => convarc_engine::normalize_for_comparison(&text),
            };
            assert_eq!(row.hash_sha256, sha256_hex(&normalized));
        }
    }
}

#[test]
fn test_hash_pass_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    import_linear_continuation(&store);

    TreeBuilder::new(&store).build_all();
    ExchangeBuilder::new(&store).build_all();

    let first = HashBuilder::new(&store).build_all();
    assert!(first.total_hashes > 0);

    let second = HashBuilder::new(&store).build_all();
    assert_eq!(second.total_hashes, 0);
}

#[test]
fn test_rebuild_from_tree_pass_reproduces_derived_state() {
    let store = Store::open_in_memory().unwrap();
    let dialogue_id = import_linear_continuation(&store);

    TreeBuilder::new(&store).build_all();
    ExchangeBuilder::new(&store).build_all();

    let sequences_before = store.sequences_for_dialogue(dialogue_id).unwrap();
    let exchange_before = store
        .exchanges_for_sequence(sequences_before[0].id)
        .unwrap()
        .remove(0);

    // Clear and re-run from the tree pass onward
    store.clear_tree_for_dialogue(dialogue_id).unwrap();
    TreeBuilder::new(&store).build_all();
    ExchangeBuilder::new(&store).build_all();

    let sequences_after = store.sequences_for_dialogue(dialogue_id).unwrap();
    assert_eq!(sequences_before.len(), sequences_after.len());
    assert_eq!(
        sequences_before[0].leaf_message_id,
        sequences_after[0].leaf_message_id
    );
    assert_eq!(
        sequences_before[0].sequence_length,
        sequences_after[0].sequence_length
    );

    let exchange_after = store
        .exchanges_for_sequence(sequences_after[0].id)
        .unwrap()
        .remove(0);
    assert_eq!(exchange_before.message_count, exchange_after.message_count);
    assert_eq!(exchange_before.merged_count, exchange_after.merged_count);
    assert_eq!(
        exchange_before.first_message_id,
        exchange_after.first_message_id
    );
    assert_eq!(exchange_before.last_message_id, exchange_after.last_message_id);
}

#[test]
fn test_prompt_response_pairs_without_tree() {
    let store = Store::open_in_memory().unwrap();
    let dialogue_id = import_linear_continuation(&store);

    let counts = PromptResponseBuilder::new(&store).build_all();
    assert_eq!(counts.dialogues, 1);
    assert_eq!(counts.prompt_responses, 2);

    let pairs = store.prompt_responses_for_dialogue(dialogue_id).unwrap();
    assert_eq!(pairs.len(), 2);

    let messages = store.messages_for_dialogue(dialogue_id, false).unwrap();
    assert_eq!(pairs[0].prompt_message_id, messages[0].id);
    assert_eq!(pairs[0].response_message_id, messages[1].id);
    assert_eq!(pairs[1].prompt_message_id, messages[2].id);
    assert_eq!(pairs[1].response_message_id, messages[3].id);

    let content = store.get_prompt_response_content(pairs[0].id).unwrap().unwrap();
    assert_eq!(content.prompt_text.as_deref(), Some("Hello"));
    assert_eq!(content.response_text.as_deref(), Some("Hi"));
    assert_eq!(content.prompt_word_count, 1);

    // Rebuilding clears and reproduces the same pair count
    let counts = PromptResponseBuilder::new(&store).build_all();
    assert_eq!(counts.prompt_responses, 2);
    assert_eq!(store.prompt_responses_for_dialogue(dialogue_id).unwrap().len(), 2);
}

#[test]
fn test_soft_deleted_branch_rebuilds_as_shorter_tree() {
    let store = Store::open_in_memory().unwrap();
    let conversation = BranchedConversation::new("conv-shrink")
        .update_time(100.0)
        .message("q", None, "user", "Q", 1.0)
        .message("a1", Some("q"), "assistant", "A1", 2.0)
        .message("a2", Some("q"), "assistant", "A2", 3.0)
        .build();
    let extractor = ChatGptExtractor::default();
    extractor.extract_dialogue(&store, &conversation).unwrap();
    let dialogue_id = store.find_dialogue("chatgpt", "conv-shrink").unwrap().unwrap().id;

    TreeBuilder::new(&store).build_all();
    assert_eq!(store.get_dialogue_tree(dialogue_id).unwrap().unwrap().leaf_count, 2);

    // Re-import without the second regeneration
    let shrunk = BranchedConversation::new("conv-shrink")
        .update_time(200.0)
        .message("q", None, "user", "Q", 1.0)
        .message("a1", Some("q"), "assistant", "A1", 2.0)
        .build();
    extractor.extract_dialogue(&store, &shrunk).unwrap();
    TreeBuilder::new(&store).build_all();

    let tree = store.get_dialogue_tree(dialogue_id).unwrap().unwrap();
    assert_eq!(tree.total_nodes, 2);
    assert_eq!(tree.leaf_count, 1);
    assert_eq!(tree.branch_count, 0);
}
