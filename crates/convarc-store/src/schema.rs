use rusqlite::Connection;

use crate::Result;
use convarc_types::{EntityType, ValueType};

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 3;

// NOTE: Annotation storage is partitioned by value type: one table per
// (entity_type, value_type) pair. A single polymorphic table would collapse
// indexability of key/value lookups, so the matrix is intentional. Flag
// tables carry no value column and are unique per (entity_id, key, source);
// the other shapes allow multiple values per key (tag sets) and are unique
// per (entity_id, key, value, source).

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            has_native_trees INTEGER NOT NULL,
            role_vocabulary TEXT NOT NULL,
            metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS dialogues (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL REFERENCES sources(id),
            source_id TEXT NOT NULL,
            title TEXT,
            source_created_at TEXT,
            source_updated_at TEXT,
            source_json TEXT NOT NULL,
            imported_at TEXT NOT NULL,
            UNIQUE (source, source_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            dialogue_id TEXT NOT NULL REFERENCES dialogues(id) ON DELETE CASCADE,
            source_id TEXT NOT NULL,
            parent_id TEXT REFERENCES messages(id),
            role TEXT NOT NULL,
            author_id TEXT,
            author_name TEXT,
            created_at TEXT,
            updated_at TEXT,
            content_hash TEXT,
            deleted_at TEXT,
            source_json TEXT NOT NULL,
            UNIQUE (dialogue_id, source_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_dialogue ON messages(dialogue_id);
        CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);

        CREATE TABLE IF NOT EXISTS content_parts (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            part_type TEXT NOT NULL,
            text_content TEXT,
            language TEXT,
            media_type TEXT,
            url TEXT,
            tool_name TEXT,
            tool_use_id TEXT,
            tool_input TEXT,
            is_error INTEGER,
            started_at TEXT,
            ended_at TEXT,
            source_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_content_parts_message ON content_parts(message_id);

        CREATE TABLE IF NOT EXISTS citations (
            id TEXT PRIMARY KEY,
            content_part_id TEXT NOT NULL REFERENCES content_parts(id) ON DELETE CASCADE,
            source_id TEXT,
            url TEXT,
            title TEXT,
            snippet TEXT,
            published_at TEXT,
            start_index INTEGER,
            end_index INTEGER,
            citation_type TEXT,
            source_json TEXT
        );

        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            file_name TEXT,
            file_type TEXT,
            file_size INTEGER,
            extracted_text TEXT,
            source_json TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

        CREATE TABLE IF NOT EXISTS chatgpt_message_meta (
            message_id TEXT PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
            model_slug TEXT,
            status TEXT,
            end_turn INTEGER,
            gizmo_id TEXT,
            source_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chatgpt_search_groups (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            group_type TEXT,
            domain TEXT,
            source_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_search_groups_message ON chatgpt_search_groups(message_id);

        CREATE TABLE IF NOT EXISTS chatgpt_search_entries (
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL REFERENCES chatgpt_search_groups(id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            url TEXT,
            title TEXT,
            snippet TEXT,
            published_at TEXT,
            attribution TEXT,
            source_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chatgpt_code_executions (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            run_id TEXT,
            status TEXT,
            code TEXT,
            started_at TEXT,
            ended_at TEXT,
            final_output TEXT,
            exception_name TEXT,
            exception_traceback TEXT,
            source_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_code_executions_message ON chatgpt_code_executions(message_id);

        CREATE TABLE IF NOT EXISTS chatgpt_code_outputs (
            id TEXT PRIMARY KEY,
            execution_id TEXT NOT NULL REFERENCES chatgpt_code_executions(id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            output_type TEXT,
            stream_name TEXT,
            text_content TEXT,
            image_url TEXT,
            source_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chatgpt_dalle_generations (
            id TEXT PRIMARY KEY,
            content_part_id TEXT NOT NULL REFERENCES content_parts(id) ON DELETE CASCADE,
            gen_id TEXT,
            prompt TEXT,
            seed INTEGER,
            parent_gen_id TEXT,
            edit_op TEXT,
            width INTEGER,
            height INTEGER,
            source_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chatgpt_canvas_docs (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            textdoc_id TEXT,
            textdoc_type TEXT,
            version INTEGER,
            title TEXT,
            from_version INTEGER,
            content_length INTEGER,
            has_user_edit INTEGER,
            source_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_canvas_docs_message ON chatgpt_canvas_docs(message_id);

        CREATE TABLE IF NOT EXISTS claude_message_meta (
            message_id TEXT PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
            source_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dialogue_trees (
            dialogue_id TEXT PRIMARY KEY REFERENCES dialogues(id) ON DELETE CASCADE,
            total_nodes INTEGER NOT NULL,
            max_depth INTEGER NOT NULL,
            branch_count INTEGER NOT NULL,
            leaf_count INTEGER NOT NULL,
            primary_leaf_id TEXT REFERENCES messages(id) ON DELETE SET NULL,
            primary_path_length INTEGER NOT NULL,
            has_regenerations INTEGER NOT NULL,
            has_edits INTEGER NOT NULL,
            computed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_paths (
            message_id TEXT PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
            dialogue_id TEXT NOT NULL REFERENCES dialogues(id) ON DELETE CASCADE,
            ancestor_path TEXT NOT NULL,
            depth INTEGER NOT NULL,
            is_root INTEGER NOT NULL,
            is_leaf INTEGER NOT NULL,
            child_count INTEGER NOT NULL,
            sibling_index INTEGER NOT NULL,
            is_on_primary_path INTEGER NOT NULL,
            computed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_message_paths_dialogue ON message_paths(dialogue_id);

        CREATE TABLE IF NOT EXISTS linear_sequences (
            id TEXT PRIMARY KEY,
            dialogue_id TEXT NOT NULL REFERENCES dialogues(id) ON DELETE CASCADE,
            leaf_message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            sequence_length INTEGER NOT NULL,
            is_primary INTEGER NOT NULL,
            branch_reason TEXT,
            branched_at_message_id TEXT REFERENCES messages(id) ON DELETE SET NULL,
            branched_at_depth INTEGER,
            computed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sequences_dialogue ON linear_sequences(dialogue_id);

        CREATE TABLE IF NOT EXISTS sequence_messages (
            sequence_id TEXT NOT NULL REFERENCES linear_sequences(id) ON DELETE CASCADE,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (sequence_id, message_id)
        );

        CREATE TABLE IF NOT EXISTS exchanges (
            id TEXT PRIMARY KEY,
            sequence_id TEXT NOT NULL REFERENCES linear_sequences(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            first_message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            last_message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            message_count INTEGER NOT NULL,
            user_message_count INTEGER NOT NULL,
            assistant_message_count INTEGER NOT NULL,
            is_continuation INTEGER NOT NULL DEFAULT 0,
            merged_count INTEGER NOT NULL DEFAULT 1,
            started_at TEXT,
            ended_at TEXT,
            computed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_exchanges_sequence ON exchanges(sequence_id);

        CREATE TABLE IF NOT EXISTS exchange_messages (
            exchange_id TEXT NOT NULL REFERENCES exchanges(id) ON DELETE CASCADE,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (exchange_id, message_id)
        );

        CREATE TABLE IF NOT EXISTS exchange_content (
            exchange_id TEXT PRIMARY KEY REFERENCES exchanges(id) ON DELETE CASCADE,
            user_text TEXT,
            assistant_text TEXT,
            full_text TEXT,
            user_text_hash TEXT,
            assistant_text_hash TEXT,
            full_text_hash TEXT,
            user_word_count INTEGER NOT NULL DEFAULT 0,
            assistant_word_count INTEGER NOT NULL DEFAULT 0,
            total_word_count INTEGER NOT NULL DEFAULT 0,
            computed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS content_hashes (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            hash_scope TEXT NOT NULL,
            normalization TEXT NOT NULL,
            hash_sha256 TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            UNIQUE (entity_type, entity_id, hash_scope, normalization)
        );

        CREATE INDEX IF NOT EXISTS idx_content_hashes_value
            ON content_hashes(entity_type, hash_scope, normalization, hash_sha256);

        CREATE TABLE IF NOT EXISTS prompt_responses (
            id TEXT PRIMARY KEY,
            dialogue_id TEXT NOT NULL REFERENCES dialogues(id) ON DELETE CASCADE,
            prompt_message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            response_message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            prompt_position INTEGER NOT NULL,
            response_position INTEGER NOT NULL,
            prompt_role TEXT NOT NULL,
            response_role TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_prompt_responses_dialogue ON prompt_responses(dialogue_id);

        CREATE TABLE IF NOT EXISTS prompt_response_content (
            prompt_response_id TEXT PRIMARY KEY REFERENCES prompt_responses(id) ON DELETE CASCADE,
            prompt_text TEXT,
            response_text TEXT,
            prompt_word_count INTEGER NOT NULL DEFAULT 0,
            response_word_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS annotator_cursors (
            id TEXT PRIMARY KEY,
            annotator_name TEXT NOT NULL,
            annotator_version TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            high_water_mark TEXT NOT NULL,
            entities_processed INTEGER NOT NULL DEFAULT 0,
            annotations_created INTEGER NOT NULL DEFAULT 0,
            cumulative_runtime_seconds REAL NOT NULL DEFAULT 0.0,
            updated_at TEXT NOT NULL,
            UNIQUE (annotator_name, annotator_version, entity_type)
        );
        "#,
    )?;

    create_annotation_tables(conn)?;
    seed_sources(conn)?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}

/// Name of the annotation table backing one (entity_type, value_type) pair
pub fn annotation_table(entity: EntityType, value: ValueType) -> String {
    format!("{}_annotations_{}", entity.as_str(), value.as_str())
}

fn create_annotation_tables(conn: &Connection) -> Result<()> {
    for entity in EntityType::ALL {
        for value in ValueType::ALL {
            let table = annotation_table(entity, value);
            let (value_column, unique_columns) = match value {
                ValueType::Flag => ("", "entity_id, key, source"),
                ValueType::String => ("value TEXT NOT NULL,", "entity_id, key, value, source"),
                ValueType::Numeric => ("value REAL NOT NULL,", "entity_id, key, value, source"),
                ValueType::Json => ("value TEXT NOT NULL,", "entity_id, key, value, source"),
            };

            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    entity_id TEXT NOT NULL,
                    key TEXT NOT NULL,
                    {value_column}
                    source TEXT NOT NULL,
                    source_version TEXT,
                    confidence REAL,
                    reason TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_natural
                    ON {table}({unique_columns});

                CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table}(key);
                "#,
            ))?;
        }
    }

    Ok(())
}

fn seed_sources(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        INSERT OR IGNORE INTO sources (id, display_name, has_native_trees, role_vocabulary)
        VALUES
            ('chatgpt', 'ChatGPT', 1, '["user","assistant","system","tool"]'),
            ('claude', 'Claude', 0, '["human","assistant"]');
        "#,
    )?;
    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    // Drop order is children-first so that foreign keys never dangle
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS annotator_cursors;
        DROP TABLE IF EXISTS prompt_response_content;
        DROP TABLE IF EXISTS prompt_responses;
        DROP TABLE IF EXISTS content_hashes;
        DROP TABLE IF EXISTS exchange_content;
        DROP TABLE IF EXISTS exchange_messages;
        DROP TABLE IF EXISTS exchanges;
        DROP TABLE IF EXISTS sequence_messages;
        DROP TABLE IF EXISTS linear_sequences;
        DROP TABLE IF EXISTS message_paths;
        DROP TABLE IF EXISTS dialogue_trees;
        DROP TABLE IF EXISTS claude_message_meta;
        DROP TABLE IF EXISTS chatgpt_canvas_docs;
        DROP TABLE IF EXISTS chatgpt_dalle_generations;
        DROP TABLE IF EXISTS chatgpt_code_outputs;
        DROP TABLE IF EXISTS chatgpt_code_executions;
        DROP TABLE IF EXISTS chatgpt_search_entries;
        DROP TABLE IF EXISTS chatgpt_search_groups;
        DROP TABLE IF EXISTS chatgpt_message_meta;
        DROP TABLE IF EXISTS attachments;
        DROP TABLE IF EXISTS citations;
        DROP TABLE IF EXISTS content_parts;
        DROP TABLE IF EXISTS messages;
        DROP TABLE IF EXISTS dialogues;
        DROP TABLE IF EXISTS sources;
        "#,
    )?;

    for entity in EntityType::ALL {
        for value in ValueType::ALL {
            conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {};",
                annotation_table(entity, value)
            ))?;
        }
    }

    Ok(())
}
