use chrono::Utc;
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::db::{id_text, opt_id_text, parse_id, parse_opt_id};
use crate::{
    DialogueTreeRecord, Error, LinearSequenceRecord, MessagePathRecord, Result,
    SequenceMessageRecord, Store,
};
use convarc_types::{BranchReason, format_timestamp};

impl Store {
    /// Clear all tree-derived rows for one dialogue, children first so the
    /// rebuild is safe mid-way.
    pub fn clear_tree_for_dialogue(&self, dialogue_id: Uuid) -> Result<()> {
        let id = id_text(dialogue_id);
        self.conn().execute(
            r#"
            DELETE FROM sequence_messages
            WHERE sequence_id IN (SELECT id FROM linear_sequences WHERE dialogue_id = ?1)
            "#,
            [&id],
        )?;
        self.conn().execute(
            "DELETE FROM linear_sequences WHERE dialogue_id = ?1",
            [&id],
        )?;
        self.conn()
            .execute("DELETE FROM message_paths WHERE dialogue_id = ?1", [&id])?;
        self.conn()
            .execute("DELETE FROM dialogue_trees WHERE dialogue_id = ?1", [&id])?;
        Ok(())
    }

    pub fn insert_dialogue_tree(&self, tree: &DialogueTreeRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO dialogue_trees
                (dialogue_id, total_nodes, max_depth, branch_count, leaf_count,
                 primary_leaf_id, primary_path_length, has_regenerations, has_edits,
                 computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                id_text(tree.dialogue_id),
                tree.total_nodes,
                tree.max_depth,
                tree.branch_count,
                tree.leaf_count,
                opt_id_text(tree.primary_leaf_id),
                tree.primary_path_length,
                tree.has_regenerations,
                tree.has_edits,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_dialogue_tree(&self, dialogue_id: Uuid) -> Result<Option<DialogueTreeRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT dialogue_id, total_nodes, max_depth, branch_count, leaf_count,
                   primary_leaf_id, primary_path_length, has_regenerations, has_edits
            FROM dialogue_trees WHERE dialogue_id = ?1
            "#,
        )?;
        let mut rows = stmt.query([id_text(dialogue_id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(DialogueTreeRecord {
                dialogue_id: parse_id(&row.get::<_, String>(0)?)?,
                total_nodes: row.get(1)?,
                max_depth: row.get(2)?,
                branch_count: row.get(3)?,
                leaf_count: row.get(4)?,
                primary_leaf_id: parse_opt_id(row.get(5)?)?,
                primary_path_length: row.get(6)?,
                has_regenerations: row.get(7)?,
                has_edits: row.get(8)?,
            })),
            None => Ok(None),
        }
    }

    pub fn insert_message_path(&self, path: &MessagePathRecord) -> Result<()> {
        let ancestors: Vec<String> = path.ancestor_path.iter().map(|id| id.to_string()).collect();
        self.conn().execute(
            r#"
            INSERT INTO message_paths
                (message_id, dialogue_id, ancestor_path, depth, is_root, is_leaf,
                 child_count, sibling_index, is_on_primary_path, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                id_text(path.message_id),
                id_text(path.dialogue_id),
                serde_json::to_string(&ancestors)?,
                path.depth,
                path.is_root,
                path.is_leaf,
                path.child_count,
                path.sibling_index,
                path.is_on_primary_path,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_message_path(&self, message_id: Uuid) -> Result<Option<MessagePathRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT message_id, dialogue_id, ancestor_path, depth, is_root, is_leaf,
                   child_count, sibling_index, is_on_primary_path
            FROM message_paths WHERE message_id = ?1
            "#,
        )?;
        let mut rows = stmt.query([id_text(message_id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(path_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn message_paths_for_dialogue(&self, dialogue_id: Uuid) -> Result<Vec<MessagePathRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT message_id, dialogue_id, ancestor_path, depth, is_root, is_leaf,
                   child_count, sibling_index, is_on_primary_path
            FROM message_paths WHERE dialogue_id = ?1 ORDER BY depth, message_id
            "#,
        )?;
        let mut rows = stmt.query([id_text(dialogue_id)])?;
        let mut paths = Vec::new();
        while let Some(row) = rows.next()? {
            paths.push(path_from_row(row)?);
        }
        Ok(paths)
    }

    pub fn insert_linear_sequence(&self, sequence: &LinearSequenceRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO linear_sequences
                (id, dialogue_id, leaf_message_id, sequence_length, is_primary,
                 branch_reason, branched_at_message_id, branched_at_depth, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                id_text(sequence.id),
                id_text(sequence.dialogue_id),
                id_text(sequence.leaf_message_id),
                sequence.sequence_length,
                sequence.is_primary,
                sequence.branch_reason.map(|r| r.as_str()),
                opt_id_text(sequence.branched_at_message_id),
                sequence.branched_at_depth,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn insert_sequence_message(&self, link: &SequenceMessageRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sequence_messages (sequence_id, message_id, position) VALUES (?1, ?2, ?3)",
            params![
                id_text(link.sequence_id),
                id_text(link.message_id),
                link.position
            ],
        )?;
        Ok(())
    }

    pub fn sequences_for_dialogue(&self, dialogue_id: Uuid) -> Result<Vec<LinearSequenceRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, dialogue_id, leaf_message_id, sequence_length, is_primary,
                   branch_reason, branched_at_message_id, branched_at_depth
            FROM linear_sequences WHERE dialogue_id = ?1
            ORDER BY is_primary DESC, sequence_length DESC, id
            "#,
        )?;
        let mut rows = stmt.query([id_text(dialogue_id)])?;
        let mut sequences = Vec::new();
        while let Some(row) = rows.next()? {
            sequences.push(sequence_from_row(row)?);
        }
        Ok(sequences)
    }

    pub fn list_sequences(&self) -> Result<Vec<LinearSequenceRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, dialogue_id, leaf_message_id, sequence_length, is_primary,
                   branch_reason, branched_at_message_id, branched_at_depth
            FROM linear_sequences ORDER BY rowid
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut sequences = Vec::new();
        while let Some(row) = rows.next()? {
            sequences.push(sequence_from_row(row)?);
        }
        Ok(sequences)
    }

    /// Message ids of a sequence in position order
    pub fn sequence_message_ids(&self, sequence_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id FROM sequence_messages WHERE sequence_id = ?1 ORDER BY position",
        )?;
        let raw = stmt
            .query_map([id_text(sequence_id)], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.iter().map(|s| parse_id(s)).collect()
    }

    pub fn count_sequence_messages(&self, dialogue_id: Uuid) -> Result<i64> {
        let count = self.conn().query_row(
            r#"
            SELECT COUNT(*) FROM sequence_messages
            WHERE sequence_id IN (SELECT id FROM linear_sequences WHERE dialogue_id = ?1)
            "#,
            [id_text(dialogue_id)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn path_from_row(row: &Row<'_>) -> Result<MessagePathRecord> {
    let ancestors_json: String = row.get(2)?;
    let ancestors: Vec<String> = serde_json::from_str(&ancestors_json)?;
    Ok(MessagePathRecord {
        message_id: parse_id(&row.get::<_, String>(0)?)?,
        dialogue_id: parse_id(&row.get::<_, String>(1)?)?,
        ancestor_path: ancestors
            .iter()
            .map(|s| parse_id(s))
            .collect::<Result<Vec<_>>>()?,
        depth: row.get(3)?,
        is_root: row.get(4)?,
        is_leaf: row.get(5)?,
        child_count: row.get(6)?,
        sibling_index: row.get(7)?,
        is_on_primary_path: row.get(8)?,
    })
}

fn sequence_from_row(row: &Row<'_>) -> Result<LinearSequenceRecord> {
    let branch_reason: Option<String> = row.get(5)?;
    let branch_reason = match branch_reason {
        Some(s) => Some(
            BranchReason::from_str(&s)
                .ok_or_else(|| Error::Corrupt(format!("invalid branch reason: {}", s)))?,
        ),
        None => None,
    };
    Ok(LinearSequenceRecord {
        id: parse_id(&row.get::<_, String>(0)?)?,
        dialogue_id: parse_id(&row.get::<_, String>(1)?)?,
        leaf_message_id: parse_id(&row.get::<_, String>(2)?)?,
        sequence_length: row.get(3)?,
        is_primary: row.get(4)?,
        branch_reason,
        branched_at_message_id: parse_opt_id(row.get(6)?)?,
        branched_at_depth: row.get(7)?,
    })
}
