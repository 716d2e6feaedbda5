use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::db::{id_text, json_text, opt_id_text, parse_id, parse_opt_id, parse_opt_ts, ts_text};
use crate::{MessageRecord, Result, Store};
use convarc_types::{Role, format_timestamp};

const MESSAGE_COLUMNS: &str = "id, dialogue_id, source_id, parent_id, role, author_id, \
     author_name, created_at, updated_at, content_hash, deleted_at, source_json";

struct RawMessage {
    id: String,
    dialogue_id: String,
    source_id: String,
    parent_id: Option<String>,
    role: String,
    author_id: Option<String>,
    author_name: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    content_hash: Option<String>,
    deleted_at: Option<String>,
    source_json: String,
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get(0)?,
        dialogue_id: row.get(1)?,
        source_id: row.get(2)?,
        parent_id: row.get(3)?,
        role: row.get(4)?,
        author_id: row.get(5)?,
        author_name: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        content_hash: row.get(9)?,
        deleted_at: row.get(10)?,
        source_json: row.get(11)?,
    })
}

impl RawMessage {
    fn into_record(self) -> Result<MessageRecord> {
        Ok(MessageRecord {
            id: parse_id(&self.id)?,
            dialogue_id: parse_id(&self.dialogue_id)?,
            source_id: self.source_id,
            parent_id: parse_opt_id(self.parent_id)?,
            role: Role::from_str(&self.role),
            author_id: self.author_id,
            author_name: self.author_name,
            created_at: parse_opt_ts(self.created_at)?,
            updated_at: parse_opt_ts(self.updated_at)?,
            content_hash: self.content_hash,
            deleted_at: parse_opt_ts(self.deleted_at)?,
            source_json: crate::db::parse_json(&self.source_json)?,
        })
    }
}

impl Store {
    pub fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO messages
                (id, dialogue_id, source_id, parent_id, role, author_id, author_name,
                 created_at, updated_at, content_hash, deleted_at, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                id_text(message.id),
                id_text(message.dialogue_id),
                &message.source_id,
                opt_id_text(message.parent_id),
                message.role.as_str(),
                &message.author_id,
                &message.author_name,
                ts_text(message.created_at),
                ts_text(message.updated_at),
                &message.content_hash,
                ts_text(message.deleted_at),
                json_text(&message.source_json),
            ],
        )?;
        Ok(())
    }

    /// Rewrite the mutable fields of an existing message. The internal id,
    /// dialogue and source_id never change.
    pub fn update_message(&self, message: &MessageRecord) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE messages
            SET parent_id = ?2,
                role = ?3,
                author_id = ?4,
                author_name = ?5,
                created_at = ?6,
                updated_at = ?7,
                content_hash = ?8,
                deleted_at = ?9,
                source_json = ?10
            WHERE id = ?1
            "#,
            params![
                id_text(message.id),
                opt_id_text(message.parent_id),
                message.role.as_str(),
                &message.author_id,
                &message.author_name,
                ts_text(message.created_at),
                ts_text(message.updated_at),
                &message.content_hash,
                ts_text(message.deleted_at),
                json_text(&message.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn set_message_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET parent_id = ?2 WHERE id = ?1",
            params![id_text(id), opt_id_text(parent_id)],
        )?;
        Ok(())
    }

    pub fn set_message_deleted(&self, id: Uuid, deleted_at: Option<DateTime<Utc>>) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET deleted_at = ?2 WHERE id = ?1",
            params![id_text(id), ts_text(deleted_at)],
        )?;
        Ok(())
    }

    /// Indexed lookup by the natural key (dialogue, source_id)
    pub fn find_message(&self, dialogue_id: Uuid, source_id: &str) -> Result<Option<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM messages WHERE dialogue_id = ?1 AND source_id = ?2",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id_text(dialogue_id), source_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(message_from_row(row)?.into_record()?)),
            None => Ok(None),
        }
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM messages WHERE id = ?1",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query([id_text(id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(message_from_row(row)?.into_record()?)),
            None => Ok(None),
        }
    }

    /// All messages of a dialogue, soft-deleted ones included when asked for.
    /// Ordered by timestamp with source order (insertion rowid) breaking ties.
    pub fn messages_for_dialogue(
        &self,
        dialogue_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<MessageRecord>> {
        let filter = if include_deleted {
            ""
        } else {
            "AND deleted_at IS NULL"
        };
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM messages WHERE dialogue_id = ?1 {} ORDER BY created_at, rowid",
            MESSAGE_COLUMNS, filter
        ))?;
        let mut rows = stmt.query([id_text(dialogue_id)])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(message_from_row(row)?.into_record()?);
        }
        Ok(messages)
    }

    /// Live messages whose sort timestamp is strictly after the high-water
    /// mark, ordered ascending. The sort timestamp falls back to the
    /// dialogue's import time when the message has no timestamp of its own.
    pub fn messages_after(
        &self,
        high_water_mark: DateTime<Utc>,
    ) -> Result<Vec<(MessageRecord, DateTime<Utc>)>> {
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {}, COALESCE(m.created_at, d.imported_at) AS sort_ts
            FROM messages m
            JOIN dialogues d ON d.id = m.dialogue_id
            WHERE m.deleted_at IS NULL
              AND COALESCE(m.created_at, d.imported_at) > ?1
            ORDER BY sort_ts, m.rowid
            "#,
            MESSAGE_COLUMNS
                .split(", ")
                .map(|c| format!("m.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let mut rows = stmt.query([format_timestamp(high_water_mark)])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            let record = message_from_row(row)?.into_record()?;
            let sort_ts: String = row.get(12)?;
            messages.push((record, crate::db::parse_ts(&sort_ts)?));
        }
        Ok(messages)
    }

    /// Concatenated text content of a message: text-bearing parts in
    /// sequence order, joined with newlines. `None` when nothing textual.
    pub fn message_text(&self, message_id: Uuid) -> Result<Option<String>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT text_content FROM content_parts
            WHERE message_id = ?1 AND text_content IS NOT NULL
            ORDER BY sequence
            "#,
        )?;
        let texts: Vec<String> = stmt
            .query_map([id_text(message_id)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|t: &String| !t.is_empty())
            .collect();

        if texts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(texts.join("\n")))
        }
    }

    /// Like `message_text` but restricted to plain `text` parts (no code,
    /// thinking or tool output). Prompt-response content uses this view.
    pub fn message_plain_text(&self, message_id: Uuid) -> Result<Option<String>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT text_content FROM content_parts
            WHERE message_id = ?1 AND part_type = 'text' AND text_content IS NOT NULL
            ORDER BY sequence
            "#,
        )?;
        let texts: Vec<String> = stmt
            .query_map([id_text(message_id)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|t: &String| !t.is_empty())
            .collect();

        if texts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(texts.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn insert_dialogue(store: &Store) -> Uuid {
        let dialogue = crate::DialogueRecord {
            id: Uuid::new_v4(),
            source: "claude".to_string(),
            source_id: "d-1".to_string(),
            title: None,
            source_created_at: None,
            source_updated_at: None,
            source_json: json!({}),
            imported_at: Utc::now(),
        };
        store.insert_dialogue(&dialogue).unwrap();
        dialogue.id
    }

    fn sample(dialogue_id: Uuid, source_id: &str, role: Role) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            dialogue_id,
            source_id: source_id.to_string(),
            parent_id: None,
            role,
            author_id: None,
            author_name: None,
            created_at: Some(Utc::now()),
            updated_at: None,
            content_hash: None,
            deleted_at: None,
            source_json: json!({}),
        }
    }

    #[test]
    fn test_insert_and_fetch() {
        let store = Store::open_in_memory().unwrap();
        let dialogue_id = insert_dialogue(&store);
        let message = sample(dialogue_id, "m-1", Role::User);
        store.insert_message(&message).unwrap();

        let found = store.get_message(message.id).unwrap().unwrap();
        assert_eq!(found.source_id, "m-1");
        assert_eq!(found.role, Role::User);
    }

    #[test]
    fn test_source_id_unique_per_dialogue() {
        let store = Store::open_in_memory().unwrap();
        let dialogue_id = insert_dialogue(&store);
        store
            .insert_message(&sample(dialogue_id, "m-1", Role::User))
            .unwrap();
        assert!(
            store
                .insert_message(&sample(dialogue_id, "m-1", Role::User))
                .is_err()
        );
    }

    #[test]
    fn test_soft_delete_filtering() {
        let store = Store::open_in_memory().unwrap();
        let dialogue_id = insert_dialogue(&store);
        let message = sample(dialogue_id, "m-1", Role::User);
        store.insert_message(&message).unwrap();
        store
            .set_message_deleted(message.id, Some(Utc::now()))
            .unwrap();

        assert_eq!(
            store.messages_for_dialogue(dialogue_id, false).unwrap().len(),
            0
        );
        assert_eq!(
            store.messages_for_dialogue(dialogue_id, true).unwrap().len(),
            1
        );
    }
}
