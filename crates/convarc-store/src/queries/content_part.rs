use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::db::{id_text, json_text, opt_json_text, parse_id, parse_opt_json, parse_opt_ts, ts_text};
use crate::{ContentPartRecord, Result, Store};
use convarc_types::{PartType, Role, format_timestamp};

const PART_COLUMNS: &str = "id, message_id, sequence, part_type, text_content, language, \
     media_type, url, tool_name, tool_use_id, tool_input, is_error, started_at, ended_at, \
     source_json";

struct RawPart {
    id: String,
    message_id: String,
    sequence: i64,
    part_type: String,
    text_content: Option<String>,
    language: Option<String>,
    media_type: Option<String>,
    url: Option<String>,
    tool_name: Option<String>,
    tool_use_id: Option<String>,
    tool_input: Option<String>,
    is_error: Option<bool>,
    started_at: Option<String>,
    ended_at: Option<String>,
    source_json: String,
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<RawPart> {
    Ok(RawPart {
        id: row.get(0)?,
        message_id: row.get(1)?,
        sequence: row.get(2)?,
        part_type: row.get(3)?,
        text_content: row.get(4)?,
        language: row.get(5)?,
        media_type: row.get(6)?,
        url: row.get(7)?,
        tool_name: row.get(8)?,
        tool_use_id: row.get(9)?,
        tool_input: row.get(10)?,
        is_error: row.get(11)?,
        started_at: row.get(12)?,
        ended_at: row.get(13)?,
        source_json: row.get(14)?,
    })
}

impl RawPart {
    fn into_record(self) -> Result<ContentPartRecord> {
        Ok(ContentPartRecord {
            id: parse_id(&self.id)?,
            message_id: parse_id(&self.message_id)?,
            sequence: self.sequence,
            part_type: PartType::from_str(&self.part_type),
            text_content: self.text_content,
            language: self.language,
            media_type: self.media_type,
            url: self.url,
            tool_name: self.tool_name,
            tool_use_id: self.tool_use_id,
            tool_input: parse_opt_json(self.tool_input)?,
            is_error: self.is_error,
            started_at: parse_opt_ts(self.started_at)?,
            ended_at: parse_opt_ts(self.ended_at)?,
            source_json: crate::db::parse_json(&self.source_json)?,
        })
    }
}

impl Store {
    pub fn insert_content_part(&self, part: &ContentPartRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO content_parts
                (id, message_id, sequence, part_type, text_content, language, media_type,
                 url, tool_name, tool_use_id, tool_input, is_error, started_at, ended_at,
                 source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                id_text(part.id),
                id_text(part.message_id),
                part.sequence,
                part.part_type.as_str(),
                &part.text_content,
                &part.language,
                &part.media_type,
                &part.url,
                &part.tool_name,
                &part.tool_use_id,
                opt_json_text(part.tool_input.as_ref()),
                part.is_error,
                ts_text(part.started_at),
                ts_text(part.ended_at),
                json_text(&part.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn parts_for_message(&self, message_id: Uuid) -> Result<Vec<ContentPartRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM content_parts WHERE message_id = ?1 ORDER BY sequence",
            PART_COLUMNS
        ))?;
        let mut rows = stmt.query([id_text(message_id)])?;
        let mut parts = Vec::new();
        while let Some(row) = rows.next()? {
            parts.push(part_from_row(row)?.into_record()?);
        }
        Ok(parts)
    }

    /// Drop a message's content parts (citations and DALL-E rows cascade).
    /// Annotations owned by the hard-deleted parts are cleared too. Used
    /// when a re-import detects changed content.
    pub fn delete_parts_for_message(&self, message_id: Uuid) -> Result<()> {
        for value_type in convarc_types::ValueType::ALL {
            let table =
                crate::schema::annotation_table(convarc_types::EntityType::ContentPart, value_type);
            self.conn().execute(
                &format!(
                    "DELETE FROM {table} WHERE entity_id IN
                     (SELECT id FROM content_parts WHERE message_id = ?1)"
                ),
                [id_text(message_id)],
            )?;
        }
        self.conn().execute(
            "DELETE FROM content_parts WHERE message_id = ?1",
            [id_text(message_id)],
        )?;
        Ok(())
    }

    /// Text content parts (with owning message role) whose sort timestamp is
    /// strictly after the high-water mark. Feeds content-part annotators.
    pub fn text_parts_after(
        &self,
        high_water_mark: DateTime<Utc>,
    ) -> Result<Vec<(ContentPartRecord, Role, DateTime<Utc>)>> {
        let columns = PART_COLUMNS
            .split(", ")
            .map(|c| format!("p.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {}, m.role, COALESCE(m.created_at, d.imported_at) AS sort_ts
            FROM content_parts p
            JOIN messages m ON m.id = p.message_id
            JOIN dialogues d ON d.id = m.dialogue_id
            WHERE m.deleted_at IS NULL
              AND p.part_type = 'text'
              AND COALESCE(m.created_at, d.imported_at) > ?1
            ORDER BY sort_ts, p.rowid
            "#,
            columns
        ))?;
        let mut rows = stmt.query([format_timestamp(high_water_mark)])?;
        let mut parts = Vec::new();
        while let Some(row) = rows.next()? {
            let record = part_from_row(row)?.into_record()?;
            let role: String = row.get(15)?;
            let sort_ts: String = row.get(16)?;
            parts.push((record, Role::from_str(&role), crate::db::parse_ts(&sort_ts)?));
        }
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_parts_round_trip_in_sequence_order() {
        let store = Store::open_in_memory().unwrap();
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
        let message = crate::MessageRecord {
            id: Uuid::new_v4(),
            dialogue_id: dialogue.id,
            source_id: "m-1".to_string(),
            parent_id: None,
            role: Role::Assistant,
            author_id: None,
            author_name: None,
            created_at: None,
            updated_at: None,
            content_hash: None,
            deleted_at: None,
            source_json: json!({}),
        };
        store.insert_message(&message).unwrap();

        for (seq, text) in [(1i64, "second"), (0, "first")] {
            store
                .insert_content_part(&ContentPartRecord {
                    id: Uuid::new_v4(),
                    message_id: message.id,
                    sequence: seq,
                    part_type: PartType::Text,
                    text_content: Some(text.to_string()),
                    language: None,
                    media_type: None,
                    url: None,
                    tool_name: None,
                    tool_use_id: None,
                    tool_input: None,
                    is_error: None,
                    started_at: None,
                    ended_at: None,
                    source_json: json!({"text": text}),
                })
                .unwrap();
        }

        let parts = store.parts_for_message(message.id).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text_content.as_deref(), Some("first"));
        assert_eq!(parts[1].text_content.as_deref(), Some("second"));

        assert_eq!(
            store.message_text(message.id).unwrap().as_deref(),
            Some("first\nsecond")
        );
    }
}
