use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::db::{id_text, json_text, parse_id, parse_opt_ts, parse_ts, ts_text};
use crate::{DialogueRecord, Result, Store};
use convarc_types::format_timestamp;

fn dialogue_from_row(row: &Row<'_>) -> rusqlite::Result<RawDialogue> {
    Ok(RawDialogue {
        id: row.get(0)?,
        source: row.get(1)?,
        source_id: row.get(2)?,
        title: row.get(3)?,
        source_created_at: row.get(4)?,
        source_updated_at: row.get(5)?,
        source_json: row.get(6)?,
        imported_at: row.get(7)?,
    })
}

struct RawDialogue {
    id: String,
    source: String,
    source_id: String,
    title: Option<String>,
    source_created_at: Option<String>,
    source_updated_at: Option<String>,
    source_json: String,
    imported_at: String,
}

impl RawDialogue {
    fn into_record(self) -> Result<DialogueRecord> {
        Ok(DialogueRecord {
            id: parse_id(&self.id)?,
            source: self.source,
            source_id: self.source_id,
            title: self.title,
            source_created_at: parse_opt_ts(self.source_created_at)?,
            source_updated_at: parse_opt_ts(self.source_updated_at)?,
            source_json: crate::db::parse_json(&self.source_json)?,
            imported_at: parse_ts(&self.imported_at)?,
        })
    }
}

const DIALOGUE_COLUMNS: &str = "id, source, source_id, title, source_created_at, \
     source_updated_at, source_json, imported_at";

impl Store {
    pub fn insert_dialogue(&self, dialogue: &DialogueRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO dialogues
                (id, source, source_id, title, source_created_at, source_updated_at,
                 source_json, imported_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id_text(dialogue.id),
                &dialogue.source,
                &dialogue.source_id,
                &dialogue.title,
                ts_text(dialogue.source_created_at),
                ts_text(dialogue.source_updated_at),
                json_text(&dialogue.source_json),
                format_timestamp(dialogue.imported_at),
            ],
        )?;
        Ok(())
    }

    /// Update a dialogue in place. The internal id and natural key are
    /// immutable; only title, timestamps and the raw payload change.
    pub fn update_dialogue(&self, dialogue: &DialogueRecord) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE dialogues
            SET title = ?2,
                source_created_at = ?3,
                source_updated_at = ?4,
                source_json = ?5,
                imported_at = ?6
            WHERE id = ?1
            "#,
            params![
                id_text(dialogue.id),
                &dialogue.title,
                ts_text(dialogue.source_created_at),
                ts_text(dialogue.source_updated_at),
                json_text(&dialogue.source_json),
                format_timestamp(dialogue.imported_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_dialogue(&self, id: Uuid) -> Result<Option<DialogueRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM dialogues WHERE id = ?1",
            DIALOGUE_COLUMNS
        ))?;
        let mut rows = stmt.query([id_text(id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(dialogue_from_row(row)?.into_record()?)),
            None => Ok(None),
        }
    }

    /// Lookup by natural key (source, source_id)
    pub fn find_dialogue(&self, source: &str, source_id: &str) -> Result<Option<DialogueRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM dialogues WHERE source = ?1 AND source_id = ?2",
            DIALOGUE_COLUMNS
        ))?;
        let mut rows = stmt.query([source, source_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(dialogue_from_row(row)?.into_record()?)),
            None => Ok(None),
        }
    }

    pub fn list_dialogues(&self) -> Result<Vec<DialogueRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM dialogues ORDER BY imported_at, id",
            DIALOGUE_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut dialogues = Vec::new();
        while let Some(row) = rows.next()? {
            dialogues.push(dialogue_from_row(row)?.into_record()?);
        }
        Ok(dialogues)
    }

    /// Delete a dialogue and everything it owns: messages, content parts,
    /// side tables and derived rows go via foreign-key cascades, and the
    /// annotations owned by each hard-deleted entity are cleared with them.
    pub fn delete_dialogue(&self, id: Uuid) -> Result<()> {
        use convarc_types::{EntityType, ValueType};

        let scopes: [(EntityType, &str); 5] = [
            (
                EntityType::Message,
                "SELECT id FROM messages WHERE dialogue_id = ?1",
            ),
            (
                EntityType::ContentPart,
                "SELECT p.id FROM content_parts p
                 JOIN messages m ON m.id = p.message_id WHERE m.dialogue_id = ?1",
            ),
            (
                EntityType::Exchange,
                "SELECT e.id FROM exchanges e
                 JOIN linear_sequences s ON s.id = e.sequence_id WHERE s.dialogue_id = ?1",
            ),
            (
                EntityType::PromptResponse,
                "SELECT id FROM prompt_responses WHERE dialogue_id = ?1",
            ),
            (EntityType::Dialogue, "SELECT ?1"),
        ];

        for (entity, id_query) in scopes {
            for value_type in ValueType::ALL {
                let table = crate::schema::annotation_table(entity, value_type);
                self.conn().execute(
                    &format!("DELETE FROM {table} WHERE entity_id IN ({id_query})"),
                    [id_text(id)],
                )?;
            }
        }

        self.conn()
            .execute("DELETE FROM dialogues WHERE id = ?1", [id_text(id)])?;
        Ok(())
    }

    /// Dialogues whose sort timestamp (import time) is strictly after the
    /// given high-water mark, in ascending order. Used by annotator runs.
    pub fn dialogues_after(
        &self,
        high_water_mark: DateTime<Utc>,
    ) -> Result<Vec<(DialogueRecord, DateTime<Utc>)>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM dialogues WHERE imported_at > ?1 ORDER BY imported_at, id",
            DIALOGUE_COLUMNS
        ))?;
        let mut rows = stmt.query([format_timestamp(high_water_mark)])?;
        let mut dialogues = Vec::new();
        while let Some(row) = rows.next()? {
            let record = dialogue_from_row(row)?.into_record()?;
            let sort_ts = record.imported_at;
            dialogues.push((record, sort_ts));
        }
        Ok(dialogues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sample(source_id: &str) -> DialogueRecord {
        DialogueRecord {
            id: Uuid::new_v4(),
            source: "chatgpt".to_string(),
            source_id: source_id.to_string(),
            title: Some("Test conversation".to_string()),
            source_created_at: None,
            source_updated_at: None,
            source_json: json!({"conversation_id": source_id}),
            imported_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_find_by_natural_key() {
        let store = Store::open_in_memory().unwrap();
        let dialogue = sample("conv-1");
        store.insert_dialogue(&dialogue).unwrap();

        let found = store.find_dialogue("chatgpt", "conv-1").unwrap().unwrap();
        assert_eq!(found.id, dialogue.id);
        assert_eq!(found.title.as_deref(), Some("Test conversation"));
    }

    #[test]
    fn test_natural_key_is_unique() {
        let store = Store::open_in_memory().unwrap();
        store.insert_dialogue(&sample("conv-1")).unwrap();
        assert!(store.insert_dialogue(&sample("conv-1")).is_err());
    }

    #[test]
    fn test_delete_dialogue_clears_owned_annotations() {
        use crate::{AnnotationWriter, MessageRecord, WriteContext};
        use convarc_types::{EntityType, Role};

        let store = Store::open_in_memory().unwrap();
        let dialogue = sample("conv-1");
        store.insert_dialogue(&dialogue).unwrap();

        let message = MessageRecord {
            id: Uuid::new_v4(),
            dialogue_id: dialogue.id,
            source_id: "m-1".to_string(),
            parent_id: None,
            role: Role::User,
            author_id: None,
            author_name: None,
            created_at: None,
            updated_at: None,
            content_hash: None,
            deleted_at: None,
            source_json: json!({}),
        };
        store.insert_message(&message).unwrap();

        let writer = AnnotationWriter::new(&store);
        writer
            .write_flag(
                EntityType::Message,
                message.id,
                "has_code",
                "test",
                WriteContext::default(),
            )
            .unwrap();

        store.delete_dialogue(dialogue.id).unwrap();

        assert!(store.get_message(message.id).unwrap().is_none());
        let reader = crate::AnnotationReader::new(&store);
        assert!(
            !reader
                .has_flag(EntityType::Message, message.id, "has_code")
                .unwrap()
        );
    }

    #[test]
    fn test_update_preserves_id() {
        let store = Store::open_in_memory().unwrap();
        let mut dialogue = sample("conv-1");
        store.insert_dialogue(&dialogue).unwrap();

        dialogue.title = Some("Renamed".to_string());
        store.update_dialogue(&dialogue).unwrap();

        let found = store.find_dialogue("chatgpt", "conv-1").unwrap().unwrap();
        assert_eq!(found.id, dialogue.id);
        assert_eq!(found.title.as_deref(), Some("Renamed"));
    }
}
