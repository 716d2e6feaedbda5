use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::db::{id_text, parse_id};
use crate::{PromptResponseContentRecord, PromptResponseRecord, Result, Store};
use convarc_types::{Role, format_timestamp};

const PR_COLUMNS: &str = "id, dialogue_id, prompt_message_id, response_message_id, \
     prompt_position, response_position, prompt_role, response_role";

fn pair_from_row(row: &Row<'_>) -> Result<PromptResponseRecord> {
    Ok(PromptResponseRecord {
        id: parse_id(&row.get::<_, String>(0)?)?,
        dialogue_id: parse_id(&row.get::<_, String>(1)?)?,
        prompt_message_id: parse_id(&row.get::<_, String>(2)?)?,
        response_message_id: parse_id(&row.get::<_, String>(3)?)?,
        prompt_position: row.get(4)?,
        response_position: row.get(5)?,
        prompt_role: Role::from_str(&row.get::<_, String>(6)?),
        response_role: Role::from_str(&row.get::<_, String>(7)?),
    })
}

impl Store {
    pub fn clear_prompt_responses_for_dialogue(&self, dialogue_id: Uuid) -> Result<()> {
        let id = id_text(dialogue_id);
        self.conn().execute(
            r#"
            DELETE FROM prompt_response_content
            WHERE prompt_response_id IN (SELECT id FROM prompt_responses WHERE dialogue_id = ?1)
            "#,
            [&id],
        )?;
        self.conn()
            .execute("DELETE FROM prompt_responses WHERE dialogue_id = ?1", [&id])?;
        Ok(())
    }

    pub fn insert_prompt_response(&self, pair: &PromptResponseRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO prompt_responses
                (id, dialogue_id, prompt_message_id, response_message_id,
                 prompt_position, response_position, prompt_role, response_role)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id_text(pair.id),
                id_text(pair.dialogue_id),
                id_text(pair.prompt_message_id),
                id_text(pair.response_message_id),
                pair.prompt_position,
                pair.response_position,
                pair.prompt_role.as_str(),
                pair.response_role.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_prompt_response_content(
        &self,
        content: &PromptResponseContentRecord,
    ) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO prompt_response_content
                (prompt_response_id, prompt_text, response_text,
                 prompt_word_count, response_word_count)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                id_text(content.prompt_response_id),
                &content.prompt_text,
                &content.response_text,
                content.prompt_word_count,
                content.response_word_count,
            ],
        )?;
        Ok(())
    }

    pub fn prompt_responses_for_dialogue(
        &self,
        dialogue_id: Uuid,
    ) -> Result<Vec<PromptResponseRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM prompt_responses WHERE dialogue_id = ?1 ORDER BY response_position",
            PR_COLUMNS
        ))?;
        let mut rows = stmt.query([id_text(dialogue_id)])?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next()? {
            pairs.push(pair_from_row(row)?);
        }
        Ok(pairs)
    }

    pub fn get_prompt_response_content(
        &self,
        prompt_response_id: Uuid,
    ) -> Result<Option<PromptResponseContentRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT prompt_response_id, prompt_text, response_text,
                   prompt_word_count, response_word_count
            FROM prompt_response_content WHERE prompt_response_id = ?1
            "#,
        )?;
        let mut rows = stmt.query([id_text(prompt_response_id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(PromptResponseContentRecord {
                prompt_response_id: parse_id(&row.get::<_, String>(0)?)?,
                prompt_text: row.get(1)?,
                response_text: row.get(2)?,
                prompt_word_count: row.get(3)?,
                response_word_count: row.get(4)?,
            })),
            None => Ok(None),
        }
    }

    /// Prompt-response pairs with a sort timestamp (response message time,
    /// falling back to dialogue import time) strictly after the mark
    pub fn prompt_responses_after(
        &self,
        high_water_mark: DateTime<Utc>,
    ) -> Result<Vec<(PromptResponseRecord, DateTime<Utc>)>> {
        let columns = PR_COLUMNS
            .split(", ")
            .map(|c| format!("pr.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {}, COALESCE(m.created_at, d.imported_at) AS sort_ts
            FROM prompt_responses pr
            JOIN messages m ON m.id = pr.response_message_id
            JOIN dialogues d ON d.id = pr.dialogue_id
            WHERE COALESCE(m.created_at, d.imported_at) > ?1
            ORDER BY sort_ts, pr.rowid
            "#,
            columns
        ))?;
        let mut rows = stmt.query([format_timestamp(high_water_mark)])?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next()? {
            let record = pair_from_row(row)?;
            let sort_ts: String = row.get(8)?;
            pairs.push((record, crate::db::parse_ts(&sort_ts)?));
        }
        Ok(pairs)
    }
}
