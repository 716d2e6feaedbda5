use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::db::{id_text, parse_id, parse_opt_ts, ts_text};
use crate::{ExchangeContentRecord, ExchangeMessageRecord, ExchangeRecord, Result, Store};
use convarc_types::format_timestamp;

const EXCHANGE_COLUMNS: &str = "id, sequence_id, position, first_message_id, last_message_id, \
     message_count, user_message_count, assistant_message_count, is_continuation, \
     merged_count, started_at, ended_at";

fn exchange_from_row(row: &Row<'_>) -> Result<ExchangeRecord> {
    Ok(ExchangeRecord {
        id: parse_id(&row.get::<_, String>(0)?)?,
        sequence_id: parse_id(&row.get::<_, String>(1)?)?,
        position: row.get(2)?,
        first_message_id: parse_id(&row.get::<_, String>(3)?)?,
        last_message_id: parse_id(&row.get::<_, String>(4)?)?,
        message_count: row.get(5)?,
        user_message_count: row.get(6)?,
        assistant_message_count: row.get(7)?,
        is_continuation: row.get(8)?,
        merged_count: row.get(9)?,
        started_at: parse_opt_ts(row.get(10)?)?,
        ended_at: parse_opt_ts(row.get(11)?)?,
    })
}

fn content_from_row(row: &Row<'_>) -> Result<ExchangeContentRecord> {
    Ok(ExchangeContentRecord {
        exchange_id: parse_id(&row.get::<_, String>(0)?)?,
        user_text: row.get(1)?,
        assistant_text: row.get(2)?,
        full_text: row.get(3)?,
        user_text_hash: row.get(4)?,
        assistant_text_hash: row.get(5)?,
        full_text_hash: row.get(6)?,
        user_word_count: row.get(7)?,
        assistant_word_count: row.get(8)?,
        total_word_count: row.get(9)?,
    })
}

const CONTENT_COLUMNS: &str = "exchange_id, user_text, assistant_text, full_text, \
     user_text_hash, assistant_text_hash, full_text_hash, user_word_count, \
     assistant_word_count, total_word_count";

impl Store {
    /// Clear exchange-derived rows for one sequence, children first
    pub fn clear_exchanges_for_sequence(&self, sequence_id: Uuid) -> Result<()> {
        let id = id_text(sequence_id);
        self.conn().execute(
            r#"
            DELETE FROM exchange_content
            WHERE exchange_id IN (SELECT id FROM exchanges WHERE sequence_id = ?1)
            "#,
            [&id],
        )?;
        self.conn().execute(
            r#"
            DELETE FROM exchange_messages
            WHERE exchange_id IN (SELECT id FROM exchanges WHERE sequence_id = ?1)
            "#,
            [&id],
        )?;
        self.conn()
            .execute("DELETE FROM exchanges WHERE sequence_id = ?1", [&id])?;
        Ok(())
    }

    pub fn insert_exchange(&self, exchange: &ExchangeRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO exchanges
                (id, sequence_id, position, first_message_id, last_message_id,
                 message_count, user_message_count, assistant_message_count,
                 is_continuation, merged_count, started_at, ended_at, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                id_text(exchange.id),
                id_text(exchange.sequence_id),
                exchange.position,
                id_text(exchange.first_message_id),
                id_text(exchange.last_message_id),
                exchange.message_count,
                exchange.user_message_count,
                exchange.assistant_message_count,
                exchange.is_continuation,
                exchange.merged_count,
                ts_text(exchange.started_at),
                ts_text(exchange.ended_at),
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn insert_exchange_message(&self, link: &ExchangeMessageRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO exchange_messages (exchange_id, message_id, position) VALUES (?1, ?2, ?3)",
            params![
                id_text(link.exchange_id),
                id_text(link.message_id),
                link.position
            ],
        )?;
        Ok(())
    }

    pub fn insert_exchange_content(&self, content: &ExchangeContentRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO exchange_content
                (exchange_id, user_text, assistant_text, full_text, user_text_hash,
                 assistant_text_hash, full_text_hash, user_word_count,
                 assistant_word_count, total_word_count, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                id_text(content.exchange_id),
                &content.user_text,
                &content.assistant_text,
                &content.full_text,
                &content.user_text_hash,
                &content.assistant_text_hash,
                &content.full_text_hash,
                content.user_word_count,
                content.assistant_word_count,
                content.total_word_count,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn exchanges_for_sequence(&self, sequence_id: Uuid) -> Result<Vec<ExchangeRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM exchanges WHERE sequence_id = ?1 ORDER BY position",
            EXCHANGE_COLUMNS
        ))?;
        let mut rows = stmt.query([id_text(sequence_id)])?;
        let mut exchanges = Vec::new();
        while let Some(row) = rows.next()? {
            exchanges.push(exchange_from_row(row)?);
        }
        Ok(exchanges)
    }

    pub fn get_exchange(&self, id: Uuid) -> Result<Option<ExchangeRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM exchanges WHERE id = ?1",
            EXCHANGE_COLUMNS
        ))?;
        let mut rows = stmt.query([id_text(id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(exchange_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_exchange_content(&self, exchange_id: Uuid) -> Result<Option<ExchangeContentRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM exchange_content WHERE exchange_id = ?1",
            CONTENT_COLUMNS
        ))?;
        let mut rows = stmt.query([id_text(exchange_id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(content_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_exchange_contents(&self) -> Result<Vec<ExchangeContentRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM exchange_content ORDER BY rowid",
            CONTENT_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut contents = Vec::new();
        while let Some(row) = rows.next()? {
            contents.push(content_from_row(row)?);
        }
        Ok(contents)
    }

    /// Message ids of an exchange in position order
    pub fn exchange_message_ids(&self, exchange_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id FROM exchange_messages WHERE exchange_id = ?1 ORDER BY position",
        )?;
        let raw = stmt
            .query_map([id_text(exchange_id)], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.iter().map(|s| parse_id(s)).collect()
    }

    /// Exchanges on the primary sequence of a dialogue, in position order.
    /// Dialogue-level statistics are computed over the canonical path.
    pub fn primary_exchanges_for_dialogue(&self, dialogue_id: Uuid) -> Result<Vec<ExchangeRecord>> {
        let columns = EXCHANGE_COLUMNS
            .split(", ")
            .map(|c| format!("e.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {}
            FROM exchanges e
            JOIN linear_sequences s ON s.id = e.sequence_id
            WHERE s.dialogue_id = ?1 AND s.is_primary = 1
            ORDER BY e.position
            "#,
            columns
        ))?;
        let mut rows = stmt.query([id_text(dialogue_id)])?;
        let mut exchanges = Vec::new();
        while let Some(row) = rows.next()? {
            exchanges.push(exchange_from_row(row)?);
        }
        Ok(exchanges)
    }

    /// Exchanges with a sort timestamp strictly after the high-water mark
    /// (exchange start time, falling back to computation time)
    pub fn exchanges_after(
        &self,
        high_water_mark: DateTime<Utc>,
    ) -> Result<Vec<(ExchangeRecord, DateTime<Utc>)>> {
        let mut stmt = self.conn().prepare(&format!(
            r#"
            SELECT {}, COALESCE(started_at, computed_at) AS sort_ts
            FROM exchanges
            WHERE COALESCE(started_at, computed_at) > ?1
            ORDER BY sort_ts, rowid
            "#,
            EXCHANGE_COLUMNS
        ))?;
        let mut rows = stmt.query([format_timestamp(high_water_mark)])?;
        let mut exchanges = Vec::new();
        while let Some(row) = rows.next()? {
            let record = exchange_from_row(row)?;
            let sort_ts: String = row.get(12)?;
            exchanges.push((record, crate::db::parse_ts(&sort_ts)?));
        }
        Ok(exchanges)
    }
}
