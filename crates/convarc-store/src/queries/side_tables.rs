use rusqlite::params;
use uuid::Uuid;

use crate::db::{id_text, json_text, opt_json_text, parse_id, parse_opt_ts, ts_text};
use crate::{
    AttachmentRecord, ChatGptCanvasDocRecord, ChatGptCodeExecutionRecord, ChatGptCodeOutputRecord,
    ChatGptDalleGenerationRecord, ChatGptMessageMetaRecord, ChatGptSearchEntryRecord,
    ChatGptSearchGroupRecord, CitationRecord, ClaudeMessageMetaRecord, Result, Store,
};

fn in_placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn id_params(ids: &[Uuid]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

impl Store {
    pub fn insert_citation(&self, citation: &CitationRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO citations
                (id, content_part_id, source_id, url, title, snippet, published_at,
                 start_index, end_index, citation_type, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                id_text(citation.id),
                id_text(citation.content_part_id),
                &citation.source_id,
                &citation.url,
                &citation.title,
                &citation.snippet,
                ts_text(citation.published_at),
                citation.start_index,
                citation.end_index,
                &citation.citation_type,
                opt_json_text(citation.source_json.as_ref()),
            ],
        )?;
        Ok(())
    }

    pub fn insert_attachment(&self, attachment: &AttachmentRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO attachments
                (id, message_id, file_name, file_type, file_size, extracted_text, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                id_text(attachment.id),
                id_text(attachment.message_id),
                &attachment.file_name,
                &attachment.file_type,
                attachment.file_size,
                &attachment.extracted_text,
                opt_json_text(attachment.source_json.as_ref()),
            ],
        )?;
        Ok(())
    }

    pub fn insert_chatgpt_meta(&self, meta: &ChatGptMessageMetaRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chatgpt_message_meta
                (message_id, model_slug, status, end_turn, gizmo_id, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                id_text(meta.message_id),
                &meta.model_slug,
                &meta.status,
                meta.end_turn,
                &meta.gizmo_id,
                json_text(&meta.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn insert_search_group(&self, group: &ChatGptSearchGroupRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chatgpt_search_groups (id, message_id, group_type, domain, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                id_text(group.id),
                id_text(group.message_id),
                &group.group_type,
                &group.domain,
                json_text(&group.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn insert_search_entry(&self, entry: &ChatGptSearchEntryRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chatgpt_search_entries
                (id, group_id, sequence, url, title, snippet, published_at, attribution,
                 source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                id_text(entry.id),
                id_text(entry.group_id),
                entry.sequence,
                &entry.url,
                &entry.title,
                &entry.snippet,
                ts_text(entry.published_at),
                &entry.attribution,
                json_text(&entry.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn insert_code_execution(&self, execution: &ChatGptCodeExecutionRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chatgpt_code_executions
                (id, message_id, run_id, status, code, started_at, ended_at, final_output,
                 exception_name, exception_traceback, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                id_text(execution.id),
                id_text(execution.message_id),
                &execution.run_id,
                &execution.status,
                &execution.code,
                ts_text(execution.started_at),
                ts_text(execution.ended_at),
                &execution.final_output,
                &execution.exception_name,
                &execution.exception_traceback,
                json_text(&execution.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn insert_code_output(&self, output: &ChatGptCodeOutputRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chatgpt_code_outputs
                (id, execution_id, sequence, output_type, stream_name, text_content,
                 image_url, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id_text(output.id),
                id_text(output.execution_id),
                output.sequence,
                &output.output_type,
                &output.stream_name,
                &output.text_content,
                &output.image_url,
                json_text(&output.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn insert_dalle_generation(&self, generation: &ChatGptDalleGenerationRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chatgpt_dalle_generations
                (id, content_part_id, gen_id, prompt, seed, parent_gen_id, edit_op, width,
                 height, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                id_text(generation.id),
                id_text(generation.content_part_id),
                &generation.gen_id,
                &generation.prompt,
                generation.seed,
                &generation.parent_gen_id,
                &generation.edit_op,
                generation.width,
                generation.height,
                json_text(&generation.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn insert_canvas_doc(&self, doc: &ChatGptCanvasDocRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO chatgpt_canvas_docs
                (id, message_id, textdoc_id, textdoc_type, version, title, from_version,
                 content_length, has_user_edit, source_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                id_text(doc.id),
                id_text(doc.message_id),
                &doc.textdoc_id,
                &doc.textdoc_type,
                doc.version,
                &doc.title,
                doc.from_version,
                doc.content_length,
                doc.has_user_edit,
                json_text(&doc.source_json),
            ],
        )?;
        Ok(())
    }

    pub fn insert_claude_meta(&self, meta: &ClaudeMessageMetaRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO claude_message_meta (message_id, source_json) VALUES (?1, ?2)",
            params![id_text(meta.message_id), json_text(&meta.source_json)],
        )?;
        Ok(())
    }

    /// Drop every side-table row owned by a message. Used together with
    /// `delete_parts_for_message` when a re-import rewrites message content.
    pub fn delete_message_side_tables(&self, message_id: Uuid) -> Result<()> {
        let id = id_text(message_id);
        for table in [
            "attachments",
            "chatgpt_message_meta",
            "chatgpt_search_groups",
            "chatgpt_code_executions",
            "chatgpt_canvas_docs",
            "claude_message_meta",
        ] {
            self.conn().execute(
                &format!("DELETE FROM {} WHERE message_id = ?1", table),
                [&id],
            )?;
        }
        Ok(())
    }

    // Platform lookups used by exchange-platform annotators. Each takes the
    // message ids of one exchange.

    pub fn search_groups_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ChatGptSearchGroupRecord>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, message_id, group_type, domain, source_json
             FROM chatgpt_search_groups WHERE message_id IN ({})",
            in_placeholders(message_ids.len())
        ))?;
        let mut rows = stmt.query(rusqlite::params_from_iter(id_params(message_ids)))?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            groups.push(ChatGptSearchGroupRecord {
                id: parse_id(&row.get::<_, String>(0)?)?,
                message_id: parse_id(&row.get::<_, String>(1)?)?,
                group_type: row.get(2)?,
                domain: row.get(3)?,
                source_json: crate::db::parse_json(&row.get::<_, String>(4)?)?,
            });
        }
        Ok(groups)
    }

    pub fn code_executions_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ChatGptCodeExecutionRecord>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, message_id, run_id, status, code, started_at, ended_at,
                    final_output, exception_name, exception_traceback, source_json
             FROM chatgpt_code_executions WHERE message_id IN ({})",
            in_placeholders(message_ids.len())
        ))?;
        let mut rows = stmt.query(rusqlite::params_from_iter(id_params(message_ids)))?;
        let mut executions = Vec::new();
        while let Some(row) = rows.next()? {
            executions.push(ChatGptCodeExecutionRecord {
                id: parse_id(&row.get::<_, String>(0)?)?,
                message_id: parse_id(&row.get::<_, String>(1)?)?,
                run_id: row.get(2)?,
                status: row.get(3)?,
                code: row.get(4)?,
                started_at: parse_opt_ts(row.get(5)?)?,
                ended_at: parse_opt_ts(row.get(6)?)?,
                final_output: row.get(7)?,
                exception_name: row.get(8)?,
                exception_traceback: row.get(9)?,
                source_json: crate::db::parse_json(&row.get::<_, String>(10)?)?,
            });
        }
        Ok(executions)
    }

    pub fn canvas_docs_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ChatGptCanvasDocRecord>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, message_id, textdoc_id, textdoc_type, version, title, from_version,
                    content_length, has_user_edit, source_json
             FROM chatgpt_canvas_docs WHERE message_id IN ({})",
            in_placeholders(message_ids.len())
        ))?;
        let mut rows = stmt.query(rusqlite::params_from_iter(id_params(message_ids)))?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            docs.push(ChatGptCanvasDocRecord {
                id: parse_id(&row.get::<_, String>(0)?)?,
                message_id: parse_id(&row.get::<_, String>(1)?)?,
                textdoc_id: row.get(2)?,
                textdoc_type: row.get(3)?,
                version: row.get(4)?,
                title: row.get(5)?,
                from_version: row.get(6)?,
                content_length: row.get(7)?,
                has_user_edit: row.get(8)?,
                source_json: crate::db::parse_json(&row.get::<_, String>(9)?)?,
            });
        }
        Ok(docs)
    }

    /// Gizmo ids recorded on any of the given messages (distinct, non-null)
    pub fn gizmo_ids_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<String>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT DISTINCT gizmo_id FROM chatgpt_message_meta
             WHERE gizmo_id IS NOT NULL AND message_id IN ({})
             ORDER BY gizmo_id",
            in_placeholders(message_ids.len())
        ))?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(id_params(message_ids)), |row| {
                row.get(0)
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn attachments_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<AttachmentRecord>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, message_id, file_name, file_type, file_size, extracted_text, source_json
             FROM attachments WHERE message_id IN ({})",
            in_placeholders(message_ids.len())
        ))?;
        let mut rows = stmt.query(rusqlite::params_from_iter(id_params(message_ids)))?;
        let mut attachments = Vec::new();
        while let Some(row) = rows.next()? {
            attachments.push(AttachmentRecord {
                id: parse_id(&row.get::<_, String>(0)?)?,
                message_id: parse_id(&row.get::<_, String>(1)?)?,
                file_name: row.get(2)?,
                file_type: row.get(3)?,
                file_size: row.get(4)?,
                extracted_text: row.get(5)?,
                source_json: crate::db::parse_opt_json(row.get(6)?)?,
            });
        }
        Ok(attachments)
    }

    pub fn dalle_generations_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ChatGptDalleGenerationRecord>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT g.id, g.content_part_id, g.gen_id, g.prompt, g.seed, g.parent_gen_id,
                    g.edit_op, g.width, g.height, g.source_json
             FROM chatgpt_dalle_generations g
             JOIN content_parts p ON p.id = g.content_part_id
             WHERE p.message_id IN ({})",
            in_placeholders(message_ids.len())
        ))?;
        let mut rows = stmt.query(rusqlite::params_from_iter(id_params(message_ids)))?;
        let mut generations = Vec::new();
        while let Some(row) = rows.next()? {
            generations.push(ChatGptDalleGenerationRecord {
                id: parse_id(&row.get::<_, String>(0)?)?,
                content_part_id: parse_id(&row.get::<_, String>(1)?)?,
                gen_id: row.get(2)?,
                prompt: row.get(3)?,
                seed: row.get(4)?,
                parent_gen_id: row.get(5)?,
                edit_op: row.get(6)?,
                width: row.get(7)?,
                height: row.get(8)?,
                source_json: crate::db::parse_json(&row.get::<_, String>(9)?)?,
            });
        }
        Ok(generations)
    }
}
