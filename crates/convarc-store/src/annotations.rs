use std::collections::HashSet;

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

use crate::db::{id_text, parse_id};
use crate::schema::annotation_table;
use crate::{Result, Store};
use convarc_types::{EntityType, ValueType, canonical_json, format_timestamp};

/// Optional provenance attached to any annotation write
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteContext<'a> {
    pub source_version: Option<&'a str>,
    pub confidence: Option<f64>,
    pub reason: Option<&'a str>,
}

/// Idempotent writer over the value-type-partitioned annotation tables.
///
/// Writes are keyed by (entity_type, entity_id, key, value, source); for
/// flags the key alone is the uniqueness constraint. A duplicate write
/// returns `false` and leaves the existing row untouched.
pub struct AnnotationWriter<'a> {
    store: &'a Store,
}

impl<'a> AnnotationWriter<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn write_flag(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        key: &str,
        source: &str,
        ctx: WriteContext<'_>,
    ) -> Result<bool> {
        let table = annotation_table(entity_type, ValueType::Flag);
        let inserted = self.store.conn().execute(
            &format!(
                r#"
                INSERT OR IGNORE INTO {table}
                    (id, entity_id, key, source, source_version, confidence, reason, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#
            ),
            params![
                id_text(Uuid::new_v4()),
                id_text(entity_id),
                key,
                source,
                ctx.source_version,
                ctx.confidence,
                ctx.reason,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn write_string(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        key: &str,
        value: &str,
        source: &str,
        ctx: WriteContext<'_>,
    ) -> Result<bool> {
        let table = annotation_table(entity_type, ValueType::String);
        let inserted = self.store.conn().execute(
            &format!(
                r#"
                INSERT OR IGNORE INTO {table}
                    (id, entity_id, key, value, source, source_version, confidence, reason,
                     created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#
            ),
            params![
                id_text(Uuid::new_v4()),
                id_text(entity_id),
                key,
                value,
                source,
                ctx.source_version,
                ctx.confidence,
                ctx.reason,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn write_numeric(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        key: &str,
        value: f64,
        source: &str,
        ctx: WriteContext<'_>,
    ) -> Result<bool> {
        let table = annotation_table(entity_type, ValueType::Numeric);
        let inserted = self.store.conn().execute(
            &format!(
                r#"
                INSERT OR IGNORE INTO {table}
                    (id, entity_id, key, value, source, source_version, confidence, reason,
                     created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#
            ),
            params![
                id_text(Uuid::new_v4()),
                id_text(entity_id),
                key,
                value,
                source,
                ctx.source_version,
                ctx.confidence,
                ctx.reason,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn write_json(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        key: &str,
        value: &Value,
        source: &str,
        ctx: WriteContext<'_>,
    ) -> Result<bool> {
        let table = annotation_table(entity_type, ValueType::Json);
        // Canonical serialization so key order never defeats idempotency
        let inserted = self.store.conn().execute(
            &format!(
                r#"
                INSERT OR IGNORE INTO {table}
                    (id, entity_id, key, value, source, source_version, confidence, reason,
                     created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#
            ),
            params![
                id_text(Uuid::new_v4()),
                id_text(entity_id),
                key,
                canonical_json(value),
                source,
                ctx.source_version,
                ctx.confidence,
                ctx.reason,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }
}

/// Read side of the annotation substrate
pub struct AnnotationReader<'a> {
    store: &'a Store,
}

impl<'a> AnnotationReader<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn has_flag(&self, entity_type: EntityType, entity_id: Uuid, key: &str) -> Result<bool> {
        let table = annotation_table(entity_type, ValueType::Flag);
        let count: i64 = self.store.conn().query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE entity_id = ?1 AND key = ?2"),
            params![id_text(entity_id), key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn has_string(&self, entity_type: EntityType, entity_id: Uuid, key: &str) -> Result<bool> {
        let table = annotation_table(entity_type, ValueType::String);
        let count: i64 = self.store.conn().query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE entity_id = ?1 AND key = ?2"),
            params![id_text(entity_id), key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_strings(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        key: &str,
    ) -> Result<Vec<String>> {
        let table = annotation_table(entity_type, ValueType::String);
        let mut stmt = self.store.conn().prepare(&format!(
            "SELECT value FROM {table} WHERE entity_id = ?1 AND key = ?2 ORDER BY value"
        ))?;
        let values = stmt
            .query_map(params![id_text(entity_id), key], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }

    pub fn get_numerics(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        key: &str,
    ) -> Result<Vec<f64>> {
        let table = annotation_table(entity_type, ValueType::Numeric);
        let mut stmt = self.store.conn().prepare(&format!(
            "SELECT value FROM {table} WHERE entity_id = ?1 AND key = ?2 ORDER BY value"
        ))?;
        let values = stmt
            .query_map(params![id_text(entity_id), key], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<f64>>>()?;
        Ok(values)
    }

    pub fn get_json(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        key: &str,
    ) -> Result<Option<Value>> {
        let table = annotation_table(entity_type, ValueType::Json);
        let mut stmt = self.store.conn().prepare(&format!(
            "SELECT value FROM {table} WHERE entity_id = ?1 AND key = ?2 ORDER BY created_at LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![id_text(entity_id), key])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(crate::db::parse_json(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub fn find_entities_with_flag(
        &self,
        entity_type: EntityType,
        key: &str,
    ) -> Result<HashSet<Uuid>> {
        let table = annotation_table(entity_type, ValueType::Flag);
        let mut stmt = self
            .store
            .conn()
            .prepare(&format!(
                "SELECT DISTINCT entity_id FROM {table} WHERE key = ?1"
            ))?;
        let raw = stmt
            .query_map([key], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.iter().map(|s| parse_id(s)).collect()
    }

    pub fn find_entities_with_string(
        &self,
        entity_type: EntityType,
        key: &str,
        value: Option<&str>,
    ) -> Result<HashSet<Uuid>> {
        let table = annotation_table(entity_type, ValueType::String);
        let raw = match value {
            Some(value) => {
                let mut stmt = self.store.conn().prepare(&format!(
                    "SELECT DISTINCT entity_id FROM {table} WHERE key = ?1 AND value = ?2"
                ))?;
                stmt.query_map(params![key, value], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self.store.conn().prepare(&format!(
                    "SELECT DISTINCT entity_id FROM {table} WHERE key = ?1"
                ))?;
                stmt.query_map([key], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        raw.iter().map(|s| parse_id(s)).collect()
    }

    /// Distinct annotation keys present for one entity, across all four
    /// value-type tables
    pub fn get_all_keys(&self, entity_type: EntityType, entity_id: Uuid) -> Result<Vec<String>> {
        let mut keys = HashSet::new();
        for value_type in ValueType::ALL {
            let table = annotation_table(entity_type, value_type);
            let mut stmt = self
                .store
                .conn()
                .prepare(&format!(
                    "SELECT DISTINCT key FROM {table} WHERE entity_id = ?1"
                ))?;
            let found = stmt
                .query_map([id_text(entity_id)], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            keys.extend(found);
        }
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        Ok(keys)
    }

    /// Delete every annotation attached to one entity. Used when the entity
    /// is hard-deleted; soft-deleted messages keep their annotations.
    pub fn clear_entity(&self, entity_type: EntityType, entity_id: Uuid) -> Result<()> {
        for value_type in ValueType::ALL {
            let table = annotation_table(entity_type, value_type);
            self.store.conn().execute(
                &format!("DELETE FROM {table} WHERE entity_id = ?1"),
                [id_text(entity_id)],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flag_write_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let writer = AnnotationWriter::new(&store);
        let reader = AnnotationReader::new(&store);
        let id = Uuid::new_v4();

        let first = writer
            .write_flag(
                EntityType::Message,
                id,
                "has_code",
                "test",
                WriteContext::default(),
            )
            .unwrap();
        let second = writer
            .write_flag(
                EntityType::Message,
                id,
                "has_code",
                "test",
                WriteContext::default(),
            )
            .unwrap();

        assert!(first);
        assert!(!second);
        assert!(reader.has_flag(EntityType::Message, id, "has_code").unwrap());
        assert!(!reader.has_flag(EntityType::Message, id, "has_latex").unwrap());
    }

    #[test]
    fn test_string_allows_multiple_values_per_key() {
        let store = Store::open_in_memory().unwrap();
        let writer = AnnotationWriter::new(&store);
        let reader = AnnotationReader::new(&store);
        let id = Uuid::new_v4();

        for lang in ["python", "rust", "python"] {
            writer
                .write_string(
                    EntityType::Message,
                    id,
                    "code_language",
                    lang,
                    "test",
                    WriteContext::default(),
                )
                .unwrap();
        }

        let values = reader
            .get_strings(EntityType::Message, id, "code_language")
            .unwrap();
        assert_eq!(values, vec!["python".to_string(), "rust".to_string()]);
    }

    #[test]
    fn test_json_idempotency_survives_key_reordering() {
        let store = Store::open_in_memory().unwrap();
        let writer = AnnotationWriter::new(&store);
        let id = Uuid::new_v4();

        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();

        assert!(
            writer
                .write_json(EntityType::Exchange, id, "summary", &a, "test", WriteContext::default())
                .unwrap()
        );
        assert!(
            !writer
                .write_json(EntityType::Exchange, id, "summary", &b, "test", WriteContext::default())
                .unwrap()
        );
    }

    #[test]
    fn test_find_entities_and_keys() {
        let store = Store::open_in_memory().unwrap();
        let writer = AnnotationWriter::new(&store);
        let reader = AnnotationReader::new(&store);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        writer
            .write_flag(EntityType::Message, a, "has_latex", "t", WriteContext::default())
            .unwrap();
        writer
            .write_flag(EntityType::Message, b, "has_latex", "t", WriteContext::default())
            .unwrap();
        writer
            .write_numeric(EntityType::Message, a, "wiki_link_count", 3.0, "t", WriteContext::default())
            .unwrap();

        let found = reader
            .find_entities_with_flag(EntityType::Message, "has_latex")
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&a) && found.contains(&b));

        let keys = reader.get_all_keys(EntityType::Message, a).unwrap();
        assert_eq!(keys, vec!["has_latex".to_string(), "wiki_link_count".to_string()]);
    }
}
