use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use tracing::info;
use uuid::Uuid;

use crate::db::{id_text, parse_id, parse_ts};
use crate::{AnnotatorCursorRecord, Error, Result, Store};
use convarc_types::{EntityType, epoch_timestamp, format_timestamp};

/// Manages annotator cursors for incremental processing.
///
/// Each (annotator_name, annotator_version, entity_type) combination owns
/// one cursor holding the high-water mark and cumulative statistics.
/// Clearing a cursor forces full reprocessing on the next run; bumping a
/// version creates a fresh cursor and leaves prior-version annotations in
/// place.
pub struct CursorManager<'a> {
    store: &'a Store,
}

const CURSOR_COLUMNS: &str = "id, annotator_name, annotator_version, entity_type, \
     high_water_mark, entities_processed, annotations_created, \
     cumulative_runtime_seconds, updated_at";

fn cursor_from_row(row: &Row<'_>) -> Result<AnnotatorCursorRecord> {
    let entity_type: String = row.get(3)?;
    Ok(AnnotatorCursorRecord {
        id: parse_id(&row.get::<_, String>(0)?)?,
        annotator_name: row.get(1)?,
        annotator_version: row.get(2)?,
        entity_type: EntityType::from_str(&entity_type)
            .ok_or_else(|| Error::Corrupt(format!("invalid entity type: {}", entity_type)))?,
        high_water_mark: parse_ts(&row.get::<_, String>(4)?)?,
        entities_processed: row.get(5)?,
        annotations_created: row.get(6)?,
        cumulative_runtime_seconds: row.get(7)?,
        updated_at: parse_ts(&row.get::<_, String>(8)?)?,
    })
}

impl<'a> CursorManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Get the cursor for an annotator version, creating it at epoch when
    /// absent.
    pub fn get_or_create(
        &self,
        annotator_name: &str,
        annotator_version: &str,
        entity_type: EntityType,
    ) -> Result<AnnotatorCursorRecord> {
        if let Some(cursor) = self.find(annotator_name, annotator_version, entity_type)? {
            return Ok(cursor);
        }

        let cursor = AnnotatorCursorRecord {
            id: Uuid::new_v4(),
            annotator_name: annotator_name.to_string(),
            annotator_version: annotator_version.to_string(),
            entity_type,
            high_water_mark: epoch_timestamp(),
            entities_processed: 0,
            annotations_created: 0,
            cumulative_runtime_seconds: 0.0,
            updated_at: Utc::now(),
        };
        self.store.conn().execute(
            r#"
            INSERT INTO annotator_cursors
                (id, annotator_name, annotator_version, entity_type, high_water_mark,
                 entities_processed, annotations_created, cumulative_runtime_seconds,
                 updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0.0, ?6)
            "#,
            params![
                id_text(cursor.id),
                annotator_name,
                annotator_version,
                entity_type.as_str(),
                format_timestamp(cursor.high_water_mark),
                format_timestamp(cursor.updated_at),
            ],
        )?;

        info!(
            annotator = annotator_name,
            version = annotator_version,
            entity_type = entity_type.as_str(),
            "created annotator cursor"
        );

        Ok(cursor)
    }

    pub fn find(
        &self,
        annotator_name: &str,
        annotator_version: &str,
        entity_type: EntityType,
    ) -> Result<Option<AnnotatorCursorRecord>> {
        let mut stmt = self.store.conn().prepare(&format!(
            r#"
            SELECT {} FROM annotator_cursors
            WHERE annotator_name = ?1 AND annotator_version = ?2 AND entity_type = ?3
            "#,
            CURSOR_COLUMNS
        ))?;
        let mut rows = stmt.query(params![
            annotator_name,
            annotator_version,
            entity_type.as_str()
        ])?;
        match rows.next()? {
            Some(row) => Ok(Some(cursor_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Fold one run's statistics into the cursor: the high-water mark moves
    /// forward, counts and runtime accumulate.
    pub fn update(
        &self,
        cursor: &AnnotatorCursorRecord,
        entities_processed: i64,
        annotations_created: i64,
        new_high_water_mark: DateTime<Utc>,
        runtime_seconds: f64,
    ) -> Result<()> {
        self.store.conn().execute(
            r#"
            UPDATE annotator_cursors
            SET high_water_mark = ?2,
                entities_processed = entities_processed + ?3,
                annotations_created = annotations_created + ?4,
                cumulative_runtime_seconds = cumulative_runtime_seconds + ?5,
                updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                id_text(cursor.id),
                format_timestamp(new_high_water_mark),
                entities_processed,
                annotations_created,
                runtime_seconds,
                format_timestamp(Utc::now()),
            ],
        )?;

        info!(
            annotator = cursor.annotator_name.as_str(),
            version = cursor.annotator_version.as_str(),
            entities = entities_processed,
            annotations = annotations_created,
            runtime_seconds,
            "updated annotator cursor"
        );

        Ok(())
    }

    /// Delete a cursor, forcing full reprocessing on the next run
    pub fn clear(
        &self,
        annotator_name: &str,
        annotator_version: &str,
        entity_type: EntityType,
    ) -> Result<()> {
        self.store.conn().execute(
            r#"
            DELETE FROM annotator_cursors
            WHERE annotator_name = ?1 AND annotator_version = ?2 AND entity_type = ?3
            "#,
            params![annotator_name, annotator_version, entity_type.as_str()],
        )?;
        Ok(())
    }

    /// All cursors, most expensive first. Diagnostics surface.
    pub fn list_by_runtime(&self) -> Result<Vec<AnnotatorCursorRecord>> {
        self.list_ordered("cumulative_runtime_seconds DESC, annotator_name")
    }

    /// All cursors ordered by entity throughput
    pub fn list_by_entities(&self) -> Result<Vec<AnnotatorCursorRecord>> {
        self.list_ordered("entities_processed DESC, annotator_name")
    }

    fn list_ordered(&self, order_by: &str) -> Result<Vec<AnnotatorCursorRecord>> {
        let mut stmt = self.store.conn().prepare(&format!(
            "SELECT {} FROM annotator_cursors ORDER BY {}",
            CURSOR_COLUMNS, order_by
        ))?;
        let mut rows = stmt.query([])?;
        let mut cursors = Vec::new();
        while let Some(row) = rows.next()? {
            cursors.push(cursor_from_row(row)?);
        }
        Ok(cursors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_get_or_create_starts_at_epoch() {
        let store = Store::open_in_memory().unwrap();
        let cursors = CursorManager::new(&store);

        let cursor = cursors
            .get_or_create("LatexAnnotator", "1.0", EntityType::Message)
            .unwrap();
        assert_eq!(cursor.high_water_mark, epoch_timestamp());
        assert_eq!(cursor.entities_processed, 0);
        assert_eq!(cursor.cumulative_runtime_seconds, 0.0);
    }

    #[test]
    fn test_update_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let cursors = CursorManager::new(&store);

        let cursor = cursors
            .get_or_create("LatexAnnotator", "1.0", EntityType::Message)
            .unwrap();
        let mark = Utc::now();
        cursors.update(&cursor, 10, 3, mark, 0.5).unwrap();
        cursors.update(&cursor, 5, 1, mark + Duration::seconds(60), 0.25).unwrap();

        let reloaded = cursors
            .get_or_create("LatexAnnotator", "1.0", EntityType::Message)
            .unwrap();
        assert_eq!(reloaded.entities_processed, 15);
        assert_eq!(reloaded.annotations_created, 4);
        assert!((reloaded.cumulative_runtime_seconds - 0.75).abs() < 1e-9);
        assert!(reloaded.high_water_mark > mark);
    }

    #[test]
    fn test_version_bump_gets_fresh_cursor() {
        let store = Store::open_in_memory().unwrap();
        let cursors = CursorManager::new(&store);

        let v1 = cursors
            .get_or_create("CodeBlockAnnotator", "1.0", EntityType::Message)
            .unwrap();
        cursors.update(&v1, 100, 20, Utc::now(), 1.0).unwrap();

        let v2 = cursors
            .get_or_create("CodeBlockAnnotator", "2.0", EntityType::Message)
            .unwrap();
        assert_eq!(v2.entities_processed, 0);
        assert_eq!(v2.high_water_mark, epoch_timestamp());
    }

    #[test]
    fn test_clear_forces_reprocessing() {
        let store = Store::open_in_memory().unwrap();
        let cursors = CursorManager::new(&store);

        let cursor = cursors
            .get_or_create("WikiLinkAnnotator", "1.0", EntityType::Message)
            .unwrap();
        cursors.update(&cursor, 7, 7, Utc::now(), 0.1).unwrap();
        cursors
            .clear("WikiLinkAnnotator", "1.0", EntityType::Message)
            .unwrap();

        let fresh = cursors
            .get_or_create("WikiLinkAnnotator", "1.0", EntityType::Message)
            .unwrap();
        assert_eq!(fresh.entities_processed, 0);
    }

    #[test]
    fn test_list_by_runtime_orders_descending() {
        let store = Store::open_in_memory().unwrap();
        let cursors = CursorManager::new(&store);

        let cheap = cursors
            .get_or_create("Cheap", "1.0", EntityType::Message)
            .unwrap();
        let costly = cursors
            .get_or_create("Costly", "1.0", EntityType::Exchange)
            .unwrap();
        cursors.update(&cheap, 1, 0, Utc::now(), 0.1).unwrap();
        cursors.update(&costly, 1, 0, Utc::now(), 9.0).unwrap();

        let listed = cursors.list_by_runtime().unwrap();
        assert_eq!(listed[0].annotator_name, "Costly");
    }
}
