use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::db::{id_text, parse_id};
use crate::{ContentHashRecord, Error, Result, Store};
use convarc_types::{EntityType, HashScope, Normalization, format_timestamp};

/// Entities sharing one hash value under a given (entity_type, scope,
/// normalization) triple
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub hash_sha256: String,
    pub entity_ids: Vec<Uuid>,
}

impl Store {
    /// Insert or update one content hash. Returns `true` when a row was
    /// created or an existing row's hash changed; an identical re-write
    /// returns `false`.
    pub fn upsert_content_hash(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        scope: HashScope,
        normalization: Normalization,
        hash_sha256: &str,
    ) -> Result<bool> {
        let existing: Option<String> = self
            .conn()
            .query_row(
                r#"
                SELECT hash_sha256 FROM content_hashes
                WHERE entity_type = ?1 AND entity_id = ?2
                  AND hash_scope = ?3 AND normalization = ?4
                "#,
                params![
                    entity_type.as_str(),
                    id_text(entity_id),
                    scope.as_str(),
                    normalization.as_str()
                ],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            Some(stored) if stored == hash_sha256 => Ok(false),
            Some(_) => {
                self.conn().execute(
                    r#"
                    UPDATE content_hashes
                    SET hash_sha256 = ?5, computed_at = ?6
                    WHERE entity_type = ?1 AND entity_id = ?2
                      AND hash_scope = ?3 AND normalization = ?4
                    "#,
                    params![
                        entity_type.as_str(),
                        id_text(entity_id),
                        scope.as_str(),
                        normalization.as_str(),
                        hash_sha256,
                        format_timestamp(Utc::now()),
                    ],
                )?;
                Ok(true)
            }
            None => {
                self.conn().execute(
                    r#"
                    INSERT INTO content_hashes
                        (id, entity_type, entity_id, hash_scope, normalization,
                         hash_sha256, computed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        id_text(Uuid::new_v4()),
                        entity_type.as_str(),
                        id_text(entity_id),
                        scope.as_str(),
                        normalization.as_str(),
                        hash_sha256,
                        format_timestamp(Utc::now()),
                    ],
                )?;
                Ok(true)
            }
        }
    }

    pub fn get_content_hash(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        scope: HashScope,
        normalization: Normalization,
    ) -> Result<Option<ContentHashRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, hash_sha256 FROM content_hashes
            WHERE entity_type = ?1 AND entity_id = ?2
              AND hash_scope = ?3 AND normalization = ?4
            "#,
        )?;
        let mut rows = stmt.query(params![
            entity_type.as_str(),
            id_text(entity_id),
            scope.as_str(),
            normalization.as_str()
        ])?;
        match rows.next()? {
            Some(row) => Ok(Some(ContentHashRecord {
                id: parse_id(&row.get::<_, String>(0)?)?,
                entity_type,
                entity_id,
                hash_scope: scope,
                normalization,
                hash_sha256: row.get(1)?,
            })),
            None => Ok(None),
        }
    }

    pub fn count_content_hashes(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM content_hashes", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Hash values shared by more than one entity under the given triple
    pub fn find_duplicate_groups(
        &self,
        entity_type: EntityType,
        scope: HashScope,
        normalization: Normalization,
    ) -> Result<Vec<DuplicateGroup>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT hash_sha256 FROM content_hashes
            WHERE entity_type = ?1 AND hash_scope = ?2 AND normalization = ?3
            GROUP BY hash_sha256
            HAVING COUNT(*) > 1
            ORDER BY hash_sha256
            "#,
        )?;
        let hashes = stmt
            .query_map(
                params![entity_type.as_str(), scope.as_str(), normalization.as_str()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups = Vec::new();
        for hash in hashes {
            let mut id_stmt = self.conn().prepare(
                r#"
                SELECT entity_id FROM content_hashes
                WHERE entity_type = ?1 AND hash_scope = ?2 AND normalization = ?3
                  AND hash_sha256 = ?4
                ORDER BY entity_id
                "#,
            )?;
            let raw = id_stmt
                .query_map(
                    params![
                        entity_type.as_str(),
                        scope.as_str(),
                        normalization.as_str(),
                        &hash
                    ],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let entity_ids = raw
                .iter()
                .map(|s| parse_id(s))
                .collect::<Result<Vec<_>>>()?;
            groups.push(DuplicateGroup {
                hash_sha256: hash,
                entity_ids,
            });
        }
        Ok(groups)
    }

    /// Recompute check support: every stored hash row for one entity
    pub fn content_hashes_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Vec<ContentHashRecord>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, hash_scope, normalization, hash_sha256 FROM content_hashes
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY hash_scope, normalization
            "#,
        )?;
        let mut rows = stmt.query(params![entity_type.as_str(), id_text(entity_id)])?;
        let mut hashes = Vec::new();
        while let Some(row) = rows.next()? {
            let scope: String = row.get(1)?;
            let normalization: String = row.get(2)?;
            hashes.push(ContentHashRecord {
                id: parse_id(&row.get::<_, String>(0)?)?,
                entity_type,
                entity_id,
                hash_scope: HashScope::from_str(&scope)
                    .ok_or_else(|| Error::Corrupt(format!("invalid hash scope: {}", scope)))?,
                normalization: Normalization::from_str(&normalization).ok_or_else(|| {
                    Error::Corrupt(format!("invalid normalization: {}", normalization))
                })?,
                hash_sha256: row.get(3)?,
            });
        }
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let id = Uuid::new_v4();

        let created = store
            .upsert_content_hash(
                EntityType::Message,
                id,
                HashScope::Full,
                Normalization::None,
                "abc",
            )
            .unwrap();
        assert!(created);

        let repeated = store
            .upsert_content_hash(
                EntityType::Message,
                id,
                HashScope::Full,
                Normalization::None,
                "abc",
            )
            .unwrap();
        assert!(!repeated);

        let changed = store
            .upsert_content_hash(
                EntityType::Message,
                id,
                HashScope::Full,
                Normalization::None,
                "def",
            )
            .unwrap();
        assert!(changed);
        assert_eq!(store.count_content_hashes().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_groups() {
        let store = Store::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        for id in [a, b] {
            store
                .upsert_content_hash(
                    EntityType::Message,
                    id,
                    HashScope::Full,
                    Normalization::Normalized,
                    "shared",
                )
                .unwrap();
        }
        store
            .upsert_content_hash(
                EntityType::Message,
                c,
                HashScope::Full,
                Normalization::Normalized,
                "solo",
            )
            .unwrap();

        let groups = store
            .find_duplicate_groups(EntityType::Message, HashScope::Full, Normalization::Normalized)
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].hash_sha256, "shared");
        assert_eq!(groups[0].entity_ids.len(), 2);
    }
}
