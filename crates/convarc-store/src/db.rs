use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::schema;
use crate::{Error, Result};
use convarc_types::{format_timestamp, read_timestamp};

/// SQLite-backed entity store.
///
/// Concurrency model is single-writer per dialogue: one `Store` wraps one
/// connection, and callers bracket per-dialogue work with
/// `begin`/`commit`/`rollback`. Parallelism across dialogues belongs to the
/// caller (one store per worker).
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        schema::init_schema(&store.conn)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        schema::init_schema(&store.conn)?;
        Ok(store)
    }

    /// Begin a transaction for one dialogue's scope
    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

// Column conversion helpers shared by the query modules

pub(crate) fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| Error::Corrupt(format!("invalid id: {}", s)))
}

pub(crate) fn parse_opt_id(s: Option<String>) -> Result<Option<Uuid>> {
    match s {
        Some(s) => Ok(Some(parse_id(&s)?)),
        None => Ok(None),
    }
}

pub(crate) fn id_text(id: Uuid) -> String {
    id.to_string()
}

pub(crate) fn opt_id_text(id: Option<Uuid>) -> Option<String> {
    id.map(|i| i.to_string())
}

pub(crate) fn ts_text(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(format_timestamp)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    read_timestamp(s).ok_or_else(|| Error::Corrupt(format!("invalid timestamp: {}", s)))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match s {
        Some(s) => Ok(Some(parse_ts(&s)?)),
        None => Ok(None),
    }
}

pub(crate) fn json_text(value: &Value) -> String {
    value.to_string()
}

pub(crate) fn opt_json_text(value: Option<&Value>) -> Option<String> {
    value.map(|v| v.to_string())
}

pub(crate) fn parse_json(s: &str) -> Result<Value> {
    Ok(serde_json::from_str(s)?)
}

pub(crate) fn parse_opt_json(s: Option<String>) -> Result<Option<Value>> {
    match s {
        Some(s) => Ok(Some(parse_json(&s)?)),
        None => Ok(None),
    }
}
