use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Parse a timestamp from the formats seen in provider exports.
///
/// Accepts epoch seconds (integer or float, fractional and negative OK) and
/// ISO-8601 strings. Strings without an offset are assigned UTC. Anything
/// else yields `None`. Returned instants are always timezone-aware UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => parse_epoch(n.as_f64()?),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// Parse an ISO-8601 timestamp string, assigning UTC when no offset is given.
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Offsetless variants: "2024-01-01T00:00:00[.ffffff]", space separator,
    // or a bare date
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

/// Parse epoch seconds (fractional and pre-1970 values allowed).
pub fn parse_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// Format a timestamp for storage.
///
/// Fixed-width RFC3339 UTC with microsecond precision so that SQL text
/// comparison orders chronologically.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_timestamp_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(format_timestamp)
}

/// Parse a stored timestamp back to a `DateTime<Utc>`.
pub fn read_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The epoch timestamp used as the initial annotator-cursor high-water mark.
pub fn epoch_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_default()
}

/// Whitespace-split word count; 0 for empty or missing text.
pub fn word_count(text: Option<&str>) -> usize {
    text.map(|t| t.split_whitespace().count()).unwrap_or(0)
}

/// Serialize a JSON value canonically: object keys sorted, no extra
/// whitespace. Used for change-detection hashing so that key order in the
/// export never looks like a content change.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// SHA-256 hex digest of a text
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable digest of a message payload used for change detection across
/// re-imports.
pub fn content_hash(source_json: &Value) -> String {
    match source_json {
        Value::String(s) => sha256_hex(s),
        other => sha256_hex(&canonical_json(other)),
    }
}
