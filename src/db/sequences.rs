//! Atomic counters backing parcel code allocation
//!
//! A counter row per code prefix is bumped with a single upsert. Callers run
//! this inside the same write transaction as the parcel insert, so two
//! creations can never observe the same value.

use rusqlite::{params, Connection};

use crate::code;
use crate::error::{EngineError, Result};

/// Allocate the next sequence number for `prefix` (e.g. `PAR-DAK-2024`).
///
/// The first allocation for a prefix starts after the highest code already
/// stored under it.
pub fn next_sequence(conn: &Connection, prefix: &str) -> Result<u32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM code_sequences WHERE prefix = ?)",
        params![prefix],
        |row| row.get(0),
    )?;

    if !exists {
        let floor = highest_existing(conn, prefix)?;
        conn.execute(
            "INSERT OR IGNORE INTO code_sequences (prefix, last_value) VALUES (?, ?)",
            params![prefix, floor],
        )?;
    }

    let value: i64 = conn.query_row(
        r#"
        INSERT INTO code_sequences (prefix, last_value) VALUES (?, 1)
        ON CONFLICT(prefix) DO UPDATE SET last_value = last_value + 1
        RETURNING last_value
        "#,
        params![prefix],
        |row| row.get(0),
    )?;

    u32::try_from(value)
        .map_err(|_| EngineError::Internal(format!("sequence for {} out of range", prefix)))
}

fn highest_existing(conn: &Connection, prefix: &str) -> Result<u32> {
    let mut stmt = conn.prepare("SELECT code FROM parcels WHERE substr(code, 1, ?) = ?")?;
    let prefix_len = i64::try_from(prefix.chars().count() + 1).unwrap_or(i64::MAX);
    let with_dash = format!("{}-", prefix);

    let codes = stmt
        .query_map(params![prefix_len, with_dash], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(codes
        .iter()
        .filter_map(|c| code::parse_code(c))
        .filter(|(p, _)| *p == prefix)
        .map(|(_, seq)| seq)
        .max()
        .unwrap_or(0))
}
