//! Append-only parcel history

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::model::{AuditAction, AuditEntry};

fn from_row(row: &Row) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get("id")?,
        parcel_id: row.get("parcel_id")?,
        action: row.get("action")?,
        description: row.get("description")?,
        actor_id: row.get("actor_id")?,
        created_at: row.get("created_at")?,
    })
}

/// Append an entry and return it with its assigned id
pub fn append(
    conn: &Connection,
    parcel_id: &str,
    action: AuditAction,
    description: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<AuditEntry> {
    conn.execute(
        "INSERT INTO audit_entries (parcel_id, action, description, actor_id, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![parcel_id, action, description, actor_id, now],
    )?;

    Ok(AuditEntry {
        id: conn.last_insert_rowid(),
        parcel_id: parcel_id.to_string(),
        action,
        description: description.to_string(),
        actor_id: actor_id.to_string(),
        created_at: now,
    })
}

/// Most recent entries for a parcel, newest first
pub fn recent(conn: &Connection, parcel_id: &str, limit: u32) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM audit_entries WHERE parcel_id = ?
         ORDER BY created_at DESC, id DESC LIMIT ?",
    )?;
    let entries = stmt
        .query_map(params![parcel_id, limit], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}
