//! Lease rows and queries

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::model::{Lease, LeaseStatus};

fn from_row(row: &Row) -> rusqlite::Result<Lease> {
    Ok(Lease {
        id: row.get("id")?,
        parcel_id: row.get("parcel_id")?,
        investor_id: row.get("investor_id")?,
        pack_type: row.get("pack_type")?,
        activity_type: row.get("activity_type")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        duration_months: row.get("duration_months")?,
        monthly_amount: row.get("monthly_amount")?,
        total_amount: row.get("total_amount")?,
        estimated_yield: row.get("estimated_yield")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert_lease(conn: &Connection, lease: &Lease) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO leases (
            id, parcel_id, investor_id, pack_type, activity_type,
            start_date, end_date, duration_months, monthly_amount, total_amount,
            estimated_yield, status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            lease.id,
            lease.parcel_id,
            lease.investor_id,
            lease.pack_type,
            lease.activity_type,
            lease.start_date,
            lease.end_date,
            lease.duration_months,
            lease.monthly_amount,
            lease.total_amount,
            lease.estimated_yield,
            lease.status,
            lease.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_lease(conn: &Connection, id: &str) -> Result<Option<Lease>> {
    let lease = conn
        .query_row("SELECT * FROM leases WHERE id = ?", params![id], from_row)
        .optional()?;
    Ok(lease)
}

fn query_leases(conn: &Connection, sql: &str, param: &dyn rusqlite::ToSql) -> Result<Vec<Lease>> {
    let mut stmt = conn.prepare(sql)?;
    let leases = stmt
        .query_map([param], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(leases)
}

/// Every lease of a parcel, newest first
pub fn list_for_parcel(conn: &Connection, parcel_id: &str) -> Result<Vec<Lease>> {
    query_leases(
        conn,
        "SELECT * FROM leases WHERE parcel_id = ? ORDER BY created_at DESC, rowid DESC",
        &parcel_id,
    )
}

/// Every lease of an investor, newest first
pub fn list_for_investor(conn: &Connection, investor_id: &str) -> Result<Vec<Lease>> {
    query_leases(
        conn,
        "SELECT * FROM leases WHERE investor_id = ? ORDER BY created_at DESC, rowid DESC",
        &investor_id,
    )
}

/// Active leases whose end date is on or before `as_of`, oldest end date first
pub fn list_expired(conn: &Connection, as_of: NaiveDate) -> Result<Vec<Lease>> {
    query_leases(
        conn,
        "SELECT * FROM leases WHERE status = 'ACTIVE' AND end_date <= ? ORDER BY end_date, rowid",
        &as_of,
    )
}

pub fn active_lease_for_parcel(conn: &Connection, parcel_id: &str) -> Result<Option<Lease>> {
    let lease = conn
        .query_row(
            "SELECT * FROM leases WHERE parcel_id = ? AND status = 'ACTIVE' LIMIT 1",
            params![parcel_id],
            from_row,
        )
        .optional()?;
    Ok(lease)
}

pub fn has_active_lease(conn: &Connection, parcel_id: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM leases WHERE parcel_id = ? AND status = 'ACTIVE')",
        params![parcel_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Conditional status change. Returns false when the lease is not in `expected`.
pub fn set_status_if(
    conn: &Connection,
    id: &str,
    expected: LeaseStatus,
    next: LeaseStatus,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE leases SET status = ? WHERE id = ? AND status = ?",
        params![next, id, expected],
    )?;
    Ok(updated == 1)
}
