//! Operational tasks scheduled on parcels

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use serde::Deserialize;

use crate::error::Result;
use crate::model::{ParcelTask, UserSummary};

pub const DEFAULT_TASK_STATUS: &str = "PLANNED";

/// Input for recording a task against a parcel
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Free label; `PLANNED` when unset
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assignee_id: Option<String>,
}

pub fn insert_task(
    conn: &Connection,
    id: &str,
    parcel_id: &str,
    task: &NewTask,
    now: DateTime<Utc>,
) -> Result<()> {
    let status = task.status.as_deref().unwrap_or(DEFAULT_TASK_STATUS);
    conn.execute(
        r#"
        INSERT INTO parcel_tasks (id, parcel_id, title, description, start_date, end_date, status, assignee_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            parcel_id,
            task.title,
            task.description,
            task.start_date,
            task.end_date,
            status,
            task.assignee_id,
            now,
        ],
    )?;
    Ok(())
}

fn from_row(row: &Row) -> rusqlite::Result<ParcelTask> {
    let assignee_id: Option<String> = row.get("assignee_id")?;
    let assignee = match assignee_id {
        Some(id) => Some(UserSummary {
            id,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            email: row.get("email")?,
            phone: None,
        }),
        None => None,
    };

    Ok(ParcelTask {
        id: row.get("id")?,
        parcel_id: row.get("parcel_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        status: row.get("status")?,
        assignee,
    })
}

/// Tasks of a parcel with assignee summaries, latest start date first
pub fn list_for_parcel(conn: &Connection, parcel_id: &str) -> Result<Vec<ParcelTask>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT t.id AS id, t.parcel_id AS parcel_id, t.title AS title,
               t.description AS description, t.start_date AS start_date,
               t.end_date AS end_date, t.status AS status,
               u.id AS assignee_id, u.first_name AS first_name,
               u.last_name AS last_name, u.email AS email
        FROM parcel_tasks t
        LEFT JOIN users u ON u.id = t.assignee_id
        WHERE t.parcel_id = ?
        ORDER BY t.start_date DESC, t.created_at DESC
        "#,
    )?;
    let tasks = stmt
        .query_map(params![parcel_id], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}
