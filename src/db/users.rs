//! User directory rows

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::error::Result;
use crate::model::{Role, User, UserSummary};

/// Maximum page size for directory listings
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Input for provisioning a directory user
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: Role,
}

/// Directory listing filters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    #[serde(default)]
    pub role: Option<Role>,
    /// Case-insensitive substring of email, first or last name
    #[serde(default)]
    pub search: Option<String>,
    /// 1-based page number
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl UserQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = vec![];
        let mut values = vec![];

        if let Some(role) = self.role {
            conditions.push("role = ?");
            values.push(Value::Text(role.as_str().to_string()));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            conditions.push("instr(search_key, ?) > 0");
            values.push(Value::Text(search.to_lowercase()));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

fn search_key(user: &User) -> String {
    format!("{} {} {}", user.email, user.first_name, user.last_name).to_lowercase()
}

fn from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        phone: row.get("phone")?,
        role: row.get("role")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO users (id, email, first_name, last_name, phone, role, is_active, search_key, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            user.id,
            user.email,
            user.first_name,
            user.last_name,
            user.phone,
            user.role,
            user.is_active,
            search_key(user),
            user.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    let user = conn
        .query_row("SELECT * FROM users WHERE id = ?", params![id], from_row)
        .optional()?;
    Ok(user)
}

/// Lookup by email; stored emails are lowercase
pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT * FROM users WHERE email = ?",
            params![email.trim().to_lowercase()],
            from_row,
        )
        .optional()?;
    Ok(user)
}

/// Display summary of a user; `with_phone` adds the phone number when one is on file
pub fn get_summary(conn: &Connection, id: &str, with_phone: bool) -> Result<Option<UserSummary>> {
    let summary = conn
        .query_row(
            "SELECT id, first_name, last_name, email, phone FROM users WHERE id = ?",
            params![id],
            |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    email: row.get(3)?,
                    phone: if with_phone { row.get(4)? } else { None },
                })
            },
        )
        .optional()?;
    Ok(summary)
}

/// One page of users ordered by last name, first name, then id
pub fn list_users(conn: &Connection, query: &UserQuery) -> Result<Vec<User>> {
    let (where_sql, mut values) = query.where_clause();
    let sql = format!(
        "SELECT * FROM users{} ORDER BY last_name, first_name, id LIMIT ? OFFSET ?",
        where_sql
    );
    let limit = i64::from(query.limit());
    values.push(Value::Integer(limit));
    values.push(Value::Integer(i64::from(query.page() - 1) * limit));

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(values.iter()), from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

pub fn count_users(conn: &Connection, query: &UserQuery) -> Result<u32> {
    let (where_sql, values) = query.where_clause();
    let sql = format!("SELECT COUNT(*) FROM users{}", where_sql);
    let count = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(count)
}
