//! User directory - the people parcels and leases point at
//!
//! The directory holds no credentials. It exists so that parcels can name a
//! farmer and leases an investor, and so views can show who is who.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::{users, NewUser, ParcelDb, UserQuery};
use crate::error::{EngineError, Result};
use crate::model::{Role, User, UserSummary};

use super::events::{EventBus, ParcelEvent};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub users: Vec<User>,
    pub pagination: Pagination,
}

pub struct UserDirectory {
    db: Arc<ParcelDb>,
    events: Arc<EventBus>,
}

impl UserDirectory {
    pub fn new(db: Arc<ParcelDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Add a user to the directory. Admin only.
    pub fn provision_user(&self, input: NewUser, actor: &Identity) -> Result<User> {
        actor.require_admin()?;

        let email = input.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(EngineError::validation("email", "must be a valid email address"));
        }
        let first_name = required("firstName", &input.first_name)?;
        let last_name = required("lastName", &input.last_name)?;
        let phone = input
            .phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            first_name,
            last_name,
            phone,
            role: input.role,
            is_active: true,
            created_at: Utc::now(),
        };

        self.db.with_write_tx(|tx| users::insert_user(tx, &user))?;

        info!(id = %user.id, role = %user.role, "User provisioned");
        self.events.emit(ParcelEvent::UserProvisioned {
            id: user.id.clone(),
            role: user.role,
        });

        Ok(user)
    }

    /// Look up a user. Callers may read themselves; admins may read anyone.
    pub fn get_user(&self, id: &str, actor: &Identity) -> Result<User> {
        if actor.user_id != id {
            actor.require_admin()?;
        }
        self.db
            .with_conn(|conn| users::get_user(conn, id))?
            .ok_or_else(|| EngineError::NotFound("User".into()))
    }

    /// One page of the directory. Admin only.
    pub fn list_users(&self, query: &UserQuery, actor: &Identity) -> Result<UserPage> {
        actor.require_admin()?;

        let (users, total) = self.db.with_conn(|conn| {
            Ok((users::list_users(conn, query)?, users::count_users(conn, query)?))
        })?;

        let limit = query.limit();
        Ok(UserPage {
            users,
            pagination: Pagination {
                page: query.page(),
                limit,
                total,
                total_pages: total.div_ceil(limit),
            },
        })
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

/// Summary of the user behind a parcel's `farmerId`, which must hold the FARMER role
pub(crate) fn require_farmer(conn: &Connection, farmer_id: &str) -> Result<UserSummary> {
    let farmer = users::get_user(conn, farmer_id)?
        .ok_or_else(|| EngineError::NotFound("Farmer".into()))?;
    if farmer.role != Role::Farmer {
        return Err(EngineError::validation(
            "farmerId",
            format!("user {} is not a farmer", farmer_id),
        ));
    }
    Ok(farmer.summary())
}
