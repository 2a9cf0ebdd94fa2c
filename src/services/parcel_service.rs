//! Parcel registry - business logic for parcel operations
//!
//! Owns every parcel write path. Each mutation runs in one write transaction
//! that also appends the matching audit entry, so a parcel change and its
//! history line commit or roll back together.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::code;
use crate::db::{audit, leases, parcels, sequences, tasks, users, NewTask, ParcelDb, ParcelQuery};
use crate::error::{EngineError, Result};
use crate::model::{
    ActivityType, AuditAction, AuditEntry, Lease, PackType, Parcel, ParcelStatus, ParcelTask,
    UserSummary,
};
use crate::pricing;

use super::events::{EventBus, ParcelEvent};
use super::user_service::require_farmer;

/// Audit entries shown on the detail view unless configured otherwise
pub const DEFAULT_AUDIT_LIMIT: u32 = 20;
/// Hard cap for the history endpoint
pub const MAX_HISTORY_LIMIT: u32 = 100;
pub const MAX_IMAGES: usize = 20;

// ============================================================================
// Inputs
// ============================================================================

/// Fields accepted when creating a parcel. Derived financials and the code
/// are computed, never supplied.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParcelInput {
    pub region: String,
    pub locality: String,
    pub latitude: f64,
    pub longitude: f64,
    pub pack_type: PackType,
    pub activity_type: ActivityType,
    pub monthly_unit_price: i64,
    pub estimated_yield: f64,
    /// Initial status; `AVAILABLE` when unset
    #[serde(default)]
    pub status: Option<ParcelStatus>,
    #[serde(default)]
    pub current_crop: Option<String>,
    #[serde(default)]
    pub soil_quality: Option<String>,
    #[serde(default)]
    pub water_access: bool,
    #[serde(default)]
    pub exposure: Option<String>,
    #[serde(default)]
    pub organic_certified: bool,
    #[serde(default)]
    pub co2_absorbed: Option<f64>,
    #[serde(default)]
    pub water_saved: Option<f64>,
    #[serde(default)]
    pub biodiversity_score: Option<i64>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub main_image: Option<String>,
    #[serde(default)]
    pub farmer_id: Option<String>,
}

/// Partial update. Absent fields are left untouched; `farmerId: null` unassigns the farmer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParcelInput {
    pub region: Option<String>,
    pub locality: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pack_type: Option<PackType>,
    pub activity_type: Option<ActivityType>,
    pub monthly_unit_price: Option<i64>,
    pub estimated_yield: Option<f64>,
    pub status: Option<ParcelStatus>,
    pub current_crop: Option<String>,
    pub soil_quality: Option<String>,
    pub water_access: Option<bool>,
    pub exposure: Option<String>,
    pub organic_certified: Option<bool>,
    pub co2_absorbed: Option<f64>,
    pub water_saved: Option<f64>,
    pub biodiversity_score: Option<i64>,
    pub images: Option<Vec<String>>,
    pub main_image: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub farmer_id: Option<Option<String>>,
}

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// Views
// ============================================================================

/// Parcel with its farmer and, when leased, its active lease
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelView {
    #[serde(flatten)]
    pub parcel: Parcel,
    pub farmer: Option<UserSummary>,
    pub active_lease: Option<LeaseWithInvestor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelList {
    pub parcels: Vec<ParcelView>,
    /// Matching parcels regardless of paging
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseWithInvestor {
    #[serde(flatten)]
    pub lease: Lease,
    pub investor: Option<UserSummary>,
}

/// Full parcel detail
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelDetail {
    #[serde(flatten)]
    pub parcel: Parcel,
    /// Includes the farmer's phone number when on file
    pub farmer: Option<UserSummary>,
    /// Newest first
    pub leases: Vec<LeaseWithInvestor>,
    /// Latest start date first
    pub tasks: Vec<ParcelTask>,
    /// Most recent audit entries, newest first
    pub history: Vec<AuditEntry>,
}

// ============================================================================
// Registry
// ============================================================================

pub struct ParcelRegistry {
    db: Arc<ParcelDb>,
    events: Arc<EventBus>,
    audit_limit: u32,
}

impl ParcelRegistry {
    pub fn new(db: Arc<ParcelDb>, events: Arc<EventBus>) -> Self {
        Self {
            db,
            events,
            audit_limit: DEFAULT_AUDIT_LIMIT,
        }
    }

    /// Number of audit entries on the detail view
    pub fn with_audit_limit(mut self, limit: u32) -> Self {
        self.audit_limit = limit.max(1);
        self
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Load a parcel with farmer, leases, tasks and recent history
    pub fn get_by_id(&self, id: &str, _actor: &Identity) -> Result<ParcelDetail> {
        self.db.with_conn(|conn| {
            let parcel = load_parcel(conn, id)?;

            let farmer = match &parcel.farmer_id {
                Some(farmer_id) => users::get_summary(conn, farmer_id, true)?,
                None => None,
            };

            let leases = leases::list_for_parcel(conn, id)?
                .into_iter()
                .map(|lease| {
                    let investor = users::get_summary(conn, &lease.investor_id, false)?;
                    Ok(LeaseWithInvestor { lease, investor })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(ParcelDetail {
                farmer,
                leases,
                tasks: tasks::list_for_parcel(conn, id)?,
                history: audit::recent(conn, id, self.audit_limit)?,
                parcel,
            })
        })
    }

    /// Filtered listing, newest first, with a total independent of paging
    pub fn list(&self, query: &ParcelQuery) -> Result<ParcelList> {
        debug!(?query, "Listing parcels");
        self.db.with_conn(|conn| {
            let items = parcels::list_parcels(conn, query)?
                .into_iter()
                .map(|parcel| view(conn, parcel))
                .collect::<Result<Vec<_>>>()?;

            Ok(ParcelList {
                parcels: items,
                total: parcels::count_parcels(conn, query)?,
            })
        })
    }

    /// Audit entries for a parcel, newest first. Admin only.
    pub fn history(&self, id: &str, limit: Option<u32>, actor: &Identity) -> Result<Vec<AuditEntry>> {
        actor.require_admin()?;
        let limit = limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_HISTORY_LIMIT);

        self.db.with_conn(|conn| {
            load_parcel(conn, id)?;
            audit::recent(conn, id, limit)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a parcel with a freshly allocated code. Admin only.
    pub fn create(&self, input: CreateParcelInput, actor: &Identity) -> Result<ParcelView> {
        actor.require_admin()?;

        let region = validate_region(&input.region)?;
        let locality = validate_text("locality", &input.locality)?;
        validate_coordinates(input.latitude, input.longitude)?;
        validate_unit_price(input.monthly_unit_price)?;
        validate_percent("estimatedYield", input.estimated_yield)?;
        validate_non_negative("co2Absorbed", input.co2_absorbed)?;
        validate_non_negative("waterSaved", input.water_saved)?;
        let biodiversity_score = validate_biodiversity(input.biodiversity_score)?;
        let images = validate_images(input.images)?;

        let status = input.status.unwrap_or(ParcelStatus::Available);
        if !ParcelStatus::Available.can_transition_to(status) {
            return Err(EngineError::validation(
                "status",
                format!("a new parcel cannot start as {}", status),
            ));
        }

        let quote = pricing::quote(input.pack_type, input.monthly_unit_price)?;
        let now = Utc::now();
        let prefix = code::code_prefix(&code::region_code(&region)?, now.year());

        let result = self.db.with_write_tx(|tx| {
            let farmer = match &input.farmer_id {
                Some(farmer_id) => Some(require_farmer(tx, farmer_id)?),
                None => None,
            };

            let sequence = sequences::next_sequence(tx, &prefix)?;
            let parcel = Parcel {
                id: Uuid::new_v4().to_string(),
                code: code::format_code(&prefix, sequence),
                region,
                locality,
                latitude: input.latitude,
                longitude: input.longitude,
                pack_type: input.pack_type,
                activity_type: input.activity_type,
                sub_plot_count: quote.sub_plot_count,
                surface_area: quote.surface_area,
                monthly_unit_price: input.monthly_unit_price,
                total_monthly_price: quote.total_monthly_price,
                estimated_yield: input.estimated_yield,
                status,
                current_crop: input.current_crop,
                soil_quality: input.soil_quality,
                water_access: input.water_access,
                exposure: input.exposure,
                organic_certified: input.organic_certified,
                co2_absorbed: input.co2_absorbed,
                water_saved: input.water_saved,
                biodiversity_score,
                images,
                main_image: input.main_image,
                farmer_id: input.farmer_id,
                created_by: actor.user_id.clone(),
                created_at: now,
                updated_at: now,
            };

            parcels::insert_parcel(tx, &parcel)?;
            audit::append(
                tx,
                &parcel.id,
                AuditAction::Creation,
                &format!("Parcel {} created", parcel.code),
                &actor.user_id,
                now,
            )?;

            Ok(ParcelView {
                parcel,
                farmer,
                active_lease: None,
            })
        })?;

        info!(id = %result.parcel.id, code = %result.parcel.code, actor = %actor.user_id, "Parcel created");
        self.events.emit(ParcelEvent::ParcelCreated {
            id: result.parcel.id.clone(),
            code: result.parcel.code.clone(),
        });

        Ok(result)
    }

    /// Apply a partial update. Admin only.
    ///
    /// Touching `packType` or `monthlyUnitPrice` recomputes the derived
    /// financials from the resulting pair.
    pub fn update(&self, id: &str, patch: UpdateParcelInput, actor: &Identity) -> Result<ParcelView> {
        actor.require_admin()?;
        validate_patch(&patch)?;

        let now = Utc::now();
        let result = self.db.with_write_tx(|tx| {
            let mut parcel = load_parcel(tx, id)?;
            let mut changed: Vec<&str> = vec![];

            if let Some(status) = patch.status {
                if status != parcel.status {
                    check_transition(tx, &parcel, status)?;
                    parcel.status = status;
                    changed.push("status");
                }
            }

            if let Some(farmer_id) = &patch.farmer_id {
                if let Some(farmer_id) = farmer_id {
                    require_farmer(tx, farmer_id)?;
                }
                parcel.farmer_id = farmer_id.clone();
                changed.push("farmerId");
            }

            if let Some(region) = &patch.region {
                parcel.region = validate_region(region)?;
                changed.push("region");
            }
            if let Some(locality) = &patch.locality {
                parcel.locality = validate_text("locality", locality)?;
                changed.push("locality");
            }
            if let Some(latitude) = patch.latitude {
                parcel.latitude = latitude;
                changed.push("latitude");
            }
            if let Some(longitude) = patch.longitude {
                parcel.longitude = longitude;
                changed.push("longitude");
            }

            if patch.pack_type.is_some() || patch.monthly_unit_price.is_some() {
                let pack = patch.pack_type.unwrap_or(parcel.pack_type);
                let unit_price = patch.monthly_unit_price.unwrap_or(parcel.monthly_unit_price);
                let quote = pricing::quote(pack, unit_price)?;

                parcel.pack_type = pack;
                parcel.monthly_unit_price = unit_price;
                parcel.sub_plot_count = quote.sub_plot_count;
                parcel.surface_area = quote.surface_area;
                parcel.total_monthly_price = quote.total_monthly_price;
                if patch.pack_type.is_some() {
                    changed.push("packType");
                }
                if patch.monthly_unit_price.is_some() {
                    changed.push("monthlyUnitPrice");
                }
            }

            if let Some(activity) = patch.activity_type {
                parcel.activity_type = activity;
                changed.push("activityType");
            }
            if let Some(estimated_yield) = patch.estimated_yield {
                parcel.estimated_yield = estimated_yield;
                changed.push("estimatedYield");
            }
            if let Some(crop) = &patch.current_crop {
                parcel.current_crop = Some(crop.clone());
                changed.push("currentCrop");
            }
            if let Some(soil) = &patch.soil_quality {
                parcel.soil_quality = Some(soil.clone());
                changed.push("soilQuality");
            }
            if let Some(water_access) = patch.water_access {
                parcel.water_access = water_access;
                changed.push("waterAccess");
            }
            if let Some(exposure) = &patch.exposure {
                parcel.exposure = Some(exposure.clone());
                changed.push("exposure");
            }
            if let Some(organic) = patch.organic_certified {
                parcel.organic_certified = organic;
                changed.push("organicCertified");
            }
            if let Some(co2) = patch.co2_absorbed {
                parcel.co2_absorbed = Some(co2);
                changed.push("co2Absorbed");
            }
            if let Some(water_saved) = patch.water_saved {
                parcel.water_saved = Some(water_saved);
                changed.push("waterSaved");
            }
            if patch.biodiversity_score.is_some() {
                parcel.biodiversity_score = validate_biodiversity(patch.biodiversity_score)?;
                changed.push("biodiversityScore");
            }
            if let Some(images) = &patch.images {
                parcel.images = validate_images(images.clone())?;
                changed.push("images");
            }
            if let Some(main_image) = &patch.main_image {
                parcel.main_image = Some(main_image.clone());
                changed.push("mainImage");
            }

            parcel.updated_at = now;
            parcels::update_parcel(tx, &parcel)?;

            let description = if changed.is_empty() {
                format!("Parcel {} updated", parcel.code)
            } else {
                format!("Parcel {} updated: {}", parcel.code, changed.join(", "))
            };
            audit::append(tx, id, AuditAction::Modification, &description, &actor.user_id, now)?;

            view(tx, parcel)
        })?;

        info!(id = %id, actor = %actor.user_id, "Parcel updated");
        self.events.emit(ParcelEvent::ParcelUpdated { id: id.to_string() });

        Ok(result)
    }

    /// Delete a parcel that has no active lease. Admin only.
    pub fn delete(&self, id: &str, actor: &Identity) -> Result<()> {
        actor.require_admin()?;

        self.db.with_write_tx(|tx| {
            let parcel = load_parcel(tx, id)?;
            if leases::has_active_lease(tx, id)? {
                warn!(id = %id, code = %parcel.code, "Refusing to delete leased parcel");
                return Err(EngineError::Conflict(
                    "parcel has an active lease and cannot be deleted".into(),
                ));
            }
            parcels::delete_parcel(tx, id)?;
            Ok(())
        })?;

        info!(id = %id, actor = %actor.user_id, "Parcel deleted");
        self.events.emit(ParcelEvent::ParcelDeleted { id: id.to_string() });

        Ok(())
    }

    /// Schedule an operational task on a parcel. Admin only.
    pub fn record_task(&self, parcel_id: &str, input: NewTask, actor: &Identity) -> Result<ParcelTask> {
        actor.require_admin()?;

        let title = validate_text("title", &input.title)?;
        if let Some(end) = input.end_date {
            if end < input.start_date {
                return Err(EngineError::validation("endDate", "must not precede startDate"));
            }
        }
        let input = NewTask { title, ..input };

        let task_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let task = self.db.with_write_tx(|tx| {
            load_parcel(tx, parcel_id)?;
            if let Some(assignee_id) = &input.assignee_id {
                if users::get_user(tx, assignee_id)?.is_none() {
                    return Err(EngineError::NotFound("Assignee".into()));
                }
            }

            tasks::insert_task(tx, &task_id, parcel_id, &input, now)?;

            let assignee = match &input.assignee_id {
                Some(assignee_id) => users::get_summary(tx, assignee_id, false)?,
                None => None,
            };
            Ok(ParcelTask {
                id: task_id.clone(),
                parcel_id: parcel_id.to_string(),
                title: input.title.clone(),
                description: input.description.clone(),
                start_date: input.start_date,
                end_date: input.end_date,
                status: input
                    .status
                    .clone()
                    .unwrap_or_else(|| tasks::DEFAULT_TASK_STATUS.to_string()),
                assignee,
            })
        })?;

        info!(parcel = %parcel_id, task = %task.id, "Task recorded");
        self.events.emit(ParcelEvent::TaskRecorded {
            task_id: task.id.clone(),
            parcel_id: parcel_id.to_string(),
        });

        Ok(task)
    }
}

fn load_parcel(conn: &Connection, id: &str) -> Result<Parcel> {
    parcels::get_parcel(conn, id)?.ok_or_else(|| EngineError::NotFound("Parcel".into()))
}

fn view(conn: &Connection, parcel: Parcel) -> Result<ParcelView> {
    let farmer = match &parcel.farmer_id {
        Some(farmer_id) => users::get_summary(conn, farmer_id, false)?,
        None => None,
    };
    let active_lease = match leases::active_lease_for_parcel(conn, &parcel.id)? {
        Some(lease) => {
            let investor = users::get_summary(conn, &lease.investor_id, false)?;
            Some(LeaseWithInvestor { lease, investor })
        }
        None => None,
    };
    Ok(ParcelView {
        parcel,
        farmer,
        active_lease,
    })
}

fn check_transition(conn: &Connection, parcel: &Parcel, next: ParcelStatus) -> Result<()> {
    if !parcel.status.can_transition_to(next) {
        warn!(id = %parcel.id, from = %parcel.status, to = %next, "Rejected status transition");
        return Err(EngineError::Conflict(format!(
            "cannot move parcel from {} to {}",
            parcel.status, next
        )));
    }
    if next == ParcelStatus::Available && leases::has_active_lease(conn, &parcel.id)? {
        return Err(EngineError::Conflict(
            "parcel has an active lease; close it before releasing the parcel".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Validation
// ============================================================================

fn validate_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

fn validate_region(value: &str) -> Result<String> {
    let region = validate_text("region", value)?;
    code::region_code(&region)?;
    Ok(region)
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    validate_latitude(latitude)?;
    validate_longitude(longitude)
}

fn validate_latitude(latitude: f64) -> Result<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(EngineError::validation("latitude", "must be between -90 and 90"));
    }
    Ok(())
}

fn validate_longitude(longitude: f64) -> Result<()> {
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(EngineError::validation("longitude", "must be between -180 and 180"));
    }
    Ok(())
}

fn validate_unit_price(price: i64) -> Result<()> {
    if price <= 0 {
        return Err(EngineError::validation("monthlyUnitPrice", "must be positive"));
    }
    Ok(())
}

fn validate_percent(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(EngineError::validation(field, "must be between 0 and 100"));
    }
    Ok(())
}

fn validate_non_negative(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(EngineError::validation(field, "must be a non-negative number"))
        }
        _ => Ok(()),
    }
}

fn validate_biodiversity(score: Option<i64>) -> Result<Option<u8>> {
    score
        .map(|s| {
            u8::try_from(s)
                .ok()
                .filter(|s| *s <= 100)
                .ok_or_else(|| EngineError::validation("biodiversityScore", "must be between 0 and 100"))
        })
        .transpose()
}

fn validate_images(images: Vec<String>) -> Result<Vec<String>> {
    if images.len() > MAX_IMAGES {
        return Err(EngineError::validation(
            "images",
            format!("at most {} images are allowed", MAX_IMAGES),
        ));
    }
    images
        .into_iter()
        .map(|url| validate_text("images", &url))
        .collect()
}

/// Field checks that need no store access, run before the transaction opens
fn validate_patch(patch: &UpdateParcelInput) -> Result<()> {
    if let Some(region) = &patch.region {
        validate_region(region)?;
    }
    if let Some(locality) = &patch.locality {
        validate_text("locality", locality)?;
    }
    if let Some(latitude) = patch.latitude {
        validate_latitude(latitude)?;
    }
    if let Some(longitude) = patch.longitude {
        validate_longitude(longitude)?;
    }
    if let Some(price) = patch.monthly_unit_price {
        validate_unit_price(price)?;
    }
    if let Some(estimated_yield) = patch.estimated_yield {
        validate_percent("estimatedYield", estimated_yield)?;
    }
    validate_non_negative("co2Absorbed", patch.co2_absorbed)?;
    validate_non_negative("waterSaved", patch.water_saved)?;
    validate_biodiversity(patch.biodiversity_score)?;
    if let Some(images) = &patch.images {
        validate_images(images.clone())?;
    }
    Ok(())
}
