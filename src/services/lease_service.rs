//! Lease engine - creating and closing leases against parcels
//!
//! A lease and the parcel status it implies are written in the same IMMEDIATE
//! transaction. The status flip is a conditional update, so two requests
//! racing for one parcel cannot both observe it as AVAILABLE.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::{audit, leases, parcels, users, ParcelDb};
use crate::error::{EngineError, Result};
use crate::model::{
    ActivityType, AuditAction, Lease, LeaseStatus, PackType, Parcel, ParcelStatus, Role,
    UserSummary,
};
use crate::pricing;

use super::events::{EventBus, ParcelEvent};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeaseInput {
    pub parcel_id: String,
    /// May differ from the parcel's own pack
    pub pack_type: PackType,
    pub activity_type: ActivityType,
    pub start_date: NaiveDate,
    pub duration_months: u32,
}

/// The parcel side of a lease view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelBrief {
    pub id: String,
    pub code: String,
    pub region: String,
    pub locality: String,
    pub status: ParcelStatus,
    pub farmer: Option<UserSummary>,
}

/// Lease joined with its parcel and investor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseView {
    #[serde(flatten)]
    pub lease: Lease,
    pub parcel: Option<ParcelBrief>,
    pub investor: Option<UserSummary>,
}

pub struct LeaseEngine {
    db: Arc<ParcelDb>,
    events: Arc<EventBus>,
}

impl LeaseEngine {
    pub fn new(db: Arc<ParcelDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Lease an AVAILABLE parcel to the calling investor
    pub fn create_lease(&self, input: CreateLeaseInput, actor: &Identity) -> Result<LeaseView> {
        actor.require_role(&[Role::Investor, Role::Admin])?;

        if input.duration_months == 0 || input.duration_months > pricing::MAX_LEASE_MONTHS {
            return Err(EngineError::validation(
                "durationMonths",
                format!("must be between 1 and {}", pricing::MAX_LEASE_MONTHS),
            ));
        }

        let now = Utc::now();
        let view = self.db.with_write_tx(|tx| {
            let parcel = parcels::get_parcel(tx, &input.parcel_id)?
                .ok_or_else(|| EngineError::NotFound("Parcel".into()))?;
            let investor = users::get_summary(tx, &actor.user_id, false)?
                .ok_or_else(|| EngineError::NotFound("Investor".into()))?;

            if parcel.status != ParcelStatus::Available {
                warn!(parcel = %parcel.id, status = %parcel.status, "Lease rejected, parcel not available");
                return Err(EngineError::Conflict("parcel is not available for leasing".into()));
            }

            let terms = pricing::lease_terms(
                input.pack_type,
                parcel.monthly_unit_price,
                input.start_date,
                input.duration_months,
            )?;

            if input.pack_type.sub_plot_count() > parcel.sub_plot_count {
                warn!(
                    parcel = %parcel.id,
                    parcel_pack = %parcel.pack_type,
                    lease_pack = %input.pack_type,
                    "Lease pack exceeds the parcel's sub-plots"
                );
            }

            if !parcels::set_status_if(tx, &parcel.id, ParcelStatus::Available, ParcelStatus::Leased, now)? {
                return Err(EngineError::Conflict("parcel is not available for leasing".into()));
            }

            let lease = Lease {
                id: Uuid::new_v4().to_string(),
                parcel_id: parcel.id.clone(),
                investor_id: actor.user_id.clone(),
                pack_type: input.pack_type,
                activity_type: input.activity_type,
                start_date: input.start_date,
                end_date: terms.end_date,
                duration_months: input.duration_months,
                monthly_amount: terms.monthly_amount,
                total_amount: terms.total_amount,
                estimated_yield: parcel.estimated_yield,
                status: LeaseStatus::Active,
                created_at: now,
            };
            leases::insert_lease(tx, &lease)?;

            audit::append(
                tx,
                &parcel.id,
                AuditAction::Lease,
                &format!(
                    "Parcel leased to {} for {} months",
                    investor.display_name(),
                    input.duration_months
                ),
                &actor.user_id,
                now,
            )?;

            let parcel = Parcel {
                status: ParcelStatus::Leased,
                updated_at: now,
                ..parcel
            };
            Ok(LeaseView {
                parcel: Some(brief(tx, &parcel)?),
                investor: Some(investor),
                lease,
            })
        })?;

        info!(
            lease = %view.lease.id,
            parcel = %view.lease.parcel_id,
            investor = %view.lease.investor_id,
            total = view.lease.total_amount,
            "Lease created"
        );
        self.events.emit(ParcelEvent::LeaseCreated {
            lease_id: view.lease.id.clone(),
            parcel_id: view.lease.parcel_id.clone(),
            investor_id: view.lease.investor_id.clone(),
        });

        Ok(view)
    }

    /// The caller's leases, newest first
    pub fn list_mine(&self, actor: &Identity) -> Result<Vec<LeaseView>> {
        self.db.with_conn(|conn| {
            let investor = users::get_summary(conn, &actor.user_id, false)?;
            leases::list_for_investor(conn, &actor.user_id)?
                .into_iter()
                .map(|lease| {
                    Ok(LeaseView {
                        parcel: parcel_brief(conn, &lease.parcel_id)?,
                        investor: investor.clone(),
                        lease,
                    })
                })
                .collect()
        })
    }

    /// ACTIVE leases ending on or before `as_of` (today when unset). Admin only.
    pub fn list_expired(&self, as_of: Option<NaiveDate>, actor: &Identity) -> Result<Vec<LeaseView>> {
        actor.require_admin()?;
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());

        self.db.with_conn(|conn| {
            leases::list_expired(conn, as_of)?
                .into_iter()
                .map(|lease| joined(conn, lease))
                .collect()
        })
    }

    /// Mark an ACTIVE lease COMPLETED. Admin only.
    pub fn complete_lease(&self, id: &str, actor: &Identity) -> Result<LeaseView> {
        self.close_lease(id, LeaseStatus::Completed, actor)
    }

    /// Mark an ACTIVE lease CANCELLED. Admin only.
    pub fn cancel_lease(&self, id: &str, actor: &Identity) -> Result<LeaseView> {
        self.close_lease(id, LeaseStatus::Cancelled, actor)
    }

    fn close_lease(&self, id: &str, next: LeaseStatus, actor: &Identity) -> Result<LeaseView> {
        actor.require_admin()?;

        let now = Utc::now();
        let (view, released) = self.db.with_write_tx(|tx| {
            let lease = leases::get_lease(tx, id)?
                .ok_or_else(|| EngineError::NotFound("Lease".into()))?;
            if !lease.status.is_active() || !leases::set_status_if(tx, id, LeaseStatus::Active, next)? {
                return Err(EngineError::Conflict(format!(
                    "lease is {}, only ACTIVE leases can be closed",
                    lease.status
                )));
            }

            let mut released = false;
            if let Some(parcel) = parcels::get_parcel(tx, &lease.parcel_id)? {
                if parcel.status != ParcelStatus::Inactive
                    && parcel.status != ParcelStatus::Available
                    && !leases::has_active_lease(tx, &parcel.id)?
                {
                    released = parcels::set_status_if(
                        tx,
                        &parcel.id,
                        parcel.status,
                        ParcelStatus::Available,
                        now,
                    )?;
                }
            }

            let verb = match next {
                LeaseStatus::Cancelled => "cancelled",
                _ => "completed",
            };
            let investor = users::get_summary(tx, &lease.investor_id, false)?;
            let description = match &investor {
                Some(investor) => format!("Lease of {} {}", investor.display_name(), verb),
                None => format!("Lease {} {}", lease.id, verb),
            };
            audit::append(tx, &lease.parcel_id, AuditAction::LeaseClosure, &description, &actor.user_id, now)?;

            let lease = Lease { status: next, ..lease };
            Ok((joined(tx, lease)?, released))
        })?;

        info!(lease = %id, status = %next, parcel_released = released, "Lease closed");
        self.events.emit(ParcelEvent::LeaseClosed {
            lease_id: id.to_string(),
            parcel_id: view.lease.parcel_id.clone(),
            status: next,
            parcel_released: released,
        });

        Ok(view)
    }
}

fn brief(conn: &Connection, parcel: &Parcel) -> Result<ParcelBrief> {
    let farmer = match &parcel.farmer_id {
        Some(farmer_id) => users::get_summary(conn, farmer_id, false)?,
        None => None,
    };
    Ok(ParcelBrief {
        id: parcel.id.clone(),
        code: parcel.code.clone(),
        region: parcel.region.clone(),
        locality: parcel.locality.clone(),
        status: parcel.status,
        farmer,
    })
}

fn parcel_brief(conn: &Connection, parcel_id: &str) -> Result<Option<ParcelBrief>> {
    parcels::get_parcel(conn, parcel_id)?
        .map(|parcel| brief(conn, &parcel))
        .transpose()
}

fn joined(conn: &Connection, lease: Lease) -> Result<LeaseView> {
    Ok(LeaseView {
        parcel: parcel_brief(conn, &lease.parcel_id)?,
        investor: users::get_summary(conn, &lease.investor_id, false)?,
        lease,
    })
}
