//! Read-only aggregates over parcels

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::auth::Identity;
use crate::db::parcels::{self, GroupBy};
use crate::db::ParcelDb;
use crate::error::Result;
use crate::model::ParcelStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelStats {
    pub total: u32,
    /// Every status appears, with zero when no parcel has it
    pub by_status: BTreeMap<String, u32>,
    pub by_region: BTreeMap<String, u32>,
    pub by_activity: BTreeMap<String, u32>,
    /// Percentage of parcels LEASED or IN_PRODUCTION
    pub occupancy_rate: f64,
}

pub struct StatsService {
    db: Arc<ParcelDb>,
}

impl StatsService {
    pub fn new(db: Arc<ParcelDb>) -> Self {
        Self { db }
    }

    /// Admin only
    pub fn stats(&self, actor: &Identity) -> Result<ParcelStats> {
        actor.require_admin()?;

        let (by_status_rows, by_region, by_activity) = self.db.with_conn(|conn| {
            Ok((
                parcels::count_grouped(conn, GroupBy::Status)?,
                parcels::count_grouped(conn, GroupBy::Region)?,
                parcels::count_grouped(conn, GroupBy::Activity)?,
            ))
        })?;

        let mut by_status: BTreeMap<String, u32> = ParcelStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        by_status.extend(by_status_rows);

        let total: u32 = by_status.values().sum();
        let occupied = by_status[ParcelStatus::Leased.as_str()]
            + by_status[ParcelStatus::InProduction.as_str()];

        Ok(ParcelStats {
            total,
            by_status,
            by_region: by_region.into_iter().collect(),
            by_activity: by_activity.into_iter().collect(),
            occupancy_rate: occupancy_rate(occupied, total),
        })
    }
}

/// `occupied / total * 100`, or 0 for an empty registry
pub fn occupancy_rate(occupied: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(occupied) / f64::from(total) * 100.0
    }
}
