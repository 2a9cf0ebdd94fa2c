//! Pack pricing calculator
//!
//! Pure functions mapping a pack selection to sub-plot count, surface and
//! price. Amounts are integral currency units; every product is checked.

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::model::PackType;

/// Surface of one sub-plot, in square metres
pub const SUB_PLOT_SURFACE_M2: u32 = 9;

/// Longest lease accepted, in months
pub const MAX_LEASE_MONTHS: u32 = 120;

impl PackType {
    pub fn sub_plot_count(&self) -> u32 {
        match self {
            PackType::Single => 1,
            PackType::Quad => 4,
            PackType::Nona => 9,
        }
    }
}

/// Derived financials for a parcel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackQuote {
    pub sub_plot_count: u32,
    pub surface_area: u32,
    pub total_monthly_price: i64,
}

pub fn surface_area(pack: PackType) -> u32 {
    pack.sub_plot_count() * SUB_PLOT_SURFACE_M2
}

pub fn total_monthly_price(pack: PackType, monthly_unit_price: i64) -> Result<i64> {
    monthly_unit_price
        .checked_mul(i64::from(pack.sub_plot_count()))
        .ok_or_else(|| EngineError::validation("monthlyUnitPrice", "price overflows for this pack"))
}

/// Quote a parcel configuration
pub fn quote(pack: PackType, monthly_unit_price: i64) -> Result<PackQuote> {
    Ok(PackQuote {
        sub_plot_count: pack.sub_plot_count(),
        surface_area: surface_area(pack),
        total_monthly_price: total_monthly_price(pack, monthly_unit_price)?,
    })
}

/// Financial terms of a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTerms {
    pub end_date: NaiveDate,
    pub monthly_amount: i64,
    pub total_amount: i64,
}

/// `start + months` in calendar months, clamped to the end of the target month
pub fn lease_end_date(start: NaiveDate, duration_months: u32) -> Result<NaiveDate> {
    start
        .checked_add_months(Months::new(duration_months))
        .ok_or_else(|| EngineError::validation("durationMonths", "end date out of range"))
}

/// Price a lease of `pack` against a parcel's unit price
pub fn lease_terms(
    pack: PackType,
    monthly_unit_price: i64,
    start: NaiveDate,
    duration_months: u32,
) -> Result<LeaseTerms> {
    if duration_months == 0 || duration_months > MAX_LEASE_MONTHS {
        return Err(EngineError::validation(
            "durationMonths",
            format!("must be between 1 and {}", MAX_LEASE_MONTHS),
        ));
    }

    let monthly_amount = total_monthly_price(pack, monthly_unit_price)?;
    let total_amount = monthly_amount
        .checked_mul(i64::from(duration_months))
        .ok_or_else(|| EngineError::validation("durationMonths", "total amount overflows"))?;

    Ok(LeaseTerms {
        end_date: lease_end_date(start, duration_months)?,
        monthly_amount,
        total_amount,
    })
}
