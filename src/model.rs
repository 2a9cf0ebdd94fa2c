//! Domain types shared by the store, the services and the HTTP layer
//!
//! Every enum has exactly one canonical spelling (SCREAMING_SNAKE_CASE) used
//! both on the wire and in SQLite. Translating other vocabularies is the
//! caller's concern.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Declares a closed string enum with `as_str`, `FromStr`, `Display` and SQLite mapping.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(EngineError::validation($field, format!("unknown value '{}'", other))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse().map_err(|e: EngineError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

string_enum!(
    /// Bundle size a parcel or a lease is configured with
    PackType, "packType" {
        Single => "SINGLE",
        Quad => "QUAD",
        Nona => "NONA",
    }
);

string_enum!(
    /// Farming method applied to a parcel
    ActivityType, "activityType" {
        MarketGardening => "MARKET_GARDENING",
        FishFarming => "FISH_FARMING",
        Poultry => "POULTRY",
        Arboriculture => "ARBORICULTURE",
        Livestock => "LIVESTOCK",
        Beekeeping => "BEEKEEPING",
    }
);

string_enum!(
    /// Parcel lifecycle status
    ParcelStatus, "status" {
        Available => "AVAILABLE",
        Leased => "LEASED",
        PartiallyLeased => "PARTIALLY_LEASED",
        InProduction => "IN_PRODUCTION",
        Harvesting => "HARVESTING",
        Maintenance => "MAINTENANCE",
        Inactive => "INACTIVE",
    }
);

string_enum!(
    LeaseStatus, "status" {
        Active => "ACTIVE",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
);

string_enum!(
    /// Kind of action recorded in a parcel's audit trail
    AuditAction, "action" {
        Creation => "CREATION",
        Modification => "MODIFICATION",
        Lease => "LEASE",
        LeaseClosure => "LEASE_CLOSURE",
    }
);

string_enum!(
    Role, "role" {
        Admin => "ADMIN",
        Investor => "INVESTOR",
        Farmer => "FARMER",
    }
);

impl ParcelStatus {
    /// Statuses a parcel moves through while a lease is running
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            ParcelStatus::InProduction | ParcelStatus::Harvesting | ParcelStatus::Maintenance
        )
    }

    /// Whether an administrative update may move a parcel from `self` to `next`.
    ///
    /// `AVAILABLE` targets are additionally gated on the absence of an active
    /// lease, which the registry checks against the store.
    pub fn can_transition_to(&self, next: ParcelStatus) -> bool {
        use ParcelStatus::*;

        if *self == next {
            return true;
        }
        match (*self, next) {
            (Inactive, _) => false,
            (_, Inactive) => true,
            (_, Leased) | (_, PartiallyLeased) => false,
            (_, Available) => true,
            (Available, Maintenance) => true,
            (Available, _) => false,
            (Leased | PartiallyLeased | InProduction | Harvesting | Maintenance, target) => {
                target.is_operational()
            }
        }
    }
}

impl LeaseStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, LeaseStatus::Active)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Public projection of a directory user. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl UserSummary {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Directory user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: None,
        }
    }
}

/// The leasable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parcel {
    pub id: String,
    pub code: String,
    pub region: String,
    pub locality: String,
    pub latitude: f64,
    pub longitude: f64,
    pub pack_type: PackType,
    pub activity_type: ActivityType,
    pub sub_plot_count: u32,
    /// Square metres
    pub surface_area: u32,
    pub monthly_unit_price: i64,
    pub total_monthly_price: i64,
    /// Expected yield, percent
    pub estimated_yield: f64,
    pub status: ParcelStatus,
    pub current_crop: Option<String>,
    pub soil_quality: Option<String>,
    pub water_access: bool,
    pub exposure: Option<String>,
    pub organic_certified: bool,
    pub co2_absorbed: Option<f64>,
    pub water_saved: Option<f64>,
    pub biodiversity_score: Option<u8>,
    pub images: Vec<String>,
    pub main_image: Option<String>,
    pub farmer_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Time-boxed rental of a parcel by an investor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub id: String,
    pub parcel_id: String,
    pub investor_id: String,
    pub pack_type: PackType,
    pub activity_type: ActivityType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_months: u32,
    pub monthly_amount: i64,
    pub total_amount: i64,
    pub estimated_yield: f64,
    pub status: LeaseStatus,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of an action against a parcel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub parcel_id: String,
    pub action: AuditAction,
    pub description: String,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Operational task scheduled on a parcel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelTask {
    pub id: String,
    pub parcel_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: String,
    pub assignee: Option<UserSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip_through_str() {
        for status in ParcelStatus::ALL {
            assert_eq!(status.as_str().parse::<ParcelStatus>().unwrap(), *status);
        }
        assert_eq!("QUAD".parse::<PackType>().unwrap(), PackType::Quad);
    }

    #[test]
    fn test_synonyms_are_rejected() {
        assert!("PACK_4".parse::<PackType>().is_err());
        assert!("INVESTISSEUR".parse::<Role>().is_err());
        assert!("DISPONIBLE".parse::<ParcelStatus>().is_err());

        let err = "MARAICHAGE".parse::<ActivityType>().unwrap_err();
        match err {
            EngineError::Validation { field, .. } => assert_eq!(field, "activityType"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_serde_uses_canonical_spelling() {
        let json = serde_json::to_string(&ActivityType::FishFarming).unwrap();
        assert_eq!(json, "\"FISH_FARMING\"");
        let parsed: ParcelStatus = serde_json::from_str("\"IN_PRODUCTION\"").unwrap();
        assert_eq!(parsed, ParcelStatus::InProduction);
    }

    #[test]
    fn test_status_transitions() {
        use ParcelStatus::*;

        assert!(Available.can_transition_to(Maintenance));
        assert!(Available.can_transition_to(Inactive));
        assert!(!Available.can_transition_to(Leased));
        assert!(!Available.can_transition_to(InProduction));

        assert!(Leased.can_transition_to(InProduction));
        assert!(InProduction.can_transition_to(Harvesting));
        assert!(Harvesting.can_transition_to(Available));
        assert!(!Maintenance.can_transition_to(PartiallyLeased));

        assert!(!Inactive.can_transition_to(Available));
        assert!(Inactive.can_transition_to(Inactive));
    }
}
