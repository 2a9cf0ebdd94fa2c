//! Demo data for a fresh store
//!
//! Seeds the three demo directory users (reusing any already present) and a
//! handful of parcels. Parcels go through [`ParcelRegistry::create`] so they
//! get real codes and audit entries.
//!
//! [`ParcelRegistry::create`]: crate::services::ParcelRegistry::create

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::users;
use crate::error::Result;
use crate::model::{ActivityType, PackType, Role, User};
use crate::services::{CreateParcelInput, Services};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub users: u32,
    pub parcels: u32,
    /// True when the store already held data and nothing was written
    pub skipped: bool,
}

struct DemoParcel {
    region: &'static str,
    locality: &'static str,
    latitude: f64,
    longitude: f64,
    pack: PackType,
    activity: ActivityType,
    unit_price: i64,
    estimated_yield: f64,
}

const DEMO_PARCELS: &[DemoParcel] = &[
    DemoParcel {
        region: "Dakar",
        locality: "Keur Massar",
        latitude: 14.7833,
        longitude: -17.3108,
        pack: PackType::Quad,
        activity: ActivityType::MarketGardening,
        unit_price: 5000,
        estimated_yield: 15.0,
    },
    DemoParcel {
        region: "Thiès",
        locality: "Pout",
        latitude: 14.7706,
        longitude: -17.0603,
        pack: PackType::Nona,
        activity: ActivityType::Arboriculture,
        unit_price: 4500,
        estimated_yield: 12.0,
    },
    DemoParcel {
        region: "Saint-Louis",
        locality: "Ross Béthio",
        latitude: 16.2667,
        longitude: -16.1333,
        pack: PackType::Single,
        activity: ActivityType::FishFarming,
        unit_price: 7000,
        estimated_yield: 18.0,
    },
    DemoParcel {
        region: "Kaolack",
        locality: "Kahone",
        latitude: 14.1475,
        longitude: -16.0325,
        pack: PackType::Quad,
        activity: ActivityType::Poultry,
        unit_price: 3500,
        estimated_yield: 10.0,
    },
];

fn demo_user(email: &str, first: &str, last: &str, phone: Option<&str>, role: Role) -> User {
    User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        phone: phone.map(str::to_string),
        role,
        is_active: true,
        created_at: Utc::now(),
    }
}

/// Look up a demo user by email, inserting it when the directory lacks it
fn ensure_user(services: &Services, user: User) -> Result<(User, bool)> {
    services.db.with_write_tx(|tx| match users::find_by_email(tx, &user.email)? {
        Some(existing) => Ok((existing, false)),
        None => {
            users::insert_user(tx, &user)?;
            Ok((user, true))
        }
    })
}

/// Seed demo users and parcels when the parcel table is empty
pub fn seed_demo(services: &Services) -> Result<SeedReport> {
    let stats = services.db.stats()?;
    if stats.parcels > 0 {
        info!(parcels = stats.parcels, "Parcels already present, skipping seed");
        return Ok(SeedReport {
            skipped: true,
            ..Default::default()
        });
    }

    let mut report = SeedReport::default();
    let mut seeded = vec![];
    for user in [
        demo_user("admin@parcel-lease.local", "Fatou", "Ba", None, Role::Admin),
        demo_user("investor@parcel-lease.local", "Amadou", "Diop", None, Role::Investor),
        demo_user(
            "farmer@parcel-lease.local",
            "Awa",
            "Ndiaye",
            Some("+221 77 123 45 67"),
            Role::Farmer,
        ),
    ] {
        let (user, inserted) = ensure_user(services, user)?;
        if inserted {
            report.users += 1;
        }
        seeded.push(user);
    }
    let (admin, farmer) = (&seeded[0], &seeded[2]);

    let actor = Identity::new(admin.id.clone(), admin.role);
    let farmer_id = (farmer.role == Role::Farmer).then(|| farmer.id.clone());
    for demo in DEMO_PARCELS {
        let input = CreateParcelInput {
            region: demo.region.to_string(),
            locality: demo.locality.to_string(),
            latitude: demo.latitude,
            longitude: demo.longitude,
            pack_type: demo.pack,
            activity_type: demo.activity,
            monthly_unit_price: demo.unit_price,
            estimated_yield: demo.estimated_yield,
            status: None,
            current_crop: None,
            soil_quality: Some("sandy loam".to_string()),
            water_access: true,
            exposure: Some("full sun".to_string()),
            organic_certified: false,
            co2_absorbed: None,
            water_saved: None,
            biodiversity_score: Some(60),
            images: vec![],
            main_image: None,
            farmer_id: farmer_id.clone(),
        };
        services.parcels.create(input, &actor)?;
        report.parcels += 1;
    }

    info!(users = report.users, parcels = report.parcels, admin = %admin.id, "Seeded demo data");
    Ok(report)
}
