//! End-to-end tests of the leasing engine through its services
//!
//! Each test runs against a fresh in-memory store with a small directory of
//! users provisioned by an administrator.

use chrono::NaiveDate;
use parcel_lease::db::{NewTask, NewUser, ParcelQuery};
use parcel_lease::model::{ActivityType, AuditAction, LeaseStatus, PackType, ParcelStatus, Role};
use parcel_lease::services::{CreateLeaseInput, CreateParcelInput, UpdateParcelInput};
use parcel_lease::{EngineError, Identity, ParcelDb, Services};
use std::sync::Arc;

struct Harness {
    services: Services,
    admin: Identity,
    investor: Identity,
    other_investor: Identity,
    farmer_id: String,
}

fn provision(services: &Services, root: &Identity, email: &str, first: &str, last: &str, role: Role) -> Identity {
    let user = services
        .users
        .provision_user(
            NewUser {
                email: email.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                phone: Some("+221 77 555 00 11".to_string()),
                role,
            },
            root,
        )
        .unwrap();
    Identity::new(user.id, role)
}

fn harness() -> Harness {
    let services = Services::new(Arc::new(ParcelDb::open_in_memory().unwrap()), 20);
    let root = Identity::new("bootstrap", Role::Admin);

    let admin = provision(&services, &root, "admin@example.com", "Fatou", "Ba", Role::Admin);
    let investor = provision(&services, &root, "amadou@example.com", "Amadou", "Diop", Role::Investor);
    let other_investor = provision(&services, &root, "khady@example.com", "Khady", "Fall", Role::Investor);
    let farmer = provision(&services, &root, "awa@example.com", "Awa", "Ndiaye", Role::Farmer);

    Harness {
        services,
        admin,
        investor,
        other_investor,
        farmer_id: farmer.user_id,
    }
}

fn parcel_input(region: &str, pack: PackType, unit_price: i64) -> CreateParcelInput {
    CreateParcelInput {
        region: region.to_string(),
        locality: "Centre".to_string(),
        latitude: 14.69,
        longitude: -17.44,
        pack_type: pack,
        activity_type: ActivityType::MarketGardening,
        monthly_unit_price: unit_price,
        estimated_yield: 12.5,
        status: None,
        current_crop: None,
        soil_quality: None,
        water_access: true,
        exposure: None,
        organic_certified: false,
        co2_absorbed: None,
        water_saved: None,
        biodiversity_score: None,
        images: vec![],
        main_image: None,
        farmer_id: None,
    }
}

fn lease_input(parcel_id: &str, pack: PackType, start: NaiveDate, months: u32) -> CreateLeaseInput {
    CreateLeaseInput {
        parcel_id: parcel_id.to_string(),
        pack_type: pack,
        activity_type: ActivityType::FishFarming,
        start_date: start,
        duration_months: months,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_parcel_lifecycle_through_lease_and_release() {
    let h = harness();
    let s = &h.services;

    let mut input = parcel_input("Dakar", PackType::Quad, 5000);
    input.farmer_id = Some(h.farmer_id.clone());
    let created = s.parcels.create(input, &h.admin).unwrap();
    assert_eq!(created.parcel.sub_plot_count, 4);
    assert_eq!(created.parcel.surface_area, 36);
    assert_eq!(created.parcel.total_monthly_price, 20000);
    assert!(created.parcel.code.starts_with("PAR-DAK-"));
    assert!(created.parcel.code.ends_with("-0001"));
    assert_eq!(created.farmer.as_ref().map(|f| f.first_name.as_str()), Some("Awa"));

    let lease = s
        .leases
        .create_lease(lease_input(&created.parcel.id, PackType::Quad, date(2024, 1, 15), 6), &h.investor)
        .unwrap();
    assert_eq!(lease.lease.end_date, date(2024, 7, 15));
    assert_eq!(lease.lease.monthly_amount, 20000);
    assert_eq!(lease.lease.total_amount, 120000);
    assert_eq!(lease.lease.estimated_yield, 12.5);
    assert_eq!(lease.parcel.as_ref().map(|p| p.status), Some(ParcelStatus::Leased));

    let detail = s.parcels.get_by_id(&created.parcel.id, &h.investor).unwrap();
    assert_eq!(detail.parcel.status, ParcelStatus::Leased);
    assert_eq!(detail.leases.len(), 1);
    assert_eq!(
        detail.leases[0].investor.as_ref().map(|i| i.last_name.as_str()),
        Some("Diop")
    );
    assert!(detail.farmer.as_ref().and_then(|f| f.phone.as_ref()).is_some());

    let actions: Vec<AuditAction> = detail.history.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Lease, AuditAction::Creation]);
    assert_eq!(detail.history[0].description, "Parcel leased to Amadou Diop for 6 months");

    let closed = s.leases.complete_lease(&lease.lease.id, &h.admin).unwrap();
    assert_eq!(closed.lease.status, LeaseStatus::Completed);

    let after = s.parcels.get_by_id(&created.parcel.id, &h.admin).unwrap();
    assert_eq!(after.parcel.status, ParcelStatus::Available);
    assert_eq!(after.history[0].action, AuditAction::LeaseClosure);

    let again = s
        .leases
        .create_lease(lease_input(&created.parcel.id, PackType::Single, date(2024, 8, 1), 3), &h.other_investor)
        .unwrap();
    assert_eq!(again.lease.total_amount, 15000);
}

#[test]
fn test_second_lease_on_same_parcel_conflicts() {
    let h = harness();
    let s = &h.services;
    let parcel = s.parcels.create(parcel_input("Thiès", PackType::Nona, 4500), &h.admin).unwrap();

    s.leases
        .create_lease(lease_input(&parcel.parcel.id, PackType::Nona, date(2024, 3, 1), 12), &h.investor)
        .unwrap();
    let err = s
        .leases
        .create_lease(lease_input(&parcel.parcel.id, PackType::Single, date(2024, 3, 1), 12), &h.other_investor)
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    assert!(s.leases.list_mine(&h.other_investor).unwrap().is_empty());
    assert_eq!(s.db.stats().unwrap().active_leases, 1);
}

#[test]
fn test_lease_rejections_leave_no_trace() {
    let h = harness();
    let s = &h.services;
    let parcel = s.parcels.create(parcel_input("Kaolack", PackType::Quad, 3500), &h.admin).unwrap();
    let id = parcel.parcel.id.clone();

    let farmer = Identity::new(h.farmer_id.clone(), Role::Farmer);
    assert!(matches!(
        s.leases.create_lease(lease_input(&id, PackType::Quad, date(2024, 1, 1), 6), &farmer),
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        s.leases.create_lease(lease_input(&id, PackType::Quad, date(2024, 1, 1), 0), &h.investor),
        Err(EngineError::Validation { .. })
    ));
    assert!(matches!(
        s.leases.create_lease(lease_input(&id, PackType::Quad, date(2024, 1, 1), 121), &h.investor),
        Err(EngineError::Validation { .. })
    ));
    assert!(matches!(
        s.leases.create_lease(lease_input("missing", PackType::Quad, date(2024, 1, 1), 6), &h.investor),
        Err(EngineError::NotFound(_))
    ));
    let ghost = Identity::new("ghost", Role::Investor);
    assert!(matches!(
        s.leases.create_lease(lease_input(&id, PackType::Quad, date(2024, 1, 1), 6), &ghost),
        Err(EngineError::NotFound(_))
    ));

    let detail = s.parcels.get_by_id(&id, &h.admin).unwrap();
    assert_eq!(detail.parcel.status, ParcelStatus::Available);
    assert!(detail.leases.is_empty());
    assert_eq!(detail.history.len(), 1);
}

#[test]
fn test_end_of_month_clamps() {
    let h = harness();
    let s = &h.services;
    let parcel = s.parcels.create(parcel_input("Dakar", PackType::Single, 1000), &h.admin).unwrap();

    let lease = s
        .leases
        .create_lease(lease_input(&parcel.parcel.id, PackType::Single, date(2024, 1, 31), 1), &h.investor)
        .unwrap();
    assert_eq!(lease.lease.end_date, date(2024, 2, 29));
}

#[test]
fn test_codes_increment_per_region() {
    let h = harness();
    let s = &h.services;

    let first = s.parcels.create(parcel_input("Dakar", PackType::Single, 1000), &h.admin).unwrap();
    let second = s.parcels.create(parcel_input("dakar", PackType::Single, 1000), &h.admin).unwrap();
    let other = s.parcels.create(parcel_input("Ziguinchor", PackType::Single, 1000), &h.admin).unwrap();

    assert!(first.parcel.code.ends_with("-0001"));
    assert!(second.parcel.code.ends_with("-0002"));
    assert!(second.parcel.code.starts_with("PAR-DAK-"));
    assert!(other.parcel.code.starts_with("PAR-ZIG-"));
    assert!(other.parcel.code.ends_with("-0001"));
}

#[test]
fn test_update_rules() {
    let h = harness();
    let s = &h.services;
    let parcel = s.parcels.create(parcel_input("Dakar", PackType::Single, 1000), &h.admin).unwrap();
    let id = parcel.parcel.id.clone();

    let repriced = s
        .parcels
        .update(
            &id,
            UpdateParcelInput {
                pack_type: Some(PackType::Nona),
                monthly_unit_price: Some(2000),
                ..Default::default()
            },
            &h.admin,
        )
        .unwrap();
    assert_eq!(repriced.parcel.total_monthly_price, 18000);
    assert_eq!(repriced.parcel.surface_area, 81);

    let leased = UpdateParcelInput {
        status: Some(ParcelStatus::Leased),
        ..Default::default()
    };
    assert!(matches!(s.parcels.update(&id, leased, &h.admin), Err(EngineError::Conflict(_))));

    s.leases
        .create_lease(lease_input(&id, PackType::Nona, date(2024, 5, 1), 6), &h.investor)
        .unwrap();
    let production = UpdateParcelInput {
        status: Some(ParcelStatus::InProduction),
        ..Default::default()
    };
    let updated = s.parcels.update(&id, production, &h.admin).unwrap();
    assert_eq!(updated.parcel.status, ParcelStatus::InProduction);

    let back = UpdateParcelInput {
        status: Some(ParcelStatus::Available),
        ..Default::default()
    };
    assert!(matches!(s.parcels.update(&id, back, &h.admin), Err(EngineError::Conflict(_))));

    let history = s.parcels.history(&id, None, &h.admin).unwrap();
    assert_eq!(history[0].action, AuditAction::Modification);
    assert!(matches!(
        s.parcels.history(&id, None, &h.investor),
        Err(EngineError::Forbidden(_))
    ));
}

#[test]
fn test_delete_blocked_by_active_lease() {
    let h = harness();
    let s = &h.services;
    let parcel = s.parcels.create(parcel_input("Louga", PackType::Quad, 2000), &h.admin).unwrap();
    let id = parcel.parcel.id.clone();

    let lease = s
        .leases
        .create_lease(lease_input(&id, PackType::Quad, date(2024, 2, 1), 6), &h.investor)
        .unwrap();
    let active_before = s.db.stats().unwrap().active_leases;
    assert!(matches!(s.parcels.delete(&id, &h.admin), Err(EngineError::Conflict(_))));

    let detail = s.parcels.get_by_id(&id, &h.admin).unwrap();
    assert_eq!(detail.parcel.status, ParcelStatus::Leased);
    assert_eq!(detail.leases.len(), 1);
    assert_eq!(detail.leases[0].lease.status, LeaseStatus::Active);
    assert_eq!(s.db.stats().unwrap().active_leases, active_before);

    s.leases.cancel_lease(&lease.lease.id, &h.admin).unwrap();
    assert!(matches!(
        s.leases.cancel_lease(&lease.lease.id, &h.admin),
        Err(EngineError::Conflict(_))
    ));

    s.parcels.delete(&id, &h.admin).unwrap();
    assert!(matches!(s.parcels.get_by_id(&id, &h.admin), Err(EngineError::NotFound(_))));
}

#[test]
fn test_expired_leases_are_listed_not_released() {
    let h = harness();
    let s = &h.services;
    let parcel = s.parcels.create(parcel_input("Fatick", PackType::Single, 1500), &h.admin).unwrap();
    s.leases
        .create_lease(lease_input(&parcel.parcel.id, PackType::Single, date(2023, 1, 1), 3), &h.investor)
        .unwrap();

    let expired = s.leases.list_expired(Some(date(2023, 4, 1)), &h.admin).unwrap();
    assert_eq!(expired.len(), 1);
    assert!(s.leases.list_expired(Some(date(2023, 3, 31)), &h.admin).unwrap().is_empty());

    let detail = s.parcels.get_by_id(&parcel.parcel.id, &h.admin).unwrap();
    assert_eq!(detail.parcel.status, ParcelStatus::Leased);
}

#[test]
fn test_listing_filters_and_stats() {
    let h = harness();
    let s = &h.services;
    let dakar = s.parcels.create(parcel_input("Dakar", PackType::Single, 1000), &h.admin).unwrap();
    s.parcels.create(parcel_input("Thiès", PackType::Quad, 1000), &h.admin).unwrap();
    s.parcels.create(parcel_input("Dakar", PackType::Nona, 1000), &h.admin).unwrap();

    s.leases
        .create_lease(lease_input(&dakar.parcel.id, PackType::Single, date(2024, 1, 1), 6), &h.investor)
        .unwrap();

    let available = s.parcels.list(&ParcelQuery::available()).unwrap();
    assert_eq!(available.total, 2);

    let by_region = s
        .parcels
        .list(&ParcelQuery {
            region: Some("DAK".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_region.total, 2);
    let leased = by_region
        .parcels
        .iter()
        .find(|p| p.parcel.id == dakar.parcel.id)
        .unwrap();
    let active = leased.active_lease.as_ref().unwrap();
    assert_eq!(active.lease.parcel_id, dakar.parcel.id);
    let investor = active.investor.as_ref().unwrap();
    assert_eq!(investor.last_name, "Diop");
    assert!(investor.phone.is_none());

    let stats = s.stats.stats(&h.admin).unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_status["LEASED"], 1);
    assert_eq!(stats.by_region["Dakar"], 2);
    assert!((stats.occupancy_rate - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_tasks_and_farmer_assignment() {
    let h = harness();
    let s = &h.services;
    let parcel = s.parcels.create(parcel_input("Matam", PackType::Quad, 2500), &h.admin).unwrap();
    let id = parcel.parcel.id.clone();

    let mut bad = parcel_input("Matam", PackType::Quad, 2500);
    bad.farmer_id = Some(h.investor.user_id.clone());
    assert!(matches!(
        s.parcels.create(bad, &h.admin),
        Err(EngineError::Validation { ref field, .. }) if field == "farmerId"
    ));

    s.parcels
        .record_task(
            &id,
            NewTask {
                title: "  Irrigation check ".to_string(),
                description: None,
                start_date: date(2024, 4, 1),
                end_date: Some(date(2024, 4, 2)),
                status: None,
                assignee_id: Some(h.farmer_id.clone()),
            },
            &h.admin,
        )
        .unwrap();

    let detail = s.parcels.get_by_id(&id, &h.admin).unwrap();
    assert_eq!(detail.tasks.len(), 1);
    assert_eq!(detail.tasks[0].title, "Irrigation check");
    assert_eq!(detail.tasks[0].status, "PLANNED");
    assert!(detail.tasks[0].assignee.is_some());

    let assign = UpdateParcelInput {
        farmer_id: Some(Some(h.farmer_id.clone())),
        ..Default::default()
    };
    let assigned = s.parcels.update(&id, assign, &h.admin).unwrap();
    assert!(assigned.farmer.is_some());

    let unassign = UpdateParcelInput {
        farmer_id: Some(None),
        ..Default::default()
    };
    let unassigned = s.parcels.update(&id, unassign, &h.admin).unwrap();
    assert!(unassigned.farmer.is_none());
}
