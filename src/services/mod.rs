//! Service layer for parcel-lease
//!
//! Services hold the business rules between HTTP handlers and repositories:
//! role checks, validation, transaction boundaries and event emission.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (business logic)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod lease_service;
pub mod parcel_service;
pub mod response;
pub mod stats_service;
pub mod user_service;

pub use events::{EventBus, EventListener, ParcelEvent};
pub use lease_service::{CreateLeaseInput, LeaseEngine, LeaseView};
pub use parcel_service::{CreateParcelInput, ParcelDetail, ParcelRegistry, ParcelView, UpdateParcelInput};
pub use stats_service::{ParcelStats, StatsService};
pub use user_service::{UserDirectory, UserPage};

use crate::db::ParcelDb;
use std::sync::Arc;

/// Service container handed to the HTTP server
pub struct Services {
    pub parcels: Arc<ParcelRegistry>,
    pub leases: Arc<LeaseEngine>,
    pub stats: Arc<StatsService>,
    pub users: Arc<UserDirectory>,
    pub events: Arc<EventBus>,
    pub db: Arc<ParcelDb>,
}

impl Services {
    /// Create all services over one shared database
    pub fn new(db: Arc<ParcelDb>, audit_limit: u32) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            parcels: Arc::new(
                ParcelRegistry::new(db.clone(), events.clone()).with_audit_limit(audit_limit),
            ),
            leases: Arc::new(LeaseEngine::new(db.clone(), events.clone())),
            stats: Arc::new(StatsService::new(db.clone())),
            users: Arc::new(UserDirectory::new(db.clone(), events.clone())),
            events,
            db,
        }
    }
}
