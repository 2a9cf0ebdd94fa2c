//! Parcel Lease - farmland parcel leasing engine
//!
//! Investors lease farmland parcels in packs of sub-plots; farmers work them.
//! The engine prices packs, keeps the parcel registry, issues leases and
//! records an append-only audit trail per parcel.
//!
//! ## Architecture
//!
//! - **db**: SQLite repositories (one mutex-guarded connection per handle)
//! - **services**: business rules, role checks and transaction boundaries
//! - **http**: hyper server establishing caller identity from a JWT
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/parcel-lease/
//! ├── parcels.db      # SQLite store (WAL mode)
//! └── config.toml     # Configuration
//! ```
//!
//! ## Invariants
//!
//! - A parcel has at most one ACTIVE lease (conditional status flip plus a
//!   partial unique index).
//! - Parcel codes `PAR-{REGION}-{YEAR}-{SEQ}` are unique and allocated inside
//!   the creating transaction.
//! - Audit entries are never updated or deleted.

pub mod auth;
pub mod code;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod model;
pub mod pricing;
pub mod seed;
pub mod services;

// Re-exports
pub use auth::{Identity, JwtValidator};
pub use config::Config;
pub use db::ParcelDb;
pub use error::EngineError;
pub use http::HttpServer;
pub use services::Services;
