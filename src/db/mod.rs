//! SQLite store for parcels, leases, audit entries and the user directory
//!
//! ## Tables
//!
//! - `users` - Directory of admins, investors and farmers (no credentials)
//! - `parcels` - Leasable parcels with derived financials
//! - `leases` - Leases against parcels, at most one ACTIVE per parcel
//! - `audit_entries` - Append-only parcel history
//! - `parcel_tasks` - Operational tasks scheduled on parcels
//! - `code_sequences` - Per region/year counters for parcel codes
//!
//! All writes that span several rows go through [`ParcelDb::with_write_tx`],
//! which takes SQLite's write lock up front (`BEGIN IMMEDIATE`).

pub mod audit;
pub mod leases;
pub mod parcels;
pub mod schema;
pub mod sequences;
pub mod tasks;
pub mod users;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// Default wait for another writer to release the database
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database for the leasing engine
pub struct ParcelDb {
    conn: Mutex<Connection>,
}

impl ParcelDb {
    /// Open or create `parcels.db` under the storage directory
    pub fn open(storage_dir: &Path, busy_timeout: Duration) -> Result<Self> {
        Self::open_path(&storage_dir.join("parcels.db"), busy_timeout)
    }

    /// Open or create a database file at an explicit path
    pub fn open_path(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Store(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| EngineError::Store(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn, busy_timeout)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Store(format!("Failed to open in-memory SQLite: {}", e)))?;

        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Run a read against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`; any error drops the transaction, which
    /// rolls every write back.
    pub fn with_write_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u32> {
                Ok(conn.query_row(sql, [], |row| row.get(0))?)
            };

            Ok(DbStats {
                parcels: count("SELECT COUNT(*) FROM parcels")?,
                leases: count("SELECT COUNT(*) FROM leases")?,
                active_leases: count("SELECT COUNT(*) FROM leases WHERE status = 'ACTIVE'")?,
                users: count("SELECT COUNT(*) FROM users")?,
                schema_version: schema::SCHEMA_VERSION,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub parcels: u32,
    pub leases: u32,
    pub active_leases: u32,
    pub users: u32,
    pub schema_version: i32,
}

pub use parcels::ParcelQuery;
pub use tasks::NewTask;
pub use users::{NewUser, UserQuery};
