//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::{EngineError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| EngineError::Store(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| EngineError::Store(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| EngineError::Store(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(DIRECTORY_SCHEMA)
        .map_err(|e| EngineError::Store(format!("Failed to create directory tables: {}", e)))?;

    conn.execute_batch(PARCELS_SCHEMA)
        .map_err(|e| EngineError::Store(format!("Failed to create parcel tables: {}", e)))?;

    conn.execute_batch(LEASES_SCHEMA)
        .map_err(|e| EngineError::Store(format!("Failed to create lease tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| EngineError::Store(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

const DIRECTORY_SCHEMA: &str = r#"
-- Users as seen by the engine; credentials live with the identity provider
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    phone TEXT,
    role TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    -- Lowercased "email first last" for directory search
    search_key TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
"#;

const PARCELS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS parcels (
    id TEXT PRIMARY KEY NOT NULL,
    code TEXT NOT NULL UNIQUE,

    -- Geography; region_key is the Unicode-lowercased region for substring search
    region TEXT NOT NULL,
    region_key TEXT NOT NULL,
    locality TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,

    pack_type TEXT NOT NULL,
    activity_type TEXT NOT NULL,

    -- Derived from pack_type and monthly_unit_price
    sub_plot_count INTEGER NOT NULL,
    surface_area INTEGER NOT NULL,
    monthly_unit_price INTEGER NOT NULL,
    total_monthly_price INTEGER NOT NULL,

    estimated_yield REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'AVAILABLE',

    current_crop TEXT,
    soil_quality TEXT,
    water_access INTEGER NOT NULL DEFAULT 0,
    exposure TEXT,
    organic_certified INTEGER NOT NULL DEFAULT 0,
    co2_absorbed REAL,
    water_saved REAL,
    biodiversity_score INTEGER CHECK (biodiversity_score BETWEEN 0 AND 100),
    images_json TEXT NOT NULL DEFAULT '[]',
    main_image TEXT,

    farmer_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Last allocated sequence per code prefix (PAR-<REGION>-<YEAR>)
CREATE TABLE IF NOT EXISTS code_sequences (
    prefix TEXT PRIMARY KEY NOT NULL,
    last_value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS parcel_tasks (
    id TEXT PRIMARY KEY NOT NULL,
    parcel_id TEXT NOT NULL REFERENCES parcels(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT,
    status TEXT NOT NULL DEFAULT 'PLANNED',
    assignee_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL
);

-- Append-only. History outlives the parcel row, so parcel_id is not a foreign key.
CREATE TABLE IF NOT EXISTS audit_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parcel_id TEXT NOT NULL,
    action TEXT NOT NULL,
    description TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
BEFORE UPDATE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit entries are append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
BEFORE DELETE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit entries are append-only');
END;
"#;

const LEASES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leases (
    id TEXT PRIMARY KEY NOT NULL,
    parcel_id TEXT NOT NULL REFERENCES parcels(id) ON DELETE CASCADE,
    investor_id TEXT NOT NULL REFERENCES users(id),
    pack_type TEXT NOT NULL,
    activity_type TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    duration_months INTEGER NOT NULL,
    monthly_amount INTEGER NOT NULL,
    total_amount INTEGER NOT NULL,
    estimated_yield REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE',
    created_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_parcels_status ON parcels(status);
CREATE INDEX IF NOT EXISTS idx_parcels_region_key ON parcels(region_key);
CREATE INDEX IF NOT EXISTS idx_parcels_created ON parcels(created_at);
CREATE INDEX IF NOT EXISTS idx_leases_parcel ON leases(parcel_id);
CREATE INDEX IF NOT EXISTS idx_leases_investor ON leases(investor_id);
CREATE INDEX IF NOT EXISTS idx_audit_parcel ON audit_entries(parcel_id, id);
CREATE INDEX IF NOT EXISTS idx_tasks_parcel ON parcel_tasks(parcel_id);
CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);

-- At most one ACTIVE lease per parcel
CREATE UNIQUE INDEX IF NOT EXISTS idx_leases_one_active
    ON leases(parcel_id) WHERE status = 'ACTIVE';
"#;
