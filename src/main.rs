//! Parcel Lease Daemon
//!
//! Serves the leasing engine over HTTP on top of a local SQLite store.
//!
//! ## Usage
//!
//! ```bash
//! # Start with a token secret from the environment
//! JWT_SECRET=... parcel-lease
//!
//! # Start with custom config
//! parcel-lease --config /path/to/config.toml
//!
//! # Local development: fixed dev secret and demo data
//! parcel-lease --dev --seed --storage-dir ./data
//!
//! # Only seed the store, then exit
//! parcel-lease --dev --seed-only --storage-dir ./data
//! ```
//!
//! ## HTTP API
//!
//! See the route table in `parcel_lease::http`.

use anyhow::Context;
use clap::Parser;
use parcel_lease::services::events::spawn_logging_listener;
use parcel_lease::{seed, Config, HttpServer, ParcelDb, Services};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parcel-lease")]
#[command(about = "Farmland parcel leasing engine")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "PARCEL_LEASE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "PARCEL_LEASE_HTTP_PORT")]
    http_port: Option<u16>,

    /// HTTP bind address
    #[arg(long)]
    bind_address: Option<String>,

    /// HS256 secret for bearer tokens (not written to the config file)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Accept tokens signed with the development secret
    #[arg(long)]
    dev: bool,

    /// Insert demo users and parcels into an empty store
    #[arg(long)]
    seed: bool,

    /// Seed and exit without serving
    #[arg(long)]
    seed_only: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "PARCEL_LEASE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("parcel_lease=info".parse()?);
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load config: explicit path, then the storage directory, then defaults
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        let dir = args
            .storage_dir
            .clone()
            .unwrap_or_else(parcel_lease::config::default_storage_dir);
        let candidate = dir.join("config.toml");
        if candidate.exists() {
            Config::load(&candidate)
                .with_context(|| format!("loading config from {}", candidate.display()))?
        } else {
            Config::default()
        }
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(addr) = args.bind_address {
        config.bind_address = addr;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting parcel-lease"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    // Secrets and dev mode stay out of the saved file
    if args.jwt_secret.is_some() {
        config.jwt_secret = args.jwt_secret;
    }
    if args.dev {
        config.dev_mode = true;
    }
    config.validate().context("invalid configuration")?;
    if config.dev_mode && config.jwt_secret.is_none() {
        warn!("Dev mode: accepting tokens signed with the development secret");
    }
    let jwt = config.jwt_validator()?;

    let db = Arc::new(ParcelDb::open(&config.storage_dir, config.busy_timeout())?);
    let services = Arc::new(Services::new(db.clone(), config.audit_history_limit));
    let _listener = spawn_logging_listener(services.events.clone());

    if args.seed || args.seed_only {
        let report = seed::seed_demo(&services)?;
        info!(users = report.users, parcels = report.parcels, skipped = report.skipped, "Seed finished");
        if args.seed_only {
            return Ok(());
        }
    }

    let http_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address))?;
    let http_server = Arc::new(
        HttpServer::new(services, jwt, http_addr).with_request_timeout(config.request_timeout()),
    );
    info!("HTTP API available at http://{}", http_addr);

    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    if let Ok(stats) = db.stats() {
        info!(
            parcels = stats.parcels,
            leases = stats.leases,
            active_leases = stats.active_leases,
            "Final store stats"
        );
    }

    Ok(())
}
