//! Configuration for parcel-lease

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::JwtValidator;
use crate::error::{EngineError, Result};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parcel-lease")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding parcels.db and config.toml
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// HS256 secret shared with the identity provider (at least 32 characters)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Accept tokens signed with the fixed development secret
    #[serde(default)]
    pub dev_mode: bool,

    /// Upper bound on a single request's store work
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a writer waits for another connection's lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Audit entries shown on the parcel detail view
    #[serde(default = "default_audit_history_limit")]
    pub audit_history_limit: u32,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8095
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_audit_history_limit() -> u32 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            jwt_secret: None,
            dev_mode: false,
            request_timeout_ms: default_request_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            audit_history_limit: default_audit_history_limit(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Build the token validator, refusing to start without a secret outside dev mode
    pub fn jwt_validator(&self) -> Result<JwtValidator> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => JwtValidator::new(secret.clone()),
            (None, true) => Ok(JwtValidator::new_dev()),
            (None, false) => Err(EngineError::Config(
                "jwtSecret is required unless dev mode is enabled".into(),
            )),
        }
    }

    /// Sanity checks run once at startup
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(EngineError::Config("request_timeout_ms must be positive".into()));
        }
        if self.audit_history_limit == 0 {
            return Err(EngineError::Config("audit_history_limit must be positive".into()));
        }
        self.jwt_validator().map(|_| ())
    }
}
