//! Error types for parcel-lease

use hyper::StatusCode;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand to a caller. Store and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::Timeout(_) => "Service temporarily unavailable, retry later".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the caller may retry after re-reading state
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            match failure.code {
                ErrorCode::ConstraintViolation => {
                    let detail = message.as_deref().unwrap_or_default();
                    if detail.contains("parcels.code") {
                        return Self::Conflict("parcel code already assigned".into());
                    }
                    if detail.contains("leases.parcel_id") {
                        return Self::Conflict("parcel already has an active lease".into());
                    }
                    if detail.contains("users.email") {
                        return Self::Conflict("email already registered".into());
                    }
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::Timeout(format!("store busy: {}", err));
                }
                _ => {}
            }
        }
        Self::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EngineError::validation("region", "required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(EngineError::NotFound("Parcel".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(EngineError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(EngineError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            EngineError::Store("disk I/O error".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_details_are_hidden() {
        let err = EngineError::Store("no such table: parcels".into());
        assert_eq!(err.public_message(), "Internal server error");

        let err = EngineError::Conflict("parcel is not available for leasing".into());
        assert!(err.public_message().contains("not available"));
    }

    #[test]
    fn test_unique_code_violation_is_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE parcels (code TEXT UNIQUE); INSERT INTO parcels VALUES ('PAR-DAK-2024-0001');")
            .unwrap();
        let err: EngineError = conn
            .execute("INSERT INTO parcels VALUES ('PAR-DAK-2024-0001')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}
