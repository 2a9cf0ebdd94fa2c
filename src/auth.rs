//! Caller identity
//!
//! Every engine operation receives an explicit [`Identity`]. At the HTTP
//! boundary it comes from an HS256 JWT carried either as
//! `Authorization: Bearer <token>` or in the `auth-token` cookie. Issuing
//! tokens is the identity provider's job, not ours.

use hyper::header::{AUTHORIZATION, COOKIE};
use hyper::HeaderMap;
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::model::Role;

/// Name of the session cookie that may carry the token
pub const AUTH_COOKIE: &str = "auth-token";

/// Secret used when running with `--dev`
pub const DEV_SECRET: &str = "dev-mode-secret-not-for-production-use-123456";

const MIN_SECRET_LEN: usize = 32;

/// Verified caller, passed explicitly into every service call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden("administrator role required".into()))
        }
    }

    /// Forbidden unless the caller holds one of `roles`
    pub fn require_role(&self, roles: &[Role]) -> Result<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "role {} may not perform this action",
                self.role
            )))
        }
    }
}

/// Token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT verifier
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
}

impl JwtValidator {
    /// Returns a Config error if the secret is empty or shorter than 32 characters
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(EngineError::Config(
                "jwtSecret is required outside dev mode".into(),
            ));
        }
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(EngineError::Config(format!(
                "jwtSecret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self { secret })
    }

    /// Validator using the fixed development secret
    pub fn new_dev() -> Self {
        Self {
            secret: DEV_SECRET.into(),
        }
    }

    /// Verify a token and turn its claims into an identity
    pub fn verify(&self, token: &str) -> Result<Identity> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| {
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidSignature => "invalid signature",
                ErrorKind::Json(_) => "malformed claims",
                _ => "invalid token",
            };
            debug!(reason, "Rejected token");
            EngineError::Unauthorized(reason.into())
        })?;

        Ok(Identity::new(claims.user_id, claims.role))
    }

    /// Resolve the caller from request headers.
    ///
    /// `Ok(None)` when no token is present at all; Unauthorized when one is
    /// present but does not verify.
    pub fn identify(&self, headers: &HeaderMap) -> Result<Option<Identity>> {
        match token_from_headers(headers) {
            Some(token) => self.verify(&token).map(Some),
            None => Ok(None),
        }
    }
}

/// Extract a token from `Authorization: Bearer`, falling back to the session cookie
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer);
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookies| extract_cookie(cookies, AUTH_COOKIE))
        .map(str::to_string)
}

fn extract_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

fn extract_cookie<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
