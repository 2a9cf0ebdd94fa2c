//! HTTP response building helpers
//!
//! Every handler answers through these so that error bodies share one shape:
//! `{"error": "..."}`, plus `"field"` for validation failures.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{EngineError, Result};

pub type HttpResponse = Response<Full<Bytes>>;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

pub fn ok<T: Serialize>(body: &T) -> HttpResponse {
    json_response(StatusCode::OK, body)
}

pub fn created<T: Serialize>(body: &T) -> HttpResponse {
    json_response(StatusCode::CREATED, body)
}

pub fn no_content() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

pub fn not_found(message: &str) -> HttpResponse {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": message }),
    )
}

pub fn method_not_allowed() -> HttpResponse {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed" }),
    )
}

/// Convert an engine error to a response. Server-side failures are logged in
/// full and answered with a generic message.
pub fn error_response(err: EngineError) -> HttpResponse {
    let status = err.status_code();

    if status.is_server_error() {
        if err.is_transient() {
            warn!(error = %err, "Request failed transiently");
        } else {
            error!(error = %err, "Request failed");
        }
    }

    let body = match &err {
        EngineError::Validation { field, .. } => serde_json::json!({
            "error": err.public_message(),
            "field": field,
        }),
        _ => serde_json::json!({ "error": err.public_message() }),
    };

    json_response(status, &body)
}

/// Wrap a delete result into a 204 response
pub fn from_delete_result(result: Result<()>) -> HttpResponse {
    match result {
        Ok(()) => no_content(),
        Err(e) => error_response(e),
    }
}
