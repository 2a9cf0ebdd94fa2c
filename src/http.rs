//! HTTP API for the leasing engine
//!
//! ## Endpoints
//!
//! | Route | Access |
//! |-------|--------|
//! | `GET /health` | public |
//! | `GET /parcels` | public |
//! | `POST /parcels` | admin |
//! | `GET /parcels/stats` | admin |
//! | `GET /parcels/{id}` | authenticated |
//! | `PUT /parcels/{id}`, `DELETE /parcels/{id}` | admin |
//! | `GET /parcels/{id}/history` | admin |
//! | `POST /parcels/{id}/tasks` | admin |
//! | `POST /leases` | investor or admin |
//! | `GET /leases/mine` | authenticated |
//! | `GET /leases/expired` | admin |
//! | `POST /leases/{id}/complete`, `POST /leases/{id}/cancel` | admin |
//! | `POST /users`, `GET /users` | admin |
//! | `GET /users/{id}` | self or admin |
//!
//! Role checks live in the services; this layer only establishes identity.
//! Service calls run on the blocking pool under the configured request timeout.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::auth::JwtValidator;
use crate::db::{NewTask, NewUser, ParcelQuery, UserQuery};
use crate::error::{EngineError, Result};
use crate::services::response::{self, HttpResponse};
use crate::services::{CreateLeaseInput, CreateParcelInput, Services, UpdateParcelInput};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpiredParams {
    #[serde(default)]
    as_of: Option<NaiveDate>,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    jwt: JwtValidator,
    bind_addr: SocketAddr,
    request_timeout: Duration,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, jwt: JwtValidator, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            jwt,
            bind_addr,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route a request and turn any engine error into its JSON response
    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
    ) -> std::result::Result<HttpResponse, Infallible>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!(method = %method, path = %path, "Incoming request");

        Ok(match self.route(req).await {
            Ok(response) => response,
            Err(err) => response::error_response(err),
        })
    }

    async fn route<B>(&self, req: Request<B>) -> Result<HttpResponse>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let actor = match self.jwt.identify(req.headers()) {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(EngineError::Unauthorized("authentication required".into())),
            Err(err) => Err(err),
        };

        match (method, segments.as_slice()) {
            (Method::GET, ["health"]) => self.handle_health().await,

            // Parcels
            (Method::GET, ["parcels"]) => {
                let filters: ParcelQuery = parse_query(&query)?;
                let list = self.blocking(move |s| s.parcels.list(&filters)).await?;
                Ok(response::ok(&list))
            }
            (Method::POST, ["parcels"]) => {
                let actor = actor?;
                let input: CreateParcelInput = read_json(req).await?;
                let view = self.blocking(move |s| s.parcels.create(input, &actor)).await?;
                Ok(response::created(&view))
            }
            (Method::GET, ["parcels", "stats"]) => {
                let actor = actor?;
                let stats = self.blocking(move |s| s.stats.stats(&actor)).await?;
                Ok(response::ok(&stats))
            }
            (Method::GET, ["parcels", id]) => {
                let (actor, id) = (actor?, id.to_string());
                let detail = self.blocking(move |s| s.parcels.get_by_id(&id, &actor)).await?;
                Ok(response::ok(&detail))
            }
            (Method::PUT, ["parcels", id]) => {
                let (actor, id) = (actor?, id.to_string());
                let patch: UpdateParcelInput = read_json(req).await?;
                let view = self
                    .blocking(move |s| s.parcels.update(&id, patch, &actor))
                    .await?;
                Ok(response::ok(&view))
            }
            (Method::DELETE, ["parcels", id]) => {
                let (actor, id) = (actor?, id.to_string());
                let result = self.blocking(move |s| s.parcels.delete(&id, &actor)).await;
                Ok(response::from_delete_result(result))
            }
            (Method::GET, ["parcels", id, "history"]) => {
                let (actor, id) = (actor?, id.to_string());
                let params: HistoryParams = parse_query(&query)?;
                let entries = self
                    .blocking(move |s| s.parcels.history(&id, params.limit, &actor))
                    .await?;
                Ok(response::ok(&entries))
            }
            (Method::POST, ["parcels", id, "tasks"]) => {
                let (actor, id) = (actor?, id.to_string());
                let input: NewTask = read_json(req).await?;
                let task = self
                    .blocking(move |s| s.parcels.record_task(&id, input, &actor))
                    .await?;
                Ok(response::created(&task))
            }

            // Leases
            (Method::POST, ["leases"]) => {
                let actor = actor?;
                let input: CreateLeaseInput = read_json(req).await?;
                let view = self.blocking(move |s| s.leases.create_lease(input, &actor)).await?;
                Ok(response::created(&view))
            }
            (Method::GET, ["leases", "mine"]) => {
                let actor = actor?;
                let leases = self.blocking(move |s| s.leases.list_mine(&actor)).await?;
                Ok(response::ok(&leases))
            }
            (Method::GET, ["leases", "expired"]) => {
                let actor = actor?;
                let params: ExpiredParams = parse_query(&query)?;
                let leases = self
                    .blocking(move |s| s.leases.list_expired(params.as_of, &actor))
                    .await?;
                Ok(response::ok(&leases))
            }
            (Method::POST, ["leases", id, "complete"]) => {
                let (actor, id) = (actor?, id.to_string());
                let view = self.blocking(move |s| s.leases.complete_lease(&id, &actor)).await?;
                Ok(response::ok(&view))
            }
            (Method::POST, ["leases", id, "cancel"]) => {
                let (actor, id) = (actor?, id.to_string());
                let view = self.blocking(move |s| s.leases.cancel_lease(&id, &actor)).await?;
                Ok(response::ok(&view))
            }

            // Users
            (Method::POST, ["users"]) => {
                let actor = actor?;
                let input: NewUser = read_json(req).await?;
                let user = self.blocking(move |s| s.users.provision_user(input, &actor)).await?;
                Ok(response::created(&user))
            }
            (Method::GET, ["users"]) => {
                let actor = actor?;
                let filters: UserQuery = parse_query(&query)?;
                let page = self.blocking(move |s| s.users.list_users(&filters, &actor)).await?;
                Ok(response::ok(&page))
            }
            (Method::GET, ["users", id]) => {
                let (actor, id) = (actor?, id.to_string());
                let user = self.blocking(move |s| s.users.get_user(&id, &actor)).await?;
                Ok(response::ok(&user))
            }

            _ if is_known_path(&segments) => Ok(response::method_not_allowed()),

            _ => Ok(response::not_found("Not found")),
        }
    }

    /// Health check endpoint
    async fn handle_health(&self) -> Result<HttpResponse> {
        let stats = self.blocking(|s| s.db.stats()).await?;
        Ok(response::ok(&serde_json::json!({
            "status": "ok",
            "parcels": stats.parcels,
            "leases": stats.leases,
            "schemaVersion": stats.schema_version,
        })))
    }

    /// Run a service call on the blocking pool, bounded by the request timeout.
    ///
    /// On timeout the worker keeps running; its transaction either commits
    /// whole or rolls back, so no partial write is left behind.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Services) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let services = self.services.clone();
        let task = tokio::task::spawn_blocking(move || f(&services));

        match tokio::time::timeout(self.request_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EngineError::Internal(format!(
                "service task failed: {}",
                join_err
            ))),
            Err(_) => Err(EngineError::Timeout(format!(
                "request exceeded {}ms",
                self.request_timeout.as_millis()
            ))),
        }
    }
}

fn is_known_path(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["parcels"]
            | ["parcels", _]
            | ["parcels", _, "history" | "tasks"]
            | ["leases"]
            | ["leases", _]
            | ["leases", _, "complete" | "cancel"]
            | ["users"]
            | ["users", _]
    )
}

/// Read and decode a JSON request body
async fn read_json<T, B>(req: Request<B>) -> Result<T>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body: Bytes = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| EngineError::validation("body", format!("unreadable request body: {}", e)))?
        .to_bytes();

    if body.is_empty() {
        return Err(EngineError::validation("body", "request body is required"));
    }
    decode_json(&body)
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let mut de = serde_json::Deserializer::from_slice(body);
    let value = serde_path_to_error::deserialize(&mut de)
        .map_err(|e| field_error(e.path(), e.inner().to_string(), "body"))?;
    de.end()
        .map_err(|e| EngineError::validation("body", e.to_string()))?;
    Ok(value)
}

fn parse_query<T: DeserializeOwned>(query: &str) -> Result<T> {
    let de = serde_urlencoded::Deserializer::new(form_urlencoded::parse(query.as_bytes()));
    serde_path_to_error::deserialize(de)
        .map_err(|e| field_error(e.path(), e.inner().to_string(), "query"))
}

/// Name the field a decode error points at: its path when inside a field,
/// the missing field for `missing field` errors, else `fallback`
fn field_error(path: &serde_path_to_error::Path, message: String, fallback: &str) -> EngineError {
    let field = if path.iter().next().is_some() {
        path.to_string()
    } else {
        message
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split('`').next())
            .unwrap_or(fallback)
            .to_string()
    };
    EngineError::validation(field, message)
}
