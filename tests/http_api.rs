//! HTTP routes driven in-process through `HttpServer::handle_request`

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use hyper::{Method, Request, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use parcel_lease::auth::{Claims, AUTH_COOKIE, DEV_SECRET};
use parcel_lease::model::Role;
use parcel_lease::{HttpServer, JwtValidator, ParcelDb, Services};
use serde_json::{json, Value};
use std::sync::Arc;

fn server() -> HttpServer {
    let services = Arc::new(Services::new(Arc::new(ParcelDb::open_in_memory().unwrap()), 20));
    HttpServer::new(services, JwtValidator::new_dev(), "127.0.0.1:0".parse().unwrap())
}

fn token(user_id: &str, role: Role) -> String {
    let now = Utc::now().timestamp() as u64;
    let claims = Claims {
        user_id: user_id.to_string(),
        role,
        email: None,
        iat: now,
        exp: now + 3600,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(DEV_SECRET.as_bytes())).unwrap()
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Bytes::from(value.to_string())
        }
        None => Bytes::new(),
    };
    builder.body(Full::new(body)).unwrap()
}

async fn send(server: &HttpServer, req: Request<Full<Bytes>>) -> (StatusCode, Value) {
    let response = server.handle_request(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn parcel_body(region: &str) -> Value {
    json!({
        "region": region,
        "locality": "Keur Massar",
        "latitude": 14.78,
        "longitude": -17.31,
        "packType": "QUAD",
        "activityType": "MARKET_GARDENING",
        "monthlyUnitPrice": 5000,
        "estimatedYield": 15.0,
        "waterAccess": true
    })
}

async fn provision(server: &HttpServer, admin: &str, email: &str, role: &str) -> String {
    let body = json!({
        "email": email,
        "firstName": "Amadou",
        "lastName": "Diop",
        "role": role
    });
    let (status, user) = send(server, request(Method::POST, "/users", Some(admin), Some(body))).await;
    assert_eq!(status, StatusCode::CREATED);
    user["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let server = server();

    let (status, body) = send(&server, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["parcels"], 0);

    let (status, body) = send(&server, request(Method::GET, "/nowhere", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");

    let (status, _) = send(&server, request(Method::PATCH, "/parcels", None, None)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_parcel_routes_enforce_identity_and_role() {
    let server = server();
    let admin = token("admin-1", Role::Admin);
    let investor = token("inv-1", Role::Investor);

    let (status, _) = send(&server, request(Method::POST, "/parcels", None, Some(parcel_body("Dakar")))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &server,
        request(Method::POST, "/parcels", Some("not-a-token"), Some(parcel_body("Dakar"))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &server,
        request(Method::POST, "/parcels", Some(&investor), Some(parcel_body("Dakar"))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, parcel) = send(
        &server,
        request(Method::POST, "/parcels", Some(&admin), Some(parcel_body("Dakar"))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(parcel["totalMonthlyPrice"], 20000);
    assert_eq!(parcel["surfaceArea"], 36);
    assert_eq!(parcel["status"], "AVAILABLE");
    assert!(parcel["code"].as_str().unwrap().starts_with("PAR-DAK-"));

    let (status, list) = send(&server, request(Method::GET, "/parcels?availableOnly=true", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);

    let id = parcel["id"].as_str().unwrap();
    let (status, _) = send(&server, request(Method::GET, &format!("/parcels/{id}"), None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, detail) = send(
        &server,
        request(Method::GET, &format!("/parcels/{id}"), Some(&investor), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["history"][0]["action"], "CREATION");

    let (status, _) = send(&server, request(Method::GET, "/parcels/stats", Some(&investor), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, stats) = send(&server, request(Method::GET, "/parcels/stats", Some(&admin), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["byStatus"]["AVAILABLE"], 1);
}

#[tokio::test]
async fn test_validation_errors_name_the_field() {
    let server = server();
    let admin = token("admin-1", Role::Admin);

    let mut body = parcel_body("Dakar");
    body["latitude"] = json!(120.0);
    let (status, error) = send(&server, request(Method::POST, "/parcels", Some(&admin), Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["field"], "latitude");

    let mut body = parcel_body("Dakar");
    body["packType"] = json!("PACK_4");
    let (status, error) = send(&server, request(Method::POST, "/parcels", Some(&admin), Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["field"], "packType");

    let (status, error) = send(&server, request(Method::POST, "/parcels", Some(&admin), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["field"], "body");

    let (status, error) = send(&server, request(Method::GET, "/parcels?status=SOLD", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["field"], "status");

    let (status, error) = send(&server, request(Method::GET, "/users?role=AGRICULTEUR", Some(&admin), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["field"], "role");
}

#[tokio::test]
async fn test_lease_flow_over_http() {
    let server = server();
    let admin = token("admin-1", Role::Admin);
    let investor_id = provision(&server, &admin, "amadou@example.com", "INVESTOR").await;
    let investor = token(&investor_id, Role::Investor);

    let (_, parcel) = send(
        &server,
        request(Method::POST, "/parcels", Some(&admin), Some(parcel_body("Thiès"))),
    )
    .await;
    let parcel_id = parcel["id"].as_str().unwrap().to_string();

    let lease_body = json!({
        "parcelId": parcel_id,
        "packType": "QUAD",
        "activityType": "FISH_FARMING",
        "startDate": "2024-01-15",
        "durationMonths": 6
    });
    let (status, lease) = send(
        &server,
        request(Method::POST, "/leases", Some(&investor), Some(lease_body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(lease["endDate"], "2024-07-15");
    assert_eq!(lease["totalAmount"], 120000);
    assert_eq!(lease["status"], "ACTIVE");
    assert_eq!(lease["parcel"]["status"], "LEASED");

    let (status, _) = send(&server, request(Method::POST, "/leases", Some(&investor), Some(lease_body))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Session cookie works like a bearer token
    let cookie_req = Request::builder()
        .method(Method::GET)
        .uri("/leases/mine")
        .header(COOKIE, format!("{}={}", AUTH_COOKIE, investor))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, mine) = send(&server, cookie_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, expired) = send(
        &server,
        request(Method::GET, "/leases/expired?asOf=2024-08-01", Some(&admin), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(expired.as_array().unwrap().len(), 1);

    let lease_id = lease["id"].as_str().unwrap();
    let (status, _) = send(
        &server,
        request(Method::POST, &format!("/leases/{lease_id}/complete"), Some(&investor), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, closed) = send(
        &server,
        request(Method::POST, &format!("/leases/{lease_id}/complete"), Some(&admin), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "COMPLETED");
    assert_eq!(closed["parcel"]["status"], "AVAILABLE");

    let (status, history) = send(
        &server,
        request(Method::GET, &format!("/parcels/{parcel_id}/history?limit=1"), Some(&admin), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["action"], "LEASE_CLOSURE");

    let (status, _) = send(
        &server,
        request(Method::DELETE, &format!("/parcels/{parcel_id}"), Some(&admin), None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_user_directory_routes() {
    let server = server();
    let admin = token("admin-1", Role::Admin);
    let farmer_id = provision(&server, &admin, "awa@example.com", "FARMER").await;
    provision(&server, &admin, "moussa@example.com", "INVESTOR").await;

    let body = json!({
        "email": "AWA@example.com",
        "firstName": "Awa",
        "lastName": "Ndiaye",
        "role": "FARMER"
    });
    let (status, _) = send(&server, request(Method::POST, "/users", Some(&admin), Some(body))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, page) = send(
        &server,
        request(Method::GET, "/users?role=FARMER&page=1&limit=5", Some(&admin), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["pagination"]["totalPages"], 1);
    assert_eq!(page["users"][0]["id"], farmer_id.as_str());

    let farmer = token(&farmer_id, Role::Farmer);
    let (status, me) = send(&server, request(Method::GET, &format!("/users/{farmer_id}"), Some(&farmer), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "awa@example.com");

    let (status, _) = send(&server, request(Method::GET, "/users", Some(&farmer), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
