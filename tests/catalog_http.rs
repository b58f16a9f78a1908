//! HTTP catalog client and HTTP rendering surface against local `axum`
//! servers.

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use field_report_sync::catalog::{Catalog, HttpCatalog};
use field_report_sync::config::ApiConfig;
use field_report_sync::error::{AuthError, CatalogError, RenderError};
use field_report_sync::render::{HttpSurface, PageFormat, RenderSurface};

const TOKEN: &str = "tok-123";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TOKEN))
}

async fn login(Json(body): Json<Value>) -> Json<Value> {
    if body["password"] == "secret" {
        Json(json!({
            "code": 200,
            "body": {
                "accessToken": TOKEN,
                "account": { "employee_branch_id": "4" }
            }
        }))
    } else {
        Json(json!({ "code": 401, "message": "invalid credentials" }))
    }
}

async fn clients(
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    assert_eq!(query.get("branch_id").map(String::as_str), Some("4"));
    (
        StatusCode::OK,
        Json(json!({
            "body": [],
            "data": [
                { "id": 1, "name": "Hotel Tugu" },
                { "name": "missing id" },
                { "id": "2" }
            ]
        })),
    )
}

async fn contracts(UrlPath(client_id): UrlPath<i64>) -> (StatusCode, Json<Value>) {
    match client_id {
        1 => (StatusCode::OK, Json(json!({ "body": [{ "id": 7 }, { "id": null }] }))),
        2 => (StatusCode::OK, Json(json!({ "body": { "unexpected": true } }))),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
    }
}

async fn reports(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["employee_ids"], json!([12, 31]));
    Json(json!({
        "body": [
            {
                "schedule_id": 11,
                "employee_name": "Budi",
                "date_work": "2024-03-10",
                "report_detail_chemicals": null
            },
            {
                "schedule_id": "12",
                "employee_name": 77,
                "date_work": "2024-03-11",
                "note_remark": 12
            },
            "not a report"
        ]
    }))
}

async fn contract_check(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["contract_id"], 7);
    Json(json!({
        "body": {
            "contract": {
                "branches": { "name": "Malang" },
                "clients": { "address": "Jl. Merdeka 1" }
            }
        }
    }))
}

async fn files(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["type"], "sts");
    Json(json!({ "body": [{ "filename": "https://cdn.test/a.png", "id": 3, "notes": "kitchen" }] }))
}

fn api() -> Router {
    Router::new()
        .route("/web/api/auth/login", post(login))
        .route("/web/api/client/no-paging", get(clients))
        .route("/web/api/contract/{client_id}/client", get(contracts))
        .route("/web/api/report/form-sts", post(reports))
        .route("/web/api/report/check-report-service", post(contract_check))
        .route("/web/api/schedule/file-uploaded", post(files))
}

fn api_config(base_url: String) -> ApiConfig {
    ApiConfig {
        base_url,
        username: "tech".to_string(),
        password: "secret".to_string(),
        timeout_secs: 5,
        download_timeout_secs: 5,
        user_agent: "frs-test".to_string(),
    }
}

async fn logged_in() -> HttpCatalog {
    let base = serve(api()).await;
    let mut catalog = HttpCatalog::new(&api_config(base)).unwrap();
    let session = catalog.login("tech", "secret").await.unwrap();
    assert_eq!(session.token, TOKEN);
    assert_eq!(session.branch_id, 4);
    assert!(catalog.is_logged_in());
    catalog
}

#[tokio::test]
async fn rejected_login_is_an_auth_error() {
    let base = serve(api()).await;
    let mut catalog = HttpCatalog::new(&api_config(base)).unwrap();
    let result = catalog.login("tech", "wrong").await;
    assert!(matches!(result, Err(AuthError::Rejected)));
    assert!(!catalog.is_logged_in());
}

#[tokio::test]
async fn clients_use_bearer_and_data_fallback() {
    let catalog = logged_in().await;
    let clients = catalog.list_clients(4).await.unwrap();
    assert_eq!(clients.len(), 2);
    assert_eq!(clients[0].display_name(), "Hotel Tugu");
    assert_eq!(clients[1].display_name(), "Client_2");
}

#[tokio::test]
async fn unauthenticated_call_is_a_status_error() {
    let base = serve(api()).await;
    let catalog = HttpCatalog::new(&api_config(base)).unwrap();
    let err = catalog.list_clients(4).await.unwrap_err();
    assert!(matches!(err, CatalogError::Status { status: 401, .. }));
}

#[tokio::test]
async fn contract_shapes_and_failures() {
    let catalog = logged_in().await;

    let contracts = catalog.list_contracts(1).await.unwrap();
    assert_eq!(contracts.len(), 2);
    assert_eq!(contracts[0].id, Some(7));
    assert_eq!(contracts[1].id, None);

    assert!(matches!(
        catalog.list_contracts(2).await,
        Err(CatalogError::Decode { .. })
    ));
    assert!(matches!(
        catalog.list_contracts(3).await,
        Err(CatalogError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn reports_detail_and_manifest() {
    let catalog = logged_in().await;

    let listing = catalog.list_reports(7, &[12, 31]).await.unwrap();
    let reports = &listing.reports;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].schedule_id, Some(11));
    assert!(reports[0].report_detail_chemicals.is_empty());
    assert_eq!(reports[1].schedule_id, Some(12));
    assert_eq!(reports[1].employee_name.as_deref(), Some("77"));
    assert_eq!(reports[1].note_remark.as_deref(), Some("12"));
    assert_eq!(listing.rejected.len(), 1);
    assert!(listing.rejected[0].contains("string"));

    let detail = catalog.fetch_contract_detail(7).await.unwrap();
    assert_eq!(detail.branch_name, "Malang");
    assert_eq!(detail.client_address, "Jl. Merdeka 1");

    let files = catalog.list_uploaded_files(11).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].remote_url.as_deref(), Some("https://cdn.test/a.png"));
    assert_eq!(files[0].id, Some(3));
}

#[tokio::test]
async fn unreachable_catalog_is_a_transport_error() {
    let catalog = HttpCatalog::new(&api_config("http://127.0.0.1:1".to_string())).unwrap();
    assert!(matches!(
        catalog.list_contracts(1).await,
        Err(CatalogError::Transport { .. })
    ));
}

// ============ HTTP rendering surface ============

async fn convert(body: Bytes) -> (StatusCode, Vec<u8>) {
    let text = String::from_utf8_lossy(&body);
    if !text.contains("index.html") || !text.contains("paperWidth") {
        return (StatusCode::BAD_REQUEST, b"missing parts".to_vec());
    }
    if text.contains("FAIL") {
        return (StatusCode::INTERNAL_SERVER_ERROR, b"chromium crashed".to_vec());
    }
    (StatusCode::OK, b"%PDF-1.7 converted".to_vec())
}

fn renderer() -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "up" })) }))
        .route("/forms/chromium/convert/html", post(convert))
}

#[tokio::test]
async fn http_surface_renders_and_reports_failures() {
    let base = serve(renderer()).await;
    let surface = HttpSurface::open(&base, Duration::from_secs(5)).await.unwrap();
    assert_eq!(surface.name(), "http");

    let pdf = surface
        .render("<html><body>ok</body></html>", PageFormat::A4)
        .await
        .unwrap();
    assert_eq!(pdf, b"%PDF-1.7 converted");

    let err = surface
        .render("<html><body>FAIL</body></html>", PageFormat::Letter)
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Failed(ref msg) if msg.contains("chromium crashed")));

    surface.close().await;
}

#[tokio::test]
async fn http_surface_without_health_is_unavailable() {
    let base = serve(Router::new()).await;
    let result = HttpSurface::open(&base, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(RenderError::Unavailable(_))));
}
