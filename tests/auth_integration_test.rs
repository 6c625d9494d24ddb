mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use storefront_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
};
use uuid::Uuid;

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = TestApp::new().await;

    let resp = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let foreign = AuthService::new(AuthConfig::from(&AppConfig::new(
        "sqlite::memory:".to_string(),
        "a_completely_different_signing_secret_0123456789".to_string(),
        "test".to_string(),
    )))
    .issue_token(Uuid::new_v4(), None, None, vec!["admin".into()])
    .unwrap();
    let resp = app
        .request(Method::GET, "/api/v1/payments", None, Some(&foreign))
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_need_the_admin_role() {
    let app = TestApp::new().await;

    let resp = app.as_user(Method::GET, "/api/v1/payments", None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app.as_admin(Method::GET, "/api/v1/payments", None).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn health_and_status_are_public() {
    let app = TestApp::new().await;

    let resp = app.request(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["status"], "healthy");

    let resp = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["gateways"]["vnpay"], true);
    assert_eq!(resp.data()["gateways"]["momo"], false);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;

    let resp = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.body["paths"]["/api/v1/orders"].is_object());
}

#[tokio::test]
async fn request_ids_are_echoed_or_minted() {
    let app = TestApp::new().await;

    let resp = app
        .request_with_headers(
            Method::GET,
            "/api/v1/status",
            None,
            None,
            &[("x-request-id", "checkout-trace-1")],
        )
        .await;
    assert_eq!(resp.headers.get("x-request-id").unwrap(), "checkout-trace-1");
    assert_eq!(resp.body["meta"]["request_id"], "checkout-trace-1");

    let resp = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert!(resp.headers.contains_key("x-request-id"));
}
