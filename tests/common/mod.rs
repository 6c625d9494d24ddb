#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use storefront_api::{
    auth::ADMIN_ROLE,
    config::{AppConfig, VnpayConfig},
    db,
    entities::coupon,
    events::{self, EventSender},
    services::coupons::CreateCouponRequest,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const VNPAY_SECRET: &str = "VNPAYSECRETKEYFORTESTS0123456789";
pub const MOMO_SECRET: &str = "K951B6PE1waDMi640xX08PD3vg6EkVlz";
pub const MOMO_ACCESS_KEY: &str = "F8BBA842ECF85";
pub const MOMO_PARTNER: &str = "MOMOTEST";

/// A response with its body already collected.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `data` of an `ApiResponse` envelope.
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get("location")
            .and_then(|v| v.to_str().ok())
    }
}

/// Application wired to a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub user_id: Uuid,
    pub user_token: String,
    pub other_user_id: Uuid,
    pub other_token: String,
    pub admin_id: Uuid,
    pub admin_token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn base_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        JWT_SECRET.to_string(),
        "test".to_string(),
    );
    // A single connection keeps every query on the same in-memory database.
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.frontend_url = "http://shop.test".to_string();
    cfg.vnpay = Some(VnpayConfig {
        tmn_code: "DEMOTMN1".to_string(),
        hash_secret: VNPAY_SECRET.to_string(),
        payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
        return_url: "http://localhost:8080/api/v1/payments/vnpay/return".to_string(),
        expire_minutes: 15,
        locale: "vn".to_string(),
    });
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(base_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, Some(event_sender))
            .expect("failed to build app state");
        let router = storefront_api::app_router(state.clone()).expect("failed to build router");

        let user_id = Uuid::new_v4();
        let other_user_id = Uuid::new_v4();
        let admin_id = Uuid::new_v4();
        let issue = |id: Uuid, roles: Vec<String>| {
            state
                .auth
                .issue_token(id, Some("Test User".into()), None, roles)
                .expect("issue test token")
        };

        Self {
            router,
            user_token: issue(user_id, vec![]),
            other_token: issue(other_user_id, vec![]),
            admin_token: issue(admin_id, vec![ADMIN_ROLE.to_string()]),
            user_id,
            other_user_id,
            admin_id,
            state,
            _event_task: event_task,
        }
    }

    /// Send a request with an optional bearer token and JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read response body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn as_user(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        self.request(method, uri, body, Some(&self.user_token)).await
    }

    pub async fn as_admin(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        self.request(method, uri, body, Some(&self.admin_token)).await
    }

    /// Places a two-line order (2 x 50,000 + 1 x 100,000 = 200,000 VND).
    pub async fn place_order(&self, extra: Value) -> TestResponse {
        let mut body = order_body();
        if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), extra) {
            target.extend(extra);
        }
        self.as_user(Method::POST, "/api/v1/orders", Some(body)).await
    }

    pub async fn seed_coupon(&self, request: CreateCouponRequest) -> coupon::Model {
        self.state
            .services
            .coupons
            .create(request)
            .await
            .expect("seed coupon")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn order_body() -> Value {
    json!({
        "items": [
            { "product_id": "p-100", "name": "Ao thun", "price": 50000, "quantity": 2 },
            { "product_id": "p-200", "name": "Quan jean", "price": 100000, "quantity": 1 }
        ],
        "customer_name": "Nguyen Van A",
        "customer_phone": "0901234567",
        "customer_email": "a@example.com",
        "shipping_address": "12 Le Loi, Quan 1",
        "shipping_province": "Ho Chi Minh",
        "payment_method": "COD",
        "source": "buy_now"
    })
}

pub fn percentage_coupon(code: &str, percent: i64) -> CreateCouponRequest {
    let now = Utc::now();
    CreateCouponRequest {
        code: code.to_string(),
        name: format!("{} percent off", percent),
        description: None,
        discount_type: coupon::DiscountType::Percentage,
        discount_value: percent,
        max_discount_amount: None,
        min_order_value: 0,
        max_total_uses: None,
        max_uses_per_user: 1,
        valid_from: now - Duration::days(1),
        valid_until: now + Duration::days(30),
        is_active: true,
        is_public: true,
    }
}
