//! Storefront API Library
//!
//! Checkout, coupons, carts and MoMo/VNPay payments over HTTP.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::HeaderValue, response::Json, routing::get, Extension, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};
use crate::middleware_helpers::IdempotencyStore;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
    pub idempotency: IdempotencyStore,
}

impl AppState {
    /// Wires services, gateways and auth from configuration.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Option<Arc<events::EventSender>>,
    ) -> Result<Self, errors::ServiceError> {
        let gateways = gateways::PaymentGateways::from_config(&config)?;
        let services = handlers::AppServices::new(db.clone(), &config, gateways, event_sender);
        let auth = Arc::new(AuthService::new(auth::AuthConfig::from(&config)));
        Ok(Self {
            db,
            config,
            services,
            auth,
            idempotency: IdempotencyStore::new(),
        })
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_carries_message() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("oops"));
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
    }

    #[test]
    fn validation_errors_outside_a_request_have_no_id() {
        let response = ApiResponse::<()>::validation_errors(vec!["missing".into()]);
        assert_eq!(response.errors, Some(vec!["missing".to_string()]));
        let meta = response.meta.expect("metadata expected");
        assert!(meta.request_id.is_none());
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    // Checkout and gateway initiation replay on a repeated Idempotency-Key
    let idempotent = Router::new()
        .merge(handlers::orders::order_create_routes())
        .merge(handlers::payments::payment_initiation_routes())
        .layer(axum::middleware::from_fn(
            middleware_helpers::idempotency_middleware,
        ))
        .with_auth();

    let shopper = Router::new()
        .merge(handlers::orders::order_routes())
        .merge(handlers::coupons::coupon_routes())
        .merge(handlers::cart::cart_routes())
        .with_auth();

    let admin = Router::new()
        .merge(handlers::orders::order_admin_routes())
        .merge(handlers::coupons::coupon_admin_routes())
        .merge(handlers::payments::payment_admin_routes())
        .with_role(ADMIN_ROLE);

    // Gateway callbacks authenticate by signature, not bearer token
    let callbacks = handlers::payment_callbacks::payment_callback_routes();

    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(idempotent)
        .merge(shopper)
        .merge(admin)
        .merge(callbacks)
}

/// CORS from configuration; `None` when nothing is configured outside development.
pub fn cors_layer(cfg: &config::AppConfig) -> Option<CorsLayer> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            environment = %cfg.environment,
            "using permissive CORS because explicit origins were not configured"
        );
        Some(CorsLayer::permissive())
    } else {
        None
    }
}

/// The full application: API routes, OpenAPI document and the HTTP stack.
pub fn app_router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config).ok_or_else(|| {
        anyhow::anyhow!(
            "missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
        )
    })?;
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    let router = Router::<AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .route("/api-docs/openapi.json", get(openapi_document))
        .nest("/api/v1", api_v1_routes())
        .layer(Extension(state.auth.clone()))
        .layer(Extension(state.idempotency.clone()))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(crate::tracing::http_trace_layer())
        // Outermost so every layer above sees the request id
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state);

    Ok(router)
}

async fn openapi_document() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::openapi_json())
}

/// Service version and environment
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses((status = 200, description = "Service status", body = crate::ApiResponse<serde_json::Value>)),
    tag = "Health"
)]
pub async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "service": "storefront-api",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "gateways": {
            "momo": state.config.momo.is_some(),
            "vnpay": state.config.vnpay.is_some(),
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

/// Database connectivity check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Healthy", body = crate::ApiResponse<serde_json::Value>),
        (status = 503, description = "Database unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    db::check_connection(&state.db)
        .await
        .map_err(|_| errors::ServiceError::ServiceUnavailable("database unreachable".into()))?;

    let health_data = json!({
        "status": "healthy",
        "checks": { "database": "healthy" },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

pub mod prelude {
    pub use crate::errors::*;
    pub use crate::services::{Actor, Page, Paged};
    pub use crate::{ApiResponse, ApiResult, AppState};
}
