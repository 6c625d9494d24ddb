use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    entities::coupon,
    errors::ServiceError,
    handlers::AppState,
    services::coupons::{ApplyCouponRequest, CouponQuote, CreateCouponRequest, UpdateCouponRequest},
    ApiResponse,
};

/// Quote a coupon against a subtotal without redeeming it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/apply",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Discount quote", body = crate::ApiResponse<CouponQuote>),
        (status = 400, description = "Coupon not applicable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown or inactive coupon", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ApplyCouponRequest>,
) -> Result<Json<ApiResponse<CouponQuote>>, ServiceError> {
    request.validate()?;
    let quote = state
        .services
        .coupons
        .quote(
            &request.code,
            request.subtotal,
            request.shipping_fee.unwrap_or(0),
            Some(user.user_id),
        )
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// List coupons (active public ones, or all for admins)
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    responses(
        (status = 200, description = "Coupons", body = crate::ApiResponse<Vec<coupon::Model>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<coupon::Model>>>, ServiceError> {
    let coupons = state.services.coupons.list(user.actor()).await?;
    Ok(Json(ApiResponse::success(coupons)))
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons/:id",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon", body = crate::ApiResponse<coupon::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<coupon::Model>>, ServiceError> {
    let coupon = state.services.coupons.get(user.actor(), id).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

/// Create a coupon (admin)
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = crate::ApiResponse<coupon::Model>),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<coupon::Model>>), ServiceError> {
    let coupon = state.services.coupons.create(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(coupon))))
}

#[utoipa::path(
    put,
    path = "/api/v1/coupons/:id",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    request_body = UpdateCouponRequest,
    responses(
        (status = 200, description = "Coupon updated", body = crate::ApiResponse<coupon::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCouponRequest>,
) -> Result<Json<ApiResponse<coupon::Model>>, ServiceError> {
    let coupon = state.services.coupons.update(id, request).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/coupons/:id",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon deleted", body = crate::ApiResponse<serde_json::Value>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    state.services.coupons.delete(id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

pub fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route("/coupons", get(list_coupons))
        .route("/coupons/apply", post(apply_coupon))
        .route("/coupons/:id", get(get_coupon))
}

pub fn coupon_admin_routes() -> Router<AppState> {
    Router::new()
        .route("/coupons", post(create_coupon))
        .route("/coupons/:id", axum::routing::put(update_coupon).delete(delete_coupon))
}
