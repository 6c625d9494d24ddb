use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::OrderStatus,
    errors::ServiceError,
    handlers::AppState,
    services::{
        orders::{
            CancelOrderRequest, CreateOrderRequest, OrderFilter, OrderWithItems,
            UpdateOrderInfoRequest, UpdateOrderStatusRequest,
        },
        Page, Paged,
    },
    ApiResponse,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    /// Page number (default 1)
    pub page: Option<u64>,
    /// Items per page (default 20, max 100)
    pub limit: Option<u64>,
    pub status: Option<OrderStatus>,
    /// Admin only; ignored for shoppers
    pub user_id: Option<Uuid>,
}

/// Place an order from the submitted items
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::ApiResponse<OrderWithItems>),
        (status = 400, description = "Invalid order or coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order number space exhausted", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderWithItems>>), ServiceError> {
    let order = state
        .services
        .orders
        .create_order(user.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// List orders (own orders, or all for admins)
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Orders page", body = crate::ApiResponse<Paged<OrderWithItems>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Paged<OrderWithItems>>>, ServiceError> {
    let filter = OrderFilter {
        user_id: query.user_id,
        status: query.status,
    };
    let page = state
        .services
        .orders
        .list_orders(user.actor(), filter, Page::new(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// Get one order with its items
#[utoipa::path(
    get,
    path = "/api/v1/orders/:id",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = crate::ApiResponse<OrderWithItems>),
        (status = 403, description = "Not the caller's order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state.services.orders.get_order(user.actor(), id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Update status, payment status or admin note (admin)
#[utoipa::path(
    put,
    path = "/api/v1/orders/:id",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order updated", body = crate::ApiResponse<OrderWithItems>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_order_status(user.actor(), id, request)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel a pending order
#[utoipa::path(
    put,
    path = "/api/v1/orders/:id/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body(content = Option<CancelOrderRequest>),
    responses(
        (status = 200, description = "Order cancelled", body = crate::ApiResponse<OrderWithItems>),
        (status = 400, description = "Order is past pending", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelOrderRequest>>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let order = state
        .services
        .orders
        .cancel_order(user.actor(), id, request)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Edit recipient details while the order is pending (owner)
#[utoipa::path(
    put,
    path = "/api/v1/orders/:id/update-info",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderInfoRequest,
    responses(
        (status = 200, description = "Order updated", body = crate::ApiResponse<OrderWithItems>),
        (status = 400, description = "Order is past pending", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the order owner", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_info(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderInfoRequest>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_order_info(user.actor(), id, request)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Delete an order with its items and payment (admin)
#[utoipa::path(
    delete,
    path = "/api/v1/orders/:id",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order deleted", body = crate::ApiResponse<serde_json::Value>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    state.services.orders.delete_order(user.actor(), id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

/// Routes any authenticated shopper may call.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", put(cancel_order))
        .route("/orders/:id/update-info", put(update_order_info))
}

/// Checkout; wrapped with the idempotency layer by the caller.
pub fn order_create_routes() -> Router<AppState> {
    Router::new().route("/orders", post(create_order))
}

pub fn order_admin_routes() -> Router<AppState> {
    Router::new().route(
        "/orders/:id",
        put(update_order_status).delete(delete_order),
    )
}
