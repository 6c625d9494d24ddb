use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::cart_item,
    errors::ServiceError,
    handlers::AppState,
    services::cart::{AddToCartRequest, UpdateCartItemRequest},
    ApiResponse,
};

/// The caller's cart, newest lines first
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart lines", body = crate::ApiResponse<Vec<cart_item::Model>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<cart_item::Model>>>, ServiceError> {
    let items = state.services.cart.list(user.user_id).await?;
    Ok(Json(ApiResponse::success(items)))
}

/// Add a product, merging with an existing line
#[utoipa::path(
    post,
    path = "/api/v1/cart/add",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Cart line", body = crate::ApiResponse<cart_item::Model>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AddToCartRequest>,
) -> Result<Json<ApiResponse<cart_item::Model>>, ServiceError> {
    let item = state.services.cart.add(user.user_id, request).await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/:id",
    params(("id" = Uuid, Path, description = "Cart line ID")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Cart line", body = crate::ApiResponse<cart_item::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> Result<Json<ApiResponse<cart_item::Model>>, ServiceError> {
    let item = state
        .services
        .cart
        .update_quantity(user.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/:id",
    params(("id" = Uuid, Path, description = "Cart line ID")),
    responses(
        (status = 200, description = "Line removed", body = crate::ApiResponse<serde_json::Value>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    state.services.cart.remove(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/clear/all",
    responses(
        (status = 200, description = "Cart emptied", body = crate::ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let removed = state.services.cart.clear(user.user_id).await?;
    Ok(Json(ApiResponse::success(json!({ "removed": removed }))))
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart))
        .route("/cart/add", post(add_to_cart))
        .route("/cart/clear/all", delete(clear_cart))
        .route("/cart/:id", put(update_cart_item).delete(remove_cart_item))
}
