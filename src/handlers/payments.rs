use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{payment, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    handlers::{client_ip, AppState},
    services::{
        payments::{
            CreatePaymentRequest, InitiatePaymentRequest, PaymentFilter, PaymentInitiation,
            UpdatePaymentRequest,
        },
        Page, Paged,
    },
    ApiResponse,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListPaymentsQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    pub order_id: Option<Uuid>,
}

async fn initiate(
    state: &AppState,
    user: &AuthUser,
    method: PaymentMethod,
    headers: &HeaderMap,
    request: InitiatePaymentRequest,
) -> Result<Json<ApiResponse<PaymentInitiation>>, ServiceError> {
    let initiation = state
        .services
        .payments
        .initiate(user.actor(), method, request, client_ip(headers))
        .await?;
    Ok(Json(ApiResponse::success(initiation)))
}

/// Start a MoMo payment for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments/momo",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Redirect URL issued", body = crate::ApiResponse<PaymentInitiation>),
        (status = 400, description = "Order cannot be paid", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway failure", body = crate::errors::ErrorResponse),
        (status = 503, description = "MoMo not configured", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_momo_payment(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<ApiResponse<PaymentInitiation>>, ServiceError> {
    initiate(&state, &user, PaymentMethod::Momo, &headers, request).await
}

/// Start a VNPay payment for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments/vnpay/create",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Redirect URL issued", body = crate::ApiResponse<PaymentInitiation>),
        (status = 400, description = "Order cannot be paid", body = crate::errors::ErrorResponse),
        (status = 503, description = "VNPay not configured", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_vnpay_payment(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<ApiResponse<PaymentInitiation>>, ServiceError> {
    initiate(&state, &user, PaymentMethod::Vnpay, &headers, request).await
}

/// Record a payment by hand, e.g. a bank transfer (admin)
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment recorded", body = crate::ApiResponse<payment::Model>),
        (status = 409, description = "Order already has a payment", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<payment::Model>>), ServiceError> {
    let payment = state.services.payments.create(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(ListPaymentsQuery),
    responses(
        (status = 200, description = "Payments page", body = crate::ApiResponse<Paged<payment::Model>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<ApiResponse<Paged<payment::Model>>>, ServiceError> {
    let filter = PaymentFilter {
        status: query.status,
        method: query.method,
        order_id: query.order_id,
    };
    let payments = state
        .services
        .payments
        .list(filter, Page::new(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(payments)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/:id",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment", body = crate::ApiResponse<payment::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.services.payments.get(id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Change a payment's status; the order mirrors it
#[utoipa::path(
    put,
    path = "/api/v1/payments/:id",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body = UpdatePaymentRequest,
    responses(
        (status = 200, description = "Payment updated", body = crate::ApiResponse<payment::Model>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePaymentRequest>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.services.payments.update(id, request).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Refund a successful payment
#[utoipa::path(
    post,
    path = "/api/v1/payments/:id/refund",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment refunded", body = crate::ApiResponse<payment::Model>),
        (status = 400, description = "Payment is not successful", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let payment = state.services.payments.refund(id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/payments/:id",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment deleted", body = crate::ApiResponse<serde_json::Value>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn delete_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    state.services.payments.delete(id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

/// Gateway initiation; wrapped with the idempotency layer by the caller.
pub fn payment_initiation_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/momo", post(create_momo_payment))
        .route("/payments/vnpay/create", post(create_vnpay_payment))
}

pub fn payment_admin_routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment).get(list_payments))
        .route(
            "/payments/:id",
            get(get_payment).put(update_payment).delete(delete_payment),
        )
        .route("/payments/:id/refund", post(refund_payment))
}
