//! Gateway-facing endpoints. These are unauthenticated; trust comes from the
//! provider signature checked by the reconciler.
//!
//! Browser returns always end in a redirect to the storefront result page and
//! never leak error details. Server-to-server notifications answer in the
//! format each provider expects.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use url::form_urlencoded;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::PaymentMethod,
    errors::ServiceError,
    gateways::{params_from_json, CallbackParams},
    handlers::AppState,
    services::reconciliation::Reconciliation,
};

/// VNPay IPN acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct VnpayIpnResponse {
    #[serde(rename = "RspCode")]
    pub rsp_code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl VnpayIpnResponse {
    fn new(code: &str, message: &str) -> Self {
        Self {
            rsp_code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Maps a reconciliation result onto VNPay's response codes.
    pub fn from_result(result: &Result<Reconciliation, ServiceError>) -> Self {
        match result {
            Ok(_) => Self::new("00", "Confirm Success"),
            Err(ServiceError::InvalidSignature(_)) => Self::new("97", "Invalid signature"),
            Err(ServiceError::NotFound(_)) => Self::new("01", "Order not found"),
            Err(ServiceError::ValidationError(_)) => Self::new("04", "Invalid amount"),
            Err(_) => Self::new("99", "Unknown error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MomoIpnResponse {
    pub message: String,
}

/// Storefront result page for a finished payment attempt.
fn result_redirect(state: &AppState, order_id: Option<String>, paid: bool) -> Redirect {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(order_id) = order_id {
        query.append_pair("orderId", &order_id);
    }
    query.append_pair("status", if paid { "success" } else { "failed" });
    Redirect::to(&format!(
        "{}?{}",
        state.config.payment_result_url(),
        query.finish()
    ))
}

/// Best guess at the order a failed callback was about, for the result page.
fn order_hint(method: PaymentMethod, params: &CallbackParams) -> Option<String> {
    match method {
        PaymentMethod::Vnpay => params
            .get("vnp_TxnRef")
            .and_then(|r| Uuid::parse_str(r).ok())
            .map(|id| id.to_string()),
        _ => params.get("orderId").cloned(),
    }
    .filter(|s| !s.is_empty())
}

async fn browser_return(state: AppState, method: PaymentMethod, params: CallbackParams) -> Redirect {
    match state.services.reconciler.reconcile(method, &params).await {
        Ok(result) => {
            info!(
                provider = %method,
                order_id = %result.order_id,
                paid = result.is_paid(),
                "payment return handled"
            );
            result_redirect(&state, Some(result.order_id.to_string()), result.is_paid())
        }
        Err(e) => {
            warn!(provider = %method, error = %e, "payment return rejected");
            result_redirect(&state, order_hint(method, &params), false)
        }
    }
}

/// Browser return from VNPay
#[utoipa::path(
    get,
    path = "/api/v1/payments/vnpay/return",
    responses(
        (status = 303, description = "Redirect to the storefront payment result page")
    ),
    tag = "Payment callbacks"
)]
pub async fn vnpay_return(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    browser_return(state, PaymentMethod::Vnpay, params).await
}

/// Server-to-server notification from VNPay
#[utoipa::path(
    get,
    path = "/api/v1/payments/vnpay/ipn",
    responses(
        (status = 200, description = "VNPay acknowledgement", body = VnpayIpnResponse)
    ),
    tag = "Payment callbacks"
)]
pub async fn vnpay_ipn(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Json<VnpayIpnResponse> {
    let result = state
        .services
        .reconciler
        .reconcile(PaymentMethod::Vnpay, &params)
        .await;
    if let Err(e) = &result {
        warn!(error = %e, "vnpay ipn rejected");
    }
    Json(VnpayIpnResponse::from_result(&result))
}

/// Browser return from MoMo
#[utoipa::path(
    get,
    path = "/api/v1/payments/momo/return",
    responses(
        (status = 303, description = "Redirect to the storefront payment result page")
    ),
    tag = "Payment callbacks"
)]
pub async fn momo_return(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    browser_return(state, PaymentMethod::Momo, params).await
}

/// Server-to-server notification from MoMo
#[utoipa::path(
    post,
    path = "/api/v1/payments/momo/ipn",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Notification accepted", body = MomoIpnResponse),
        (status = 400, description = "Invalid callback", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payment callbacks"
)]
pub async fn momo_ipn(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ServiceError> {
    let params = params_from_json(&body);
    let result = state
        .services
        .reconciler
        .reconcile(PaymentMethod::Momo, &params)
        .await?;
    info!(order_id = %result.order_id, outcome = ?result.outcome, "momo ipn handled");
    Ok(Json(MomoIpnResponse {
        message: "Received".to_string(),
    })
    .into_response())
}

pub fn payment_callback_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/vnpay/return", get(vnpay_return))
        .route("/payments/vnpay/ipn", get(vnpay_ipn))
        .route("/payments/momo/return", get(momo_return))
        .route("/payments/momo/ipn", post(momo_ipn))
}
